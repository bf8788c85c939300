//! 会话标题生成
//!
//! 首轮问答后为会话生成 3 到 7 个词的短标题。生成模型不可用、
//! 调用失败或清洗后为空时，退化为问题文本的前若干个词。

use std::sync::Arc;

use crate::models::session::DEFAULT_SESSION_TITLE;
use crate::provider::ChatProvider;

/// 标题词数下限
pub const MIN_TITLE_WORDS: usize = 3;
/// 标题词数上限
pub const MAX_TITLE_WORDS: usize = 7;

const TITLE_SYSTEM_PROMPT: &str = "You generate extremely concise titles.";

/// 把词数限制在 3..=7
pub fn clamp_title_words(max_words: usize) -> usize {
    max_words.clamp(MIN_TITLE_WORDS, MAX_TITLE_WORDS)
}

/// 清洗模型输出：去掉引号与换行，合并空白，截断到词数上限
pub fn sanitize_title(raw: &str, max_words: usize) -> String {
    let without_quotes: String = raw
        .chars()
        .filter(|c| !matches!(c, '"' | '\'' | '`'))
        .collect();

    without_quotes
        .split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

/// 启发式标题：问题的前若干个词，去掉标点
pub fn heuristic_title(text: &str, max_words: usize) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();

    let words: Vec<&str> = stripped.split_whitespace().take(max_words).collect();
    if words.is_empty() {
        return DEFAULT_SESSION_TITLE.to_string();
    }
    words.join(" ")
}

/// 会话标题生成器
pub struct TitleGenerator {
    provider: Arc<dyn ChatProvider>,
    max_words: usize,
}

impl TitleGenerator {
    pub fn new(provider: Arc<dyn ChatProvider>, max_words: usize) -> Self {
        Self {
            provider,
            max_words: clamp_title_words(max_words),
        }
    }

    pub fn max_words(&self) -> usize {
        self.max_words
    }

    fn prompt(&self, first_message: &str) -> String {
        let message = if first_message.trim().is_empty() {
            DEFAULT_SESSION_TITLE
        } else {
            first_message
        };
        format!(
            "Summarise the user's first chat message into a very short title of {}-{} words. \
             Only return the title text without quotes or punctuation. Message: {}",
            MIN_TITLE_WORDS, self.max_words, message
        )
    }

    /// 生成标题，永不失败
    pub async fn generate(&self, first_message: &str) -> String {
        if self.provider.is_available() {
            match self
                .provider
                .complete(Some(TITLE_SYSTEM_PROMPT), &self.prompt(first_message))
                .await
            {
                Ok(raw) => {
                    let title = sanitize_title(&raw, self.max_words);
                    if !title.is_empty() {
                        return title;
                    }
                    tracing::warn!("Title model returned an empty title, using heuristic");
                }
                Err(e) => tracing::warn!("Title generation via {} failed: {}", self.provider.name(), e),
            }
        }

        heuristic_title(first_message, self.max_words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::provider::testing::ScriptedProvider;
    use rstest::rstest;

    #[rstest]
    #[case("\"Migraine Triggers Explained\"", 5, "Migraine Triggers Explained")]
    #[case("  Chest\n\npain `after` running  ", 5, "Chest pain after running")]
    #[case("one two three four five six seven eight", 5, "one two three four five")]
    #[case("It's a 'quoted' title", 7, "Its a quoted title")]
    #[case("", 5, "")]
    fn test_sanitize_title(#[case] raw: &str, #[case] max_words: usize, #[case] expected: &str) {
        assert_eq!(sanitize_title(raw, max_words), expected);
    }

    #[rstest]
    #[case("What is a migraine?", 5, "What is a migraine")]
    #[case("Hello, doctor! My knee hurts when I run downhill.", 5, "Hello doctor My knee hurts")]
    #[case("", 5, "New Chat")]
    #[case("?!...", 5, "New Chat")]
    #[case("line one\nline two", 3, "line one line")]
    fn test_heuristic_title(#[case] text: &str, #[case] max_words: usize, #[case] expected: &str) {
        assert_eq!(heuristic_title(text, max_words), expected);
    }

    #[rstest]
    #[case(0, 3)]
    #[case(5, 5)]
    #[case(12, 7)]
    fn test_clamp_title_words(#[case] input: usize, #[case] expected: usize) {
        assert_eq!(clamp_title_words(input), expected);
    }

    #[tokio::test]
    async fn test_generate_uses_sanitized_model_output() {
        let provider = Arc::new(ScriptedProvider::new(
            "nvidia",
            vec![Ok("\"Understanding Migraine Headaches\"\n".to_string())],
        ));
        let generator = TitleGenerator::new(provider.clone(), 5);
        assert_eq!(
            generator.generate("What is a migraine?").await,
            "Understanding Migraine Headaches"
        );
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_generate_falls_back_on_failure() {
        let provider = Arc::new(ScriptedProvider::new(
            "nvidia",
            vec![Err(AppError::ProviderUnavailable("down".into()))],
        ));
        let generator = TitleGenerator::new(provider, 5);
        assert_eq!(generator.generate("What is a migraine?").await, "What is a migraine");
    }

    #[tokio::test]
    async fn test_generate_skips_unavailable_provider() {
        let provider = Arc::new(ScriptedProvider::unavailable("nvidia"));
        let generator = TitleGenerator::new(provider.clone(), 4);
        assert_eq!(generator.generate("").await, "New Chat");
        assert_eq!(provider.call_count(), 0);
    }
}
