//! 问答摘要策略
//!
//! 摘要链是一个有序的 [`SummarizerStrategy`] 列表：依次尝试，第一个返回合法
//! 两行摘要（`q: …` / `a: …`）的策略胜出；全部失败时使用确定性格式化结果。

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::provider::ChatProvider;

/// 摘要策略
#[async_trait]
pub trait SummarizerStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// 尝试生成两行摘要，失败或格式不符时返回 `None`
    async fn attempt(&self, question: &str, answer: &str) -> Option<String>;
}

/// 摘要提示词模板
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryPrompt {
    /// 单条用户提示，附带长度要求
    Detailed,
    /// 系统提示约束输出，用户提示只携带问答内容
    Terse,
}

impl SummaryPrompt {
    fn render(&self, question: &str, answer: &str) -> (Option<&'static str>, String) {
        match self {
            SummaryPrompt::Detailed => (
                None,
                format!(
                    "You are a medical summariser. Create a concise summary of this Q&A exchange.\n\n\
                     Question: {}\n\n\
                     Answer: {}\n\n\
                     Please provide exactly two lines in this format:\n\
                     q: <brief question summary>\n\
                     a: <brief answer summary>\n\n\
                     Keep each summary under 160 characters for question and 220 characters for answer.",
                    question, answer
                ),
            ),
            SummaryPrompt::Terse => (
                Some(
                    "You are a terse summariser. Output exactly two lines:\n\
                     q: <short question summary>\n\
                     a: <short answer summary>\n\
                     No extra text.",
                ),
                format!("Question:\n{}\n\nAnswer:\n{}", question, answer),
            ),
        }
    }
}

/// 通过生成模型提示的摘要策略
pub struct PromptSummarizer {
    provider: Arc<dyn ChatProvider>,
    prompt: SummaryPrompt,
}

impl PromptSummarizer {
    pub fn new(provider: Arc<dyn ChatProvider>, prompt: SummaryPrompt) -> Self {
        Self { provider, prompt }
    }
}

#[async_trait]
impl SummarizerStrategy for PromptSummarizer {
    fn name(&self) -> &str {
        self.provider.name()
    }

    async fn attempt(&self, question: &str, answer: &str) -> Option<String> {
        if !self.provider.is_available() {
            tracing::debug!("Summarizer {} has no credentials, skipping", self.name());
            return None;
        }

        let (system, user) = self.prompt.render(question, answer);
        let outcome = match self.provider.complete(system, &user).await {
            Ok(raw) => parse_two_line_summary(&raw),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::warn!("Summarizer {} failed: {}", self.name(), e);
                None
            }
        }
    }
}

/// 提取首个 `q:` 行与首个 `a:` 行（不区分大小写）
pub fn parse_two_line_summary(raw: &str) -> Result<String> {
    let lines: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let starts_with = |line: &&str, prefix: &str| {
        line.get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    };

    let q_line = lines.iter().copied().find(|l| starts_with(l, "q:"));
    let a_line = lines.iter().copied().find(|l| starts_with(l, "a:"));

    match (q_line, a_line) {
        (Some(q), Some(a)) => Ok(format!("{}\n{}", q, a)),
        _ => Err(AppError::MalformedProviderOutput(format!(
            "expected `q:` and `a:` lines, got {} line(s)",
            lines.len()
        ))),
    }
}

/// 确定性回退摘要
pub fn fallback_summary(question: &str, answer: &str) -> String {
    format!("q: {}\na: {}", question, answer)
}

/// 依次尝试策略，全部失败时返回确定性摘要
pub async fn summarize_with(
    strategies: &[Arc<dyn SummarizerStrategy>],
    question: &str,
    answer: &str,
) -> String {
    for strategy in strategies {
        if let Some(summary) = strategy.attempt(question, answer).await {
            tracing::debug!("Exchange summarised by {}", strategy.name());
            return summary;
        }
    }

    tracing::warn!("All summarizers failed, using deterministic summary");
    fallback_summary(question, answer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::ScriptedProvider;
    use rstest::rstest;

    #[rstest]
    #[case("q: migraine basics\na: recurring headache", "q: migraine basics\na: recurring headache")]
    #[case("Here you go:\n\nQ: Migraine?\n  A: A headache disorder.\nThanks", "Q: Migraine?\nA: A headache disorder.")]
    #[case("a: answer first\nq: question second", "q: question second\na: answer first")]
    fn test_parse_valid_summary(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(parse_two_line_summary(raw).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("q: only a question")]
    #[case("A migraine is a headache.")]
    #[case("qa: nope\nanswer: nope")]
    fn test_parse_malformed_summary(#[case] raw: &str) {
        assert!(matches!(
            parse_two_line_summary(raw),
            Err(AppError::MalformedProviderOutput(_))
        ));
    }

    #[test]
    fn test_fallback_summary_format() {
        assert_eq!(
            fallback_summary("What is a migraine?", "A migraine is..."),
            "q: What is a migraine?\na: A migraine is..."
        );
    }

    #[tokio::test]
    async fn test_cascade_falls_through_malformed_to_secondary() {
        let primary = Arc::new(ScriptedProvider::new(
            "gemini",
            vec![Ok("Sure! Here is a summary.".to_string())],
        ));
        let secondary = Arc::new(ScriptedProvider::new(
            "nvidia",
            vec![Ok("q: short q\na: short a".to_string())],
        ));
        let strategies: Vec<Arc<dyn SummarizerStrategy>> = vec![
            Arc::new(PromptSummarizer::new(primary.clone(), SummaryPrompt::Detailed)),
            Arc::new(PromptSummarizer::new(secondary.clone(), SummaryPrompt::Terse)),
        ];

        let summary = summarize_with(&strategies, "long question", "long answer").await;
        assert_eq!(summary, "q: short q\na: short a");
        assert_eq!(primary.call_count(), 1);
        assert_eq!(secondary.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cascade_without_credentials_is_deterministic() {
        let strategies: Vec<Arc<dyn SummarizerStrategy>> = vec![
            Arc::new(PromptSummarizer::new(
                Arc::new(ScriptedProvider::unavailable("gemini")),
                SummaryPrompt::Detailed,
            )),
            Arc::new(PromptSummarizer::new(
                Arc::new(ScriptedProvider::unavailable("nvidia")),
                SummaryPrompt::Terse,
            )),
        ];

        let summary = summarize_with(&strategies, "Q?", "A.").await;
        assert_eq!(summary, "q: Q?\na: A.");
        assert_eq!(summarize_with(&[], "Q?", "A.").await, "q: Q?\na: A.");
    }

    #[test]
    fn test_prompt_templates() {
        let (system, user) = SummaryPrompt::Detailed.render("Q", "A");
        assert!(system.is_none());
        assert!(user.contains("Question: Q"));
        assert!(user.contains("under 160 characters"));

        let (system, user) = SummaryPrompt::Terse.render("Q", "A");
        assert!(system.unwrap().starts_with("You are a terse summariser."));
        assert_eq!(user, "Question:\nQ\n\nAnswer:\nA");
    }
}
