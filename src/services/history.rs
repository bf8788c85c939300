//! 对话历史编排
//!
//! 记忆引擎的用例层：
//! - `process_exchange` 把一轮问答转成摘要写入长期记忆，追加会话消息，
//!   并在会话首轮之后生成标题；
//! - `get_context` 融合短期记忆（经相关性过滤）、长期记忆（语义检索）
//!   与当前会话窗口，生成下一轮的上下文。
//!
//! 所有依赖外部服务的步骤都会降级而不是报错，只有存储层错误向上传递。

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::config::MemoryConfig;
use crate::error::{AppError, Result};
use crate::index::EmbeddingService;
use crate::models::{Message, MessageRole, Session};
use crate::services::relevance::RelevanceFilter;
use crate::services::summarizer::{SummarizerStrategy, fallback_summary, summarize_with};
use crate::services::title::TitleGenerator;
use crate::storage::MemoryStore;

pub const STM_HEADER: &str = "Recent relevant context:";
pub const LTM_HEADER: &str = "Semantically relevant history:";
pub const CONVERSATION_HEADER: &str = "Current conversation:";

/// 一轮问答已完成的写入步骤
#[derive(Debug, Default)]
struct ExchangeProgress {
    summary: Option<String>,
    user_appended: bool,
    assistant_appended: bool,
}

/// 对话历史编排器
pub struct HistoryOrchestrator {
    store: Arc<dyn MemoryStore>,
    embeddings: Arc<EmbeddingService>,
    summarizers: Vec<Arc<dyn SummarizerStrategy>>,
    titles: TitleGenerator,
    relevance: RelevanceFilter,
    config: MemoryConfig,
}

impl HistoryOrchestrator {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        embeddings: Arc<EmbeddingService>,
        summarizers: Vec<Arc<dyn SummarizerStrategy>>,
        titles: TitleGenerator,
        relevance: RelevanceFilter,
        config: MemoryConfig,
    ) -> Self {
        Self {
            store,
            embeddings,
            summarizers,
            titles,
            relevance,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// 记录一轮问答，返回写入的摘要
    ///
    /// 会话或主体不存在时返回 `SessionNotFound` / `SubjectNotFound`，
    /// 会话属于其他主体时返回 `SessionOwnership`。
    /// 写入过程中出现非致命错误时，补全尚未完成的步骤：确定性摘要（不带向量）
    /// 以及用户、助手两条消息，保证问答不会丢失。
    pub async fn process_exchange(
        &self,
        subject_id: &str,
        session_id: &str,
        question: &str,
        answer: &str,
    ) -> Result<String> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;
        if self.store.get_subject(subject_id).await?.is_none() {
            return Err(AppError::SubjectNotFound(subject_id.to_string()));
        }
        ensure_owner(&session, subject_id)?;

        let summary = summarize_with(&self.summarizers, question, answer).await;

        let mut progress = ExchangeProgress::default();
        match self
            .persist_exchange(subject_id, session_id, question, answer, &summary, &mut progress)
            .await
        {
            Ok(()) => {
                tracing::info!(
                    "Recorded exchange for subject {} in session {}",
                    subject_id,
                    session_id
                );
                Ok(summary)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::warn!(
                    "Exchange for session {} hit {} ({}), completing with fallback",
                    session_id,
                    e.code(),
                    e
                );
                self.complete_exchange(subject_id, session_id, question, answer, progress)
                    .await
            }
        }
    }

    async fn persist_exchange(
        &self,
        subject_id: &str,
        session_id: &str,
        question: &str,
        answer: &str,
        summary: &str,
        progress: &mut ExchangeProgress,
    ) -> Result<()> {
        let embedding = self.embeddings.embed_one(summary).await;
        let embedding = (embedding.len() == self.embeddings.dimension()).then_some(embedding);

        self.store.add_summary(subject_id, summary, embedding).await?;
        progress.summary = Some(summary.to_string());

        self.store
            .append_message(session_id, MessageRole::User, question, HashMap::new())
            .await?;
        progress.user_appended = true;

        self.store
            .append_message(session_id, MessageRole::Assistant, answer, HashMap::new())
            .await?;
        progress.assistant_appended = true;

        self.bootstrap_title(session_id, question).await
    }

    async fn complete_exchange(
        &self,
        subject_id: &str,
        session_id: &str,
        question: &str,
        answer: &str,
        progress: ExchangeProgress,
    ) -> Result<String> {
        let summary = match progress.summary {
            Some(summary) => summary,
            None => {
                let summary = fallback_summary(question, answer);
                self.store.add_summary(subject_id, &summary, None).await?;
                summary
            }
        };

        if !progress.user_appended {
            self.store
                .append_message(session_id, MessageRole::User, question, HashMap::new())
                .await?;
        }
        if !progress.assistant_appended {
            self.store
                .append_message(session_id, MessageRole::Assistant, answer, HashMap::new())
                .await?;
        }

        match self.bootstrap_title(session_id, question).await {
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => tracing::warn!("Title bootstrap for session {} failed: {}", session_id, e),
            Ok(()) => {}
        }

        Ok(summary)
    }

    /// 会话恰好有两条消息时生成标题
    async fn bootstrap_title(&self, session_id: &str, question: &str) -> Result<()> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;

        if session.message_count() != 2 {
            return Ok(());
        }

        let title = self.titles.generate(question).await;
        self.store.rename_session(session_id, &title).await?;
        tracing::info!("Session {} titled \"{}\"", session_id, title);
        Ok(())
    }

    /// 为下一轮组装上下文，没有任何内容时返回空字符串
    pub async fn get_context(
        &self,
        subject_id: &str,
        session_id: &str,
        question: &str,
    ) -> Result<String> {
        let recent = self
            .store
            .recent_summaries(subject_id, self.config.stm_size)
            .await?;
        let stm = self.relevance.filter(question, recent).await.into_items();

        let query = self.embeddings.embed_one(question).await;
        let ltm: Vec<String> = self
            .store
            .semantic_summaries(
                subject_id,
                &query,
                self.config.ltm_top_k,
                self.config.similarity_floor,
            )
            .await?
            .into_iter()
            .map(|hit| hit.text)
            .collect();

        let conversation: Vec<String> = match self.store.get_session(session_id).await? {
            Some(session) => {
                ensure_owner(&session, subject_id)?;
                session
                    .recent_messages(self.config.session_window)
                    .iter()
                    .map(Message::render)
                    .collect()
            }
            None => Vec::new(),
        };

        tracing::debug!(
            "Context for {}: {} stm, {} ltm, {} message(s)",
            subject_id,
            stm.len(),
            ltm.len(),
            conversation.len()
        );
        Ok(compose_context(&stm, &ltm, &conversation))
    }

    /// 在主体全部摘要中检索
    ///
    /// 配置了真实嵌入模型时做语义检索，否则（或语义检索无结果时）
    /// 退化为不区分大小写的子串匹配。
    pub async fn search_history(
        &self,
        subject_id: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<String>> {
        let summaries = self.store.all_summaries(subject_id).await?;
        if summaries.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        if self.embeddings.is_available() {
            let hits = self
                .embeddings
                .semantic_search(query, &summaries, top_k, self.config.similarity_floor)
                .await;
            if !hits.is_empty() {
                return Ok(hits.into_iter().map(|m| m.text).collect());
            }
        }

        let needle = query.to_lowercase();
        Ok(summaries
            .into_iter()
            .filter(|s| s.to_lowercase().contains(&needle))
            .take(top_k)
            .collect())
    }

    /// 最近 `limit` 条摘要，最新在前
    pub async fn medical_history(&self, subject_id: &str, limit: usize) -> Result<Vec<String>> {
        let mut summaries = self.store.all_summaries(subject_id).await?;
        summaries.truncate(limit);
        Ok(summaries)
    }

    /// 为主体开启新会话
    pub async fn start_session(&self, subject_id: &str, title: Option<&str>) -> Result<String> {
        let title = title.unwrap_or(&self.config.default_title);
        self.store.create_session(subject_id, title).await
    }

    /// 主体最近活跃的会话
    pub async fn sessions(&self, subject_id: &str) -> Result<Vec<Session>> {
        self.store
            .list_sessions(subject_id, self.config.max_sessions)
            .await
    }
}

fn ensure_owner(session: &Session, subject_id: &str) -> Result<()> {
    if session.subject_id != subject_id {
        return Err(AppError::SessionOwnership {
            session: session.id.clone(),
            subject: subject_id.to_string(),
        });
    }
    Ok(())
}

/// 拼接非空段落，段落之间空一行
pub fn compose_context(stm: &[String], ltm: &[String], conversation: &[String]) -> String {
    [
        (STM_HEADER, stm),
        (LTM_HEADER, ltm),
        (CONVERSATION_HEADER, conversation),
    ]
    .iter()
    .filter(|(_, items)| !items.is_empty())
    .map(|(header, items)| format!("{}\n{}", header, items.join("\n")))
    .collect::<Vec<_>>()
    .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::ScriptedProvider;
    use crate::services::summarizer::{PromptSummarizer, SummaryPrompt};
    use crate::storage::InMemoryStore;

    const DIM: usize = 32;

    struct Fixture {
        store: Arc<InMemoryStore>,
        embeddings: Arc<EmbeddingService>,
        history: HistoryOrchestrator,
    }

    fn fixture(
        summarizer: Arc<ScriptedProvider>,
        helper: Arc<ScriptedProvider>,
    ) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let embeddings = Arc::new(EmbeddingService::fallback_only(DIM));
        let history = HistoryOrchestrator::new(
            store.clone(),
            embeddings.clone(),
            vec![Arc::new(PromptSummarizer::new(summarizer, SummaryPrompt::Detailed))],
            TitleGenerator::new(helper.clone(), 5),
            RelevanceFilter::new(helper),
            MemoryConfig::default(),
        );
        Fixture {
            store,
            embeddings,
            history,
        }
    }

    fn offline_fixture() -> Fixture {
        fixture(
            Arc::new(ScriptedProvider::unavailable("gemini")),
            Arc::new(ScriptedProvider::unavailable("nvidia")),
        )
    }

    async fn seed(fixture: &Fixture) {
        fixture.store.create_subject("p1", "Patient").await.unwrap();
        fixture
            .store
            .create_session_with_id("s1", "p1", "")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_offline_exchange_is_deterministic() {
        let f = offline_fixture();
        seed(&f).await;

        let summary = f
            .history
            .process_exchange("p1", "s1", "What is a migraine?", "A migraine is...")
            .await
            .unwrap();
        assert_eq!(summary, "q: What is a migraine?\na: A migraine is...");

        let session = f.store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.message_count(), 2);
        assert_eq!(session.messages[0].role, MessageRole::User);
        assert_eq!(session.messages[1].role, MessageRole::Assistant);
        assert_eq!(session.title, "What is a migraine");
        assert_eq!(
            f.store.all_summaries("p1").await.unwrap(),
            vec![summary.clone()]
        );
    }

    #[tokio::test]
    async fn test_exchange_uses_provider_summary_and_title() {
        let summarizer = Arc::new(ScriptedProvider::new(
            "gemini",
            vec![Ok("q: Migraine definition\na: Recurrent headaches".to_string())],
        ));
        let helper = Arc::new(ScriptedProvider::new(
            "nvidia",
            vec![Ok("Migraine Basics".to_string())],
        ));
        let f = fixture(summarizer, helper);
        seed(&f).await;

        let summary = f
            .history
            .process_exchange("p1", "s1", "What is a migraine?", "A migraine is...")
            .await
            .unwrap();
        assert_eq!(summary, "q: Migraine definition\na: Recurrent headaches");

        let session = f.store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.title, "Migraine Basics");
    }

    #[tokio::test]
    async fn test_title_is_rewritten_only_on_first_exchange() {
        let f = offline_fixture();
        seed(&f).await;

        f.history
            .process_exchange("p1", "s1", "Knee pain after running", "Rest it.")
            .await
            .unwrap();
        f.history
            .process_exchange("p1", "s1", "Should I see a doctor?", "If it persists.")
            .await
            .unwrap();

        let session = f.store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.message_count(), 4);
        assert_eq!(session.title, "Knee pain after running");
    }

    #[tokio::test]
    async fn test_unknown_session_or_subject_propagates() {
        let f = offline_fixture();
        seed(&f).await;

        let err = f
            .history
            .process_exchange("p1", "missing", "q", "a")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SessionNotFound(_)));

        let err = f
            .history
            .process_exchange("ghost", "s1", "q", "a")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SubjectNotFound(_)));
        assert_eq!(f.store.get_session("s1").await.unwrap().unwrap().message_count(), 0);
    }

    #[tokio::test]
    async fn test_foreign_session_is_rejected() {
        let f = offline_fixture();
        seed(&f).await;
        f.store.create_subject("p2", "Other").await.unwrap();
        f.history
            .process_exchange("p1", "s1", "Is my rash contagious?", "Probably not.")
            .await
            .unwrap();

        let err = f
            .history
            .process_exchange("p2", "s1", "q", "a")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SessionOwnership { .. }));
        assert_eq!(f.store.get_session("s1").await.unwrap().unwrap().message_count(), 2);
        assert!(f.store.all_summaries("p2").await.unwrap().is_empty());

        let err = f
            .history
            .get_context("p2", "s1", "rash")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SessionOwnership { .. }));
    }

    #[tokio::test]
    async fn test_empty_context_is_empty_string() {
        let f = offline_fixture();
        seed(&f).await;

        let context = f.history.get_context("p1", "s1", "anything").await.unwrap();
        assert_eq!(context, "");

        let context = f.history.get_context("nobody", "nowhere", "x").await.unwrap();
        assert_eq!(context, "");
    }

    #[tokio::test]
    async fn test_context_fuses_all_sections() {
        let f = offline_fixture();
        seed(&f).await;

        f.history
            .process_exchange("p1", "s1", "What is a migraine?", "A headache disorder.")
            .await
            .unwrap();

        // stored under the embedding of the exact question so LTM matches
        let vector = f.embeddings.embed_one("aura symptoms").await;
        f.store
            .add_summary("p1", "q: aura?\na: visual signs", Some(vector))
            .await
            .unwrap();

        let context = f.history.get_context("p1", "s1", "aura symptoms").await.unwrap();
        let sections: Vec<&str> = context.split("\n\n").collect();
        assert_eq!(sections.len(), 3);
        assert!(sections[0].starts_with(STM_HEADER));
        assert!(sections[0].contains("q: What is a migraine?"));
        assert!(sections[1].starts_with(LTM_HEADER));
        assert!(sections[1].contains("q: aura?\na: visual signs"));
        assert_eq!(
            sections[2],
            "Current conversation:\nuser: What is a migraine?\nassistant: A headache disorder."
        );
    }

    #[tokio::test]
    async fn test_relevance_filter_replaces_stm() {
        let helper = Arc::new(ScriptedProvider::new(
            "nvidia",
            vec![
                Ok("Knee Pain".to_string()),
                Ok("q: knee\na: ice".to_string()),
            ],
        ));
        let f = fixture(Arc::new(ScriptedProvider::unavailable("gemini")), helper);
        seed(&f).await;
        f.store.add_summary("p1", "q: flu\na: rest", None).await.unwrap();
        f.history
            .process_exchange("p1", "s1", "knee", "ice")
            .await
            .unwrap();

        let context = f.history.get_context("p1", "s1", "knee again").await.unwrap();
        assert!(context.starts_with("Recent relevant context:\nq: knee\na: ice\n\n"));
        assert!(!context.contains("q: flu"));
    }

    #[tokio::test]
    async fn test_search_history_text_fallback() {
        let f = offline_fixture();
        seed(&f).await;
        for (q, a) in [("Migraine aura", "visual"), ("Knee pain", "ice"), ("MIGRAINE meds", "triptans")] {
            f.history.process_exchange("p1", "s1", q, a).await.unwrap();
        }

        let hits = f.history.search_history("p1", "migraine", 5).await.unwrap();
        assert_eq!(
            hits,
            vec![
                "q: MIGRAINE meds\na: triptans".to_string(),
                "q: Migraine aura\na: visual".to_string()
            ]
        );
        assert_eq!(f.history.search_history("p1", "migraine", 1).await.unwrap().len(), 1);
        assert_eq!(f.history.medical_history("p1", 2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_start_session_uses_default_title() {
        let f = offline_fixture();
        let id = f.history.start_session("p1", None).await.unwrap();
        let sessions = f.history.sessions("p1").await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, id);
        assert_eq!(sessions[0].title, "New Chat");
    }

    #[test]
    fn test_compose_context_skips_empty_sections() {
        let stm = vec!["q: a\na: b".to_string()];
        let conversation = vec!["user: hi".to_string()];
        assert_eq!(
            compose_context(&stm, &[], &conversation),
            "Recent relevant context:\nq: a\na: b\n\nCurrent conversation:\nuser: hi"
        );
        assert_eq!(compose_context(&[], &[], &[]), "");
    }
}
