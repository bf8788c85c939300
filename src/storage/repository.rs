use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Message, MessageRole, ScoredSummary, Session, SubjectProfile};

/// 分层记忆存储
///
/// 以主体为键保存：短期记忆（最近 N 条摘要，按查询截取）、
/// 长期记忆（全部摘要及可选嵌入）、会话消息以及主体档案。
/// 所有返回的摘要列表均按时间倒序（最新在前）。
#[async_trait]
pub trait MemoryStore: Send + Sync {
    // === 主体档案 ===

    /// 创建主体，已存在时返回现有档案
    async fn create_subject(&self, id: &str, display_name: &str) -> Result<SubjectProfile>;

    /// 获取主体，每次读取都会刷新 `last_seen`
    async fn get_subject(&self, id: &str) -> Result<Option<SubjectProfile>>;

    /// 设置偏好
    async fn set_preference(&self, subject_id: &str, key: &str, value: serde_json::Value)
    -> Result<()>;

    // === 会话 ===

    /// 创建会话，返回会话 ID
    async fn create_session(&self, subject_id: &str, title: &str) -> Result<String>;

    /// 使用调用方给定的 ID 创建会话
    async fn create_session_with_id(&self, id: &str, subject_id: &str, title: &str) -> Result<()>;

    async fn get_session(&self, id: &str) -> Result<Option<Session>>;

    /// 按最后活跃时间倒序列出主体的会话
    async fn list_sessions(&self, subject_id: &str, limit: usize) -> Result<Vec<Session>>;

    /// 追加消息，会话不存在时返回 `SessionNotFound`
    async fn append_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<Message>;

    /// 重命名会话，会话不存在时返回 `SessionNotFound`
    async fn rename_session(&self, session_id: &str, title: &str) -> Result<()>;

    async fn delete_session(&self, session_id: &str) -> Result<bool>;

    // === 摘要日志 ===

    /// 追加摘要，主体不存在时返回 `SubjectNotFound`
    async fn add_summary(
        &self,
        subject_id: &str,
        text: &str,
        embedding: Option<Vec<f32>>,
    ) -> Result<()>;

    /// 最近 `n` 条摘要
    async fn recent_summaries(&self, subject_id: &str, n: usize) -> Result<Vec<String>>;

    /// 全部摘要
    async fn all_summaries(&self, subject_id: &str) -> Result<Vec<String>>;

    /// 在带嵌入的摘要中做相似度检索，返回得分不低于 `min_similarity` 的前 `limit` 条
    async fn semantic_summaries(
        &self,
        subject_id: &str,
        query: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<ScoredSummary>>;
}

/// 对已打分的摘要排序截断，存储后端共用
pub(crate) fn rank_summaries(mut scored: Vec<ScoredSummary>, limit: usize) -> Vec<ScoredSummary> {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(limit);
    scored
}
