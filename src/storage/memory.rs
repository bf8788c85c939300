//! 内存存储后端
//!
//! 使用 DashMap 保存主体、会话与摘要日志。摘要按写入顺序追加，
//! 读取时倒序返回；短期记忆只是 `recent_summaries` 的查询形态，不单独缓存。

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{AppError, Result};
use crate::index::vector::cosine_similarity;
use crate::models::{MemorySummary, Message, MessageRole, ScoredSummary, Session, SubjectProfile};
use crate::storage::repository::{MemoryStore, rank_summaries};

/// 内存记忆存储
#[derive(Debug, Default)]
pub struct InMemoryStore {
    subjects: DashMap<String, SubjectProfile>,
    sessions: DashMap<String, Session>,
    summaries: DashMap<String, Vec<MemorySummary>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 主体的摘要条数
    pub fn summary_count(&self, subject_id: &str) -> usize {
        self.summaries
            .get(subject_id)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn create_subject(&self, id: &str, display_name: &str) -> Result<SubjectProfile> {
        if id.trim().is_empty() {
            return Err(AppError::Validation("subject id must not be empty".into()));
        }

        let profile = self
            .subjects
            .entry(id.to_string())
            .or_insert_with(|| {
                tracing::info!("Created subject: {}", id);
                SubjectProfile::new(id, display_name)
            })
            .value()
            .clone();
        Ok(profile)
    }

    async fn get_subject(&self, id: &str) -> Result<Option<SubjectProfile>> {
        Ok(self.subjects.get_mut(id).map(|mut profile| {
            profile.touch();
            profile.value().clone()
        }))
    }

    async fn set_preference(
        &self,
        subject_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        let mut profile = self
            .subjects
            .get_mut(subject_id)
            .ok_or_else(|| AppError::SubjectNotFound(subject_id.to_string()))?;
        profile.preferences.insert(key.to_string(), value);
        Ok(())
    }

    async fn create_session(&self, subject_id: &str, title: &str) -> Result<String> {
        let session = Session::new(subject_id, title);
        let id = session.id.clone();
        self.sessions.insert(id.clone(), session);
        tracing::debug!("Created session {} for subject {}", id, subject_id);
        Ok(id)
    }

    async fn create_session_with_id(&self, id: &str, subject_id: &str, title: &str) -> Result<()> {
        if id.trim().is_empty() {
            return Err(AppError::Validation("session id must not be empty".into()));
        }

        match self.sessions.entry(id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(AppError::Validation(format!(
                "Session already exists: {}",
                id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Session::with_id(id, subject_id, title));
                Ok(())
            }
        }
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.get(id).map(|s| s.value().clone()))
    }

    async fn list_sessions(&self, subject_id: &str, limit: usize) -> Result<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .filter(|entry| entry.subject_id == subject_id)
            .map(|entry| entry.value().clone())
            .collect();

        sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        sessions.truncate(limit);
        Ok(sessions)
    }

    async fn append_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<Message> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;

        let message = Message::new(role, content, metadata);
        session.push(message.clone());
        Ok(message)
    }

    async fn rename_session(&self, session_id: &str, title: &str) -> Result<()> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;

        if session.title != title {
            session.title = title.to_string();
            session.touch();
        }
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool> {
        Ok(self.sessions.remove(session_id).is_some())
    }

    async fn add_summary(
        &self,
        subject_id: &str,
        text: &str,
        embedding: Option<Vec<f32>>,
    ) -> Result<()> {
        if !self.subjects.contains_key(subject_id) {
            return Err(AppError::SubjectNotFound(subject_id.to_string()));
        }

        self.summaries
            .entry(subject_id.to_string())
            .or_default()
            .push(MemorySummary::new(subject_id, text, embedding));
        Ok(())
    }

    async fn recent_summaries(&self, subject_id: &str, n: usize) -> Result<Vec<String>> {
        Ok(self
            .summaries
            .get(subject_id)
            .map(|entries| entries.iter().rev().take(n).map(|s| s.text.clone()).collect())
            .unwrap_or_default())
    }

    async fn all_summaries(&self, subject_id: &str) -> Result<Vec<String>> {
        Ok(self
            .summaries
            .get(subject_id)
            .map(|entries| entries.iter().rev().map(|s| s.text.clone()).collect())
            .unwrap_or_default())
    }

    async fn semantic_summaries(
        &self,
        subject_id: &str,
        query: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<ScoredSummary>> {
        let scored: Vec<ScoredSummary> = self
            .summaries
            .get(subject_id)
            .map(|entries| {
                entries
                    .iter()
                    .rev()
                    .filter_map(|summary| {
                        let embedding = summary.embedding.as_ref()?;
                        let score = cosine_similarity(query, embedding);
                        (score >= min_similarity).then(|| ScoredSummary {
                            text: summary.text.clone(),
                            score,
                            created_at: summary.created_at,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(rank_summaries(scored, limit))
    }
}
