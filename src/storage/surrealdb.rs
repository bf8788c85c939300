//! SurrealDB 存储后端
//!
//! 记录以 `subject` / `session` / `summary` 三张表保存。排序依赖数值时间戳字段，
//! 避免字符串时间比较的歧义；嵌入过滤与相似度计算在进程内完成。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::{
    Surreal,
    engine::any::{Any, connect},
    opt::auth::Root,
};

use crate::config::config::DatabaseConfig;
use crate::error::{AppError, Result};
use crate::index::vector::cosine_similarity;
use crate::models::{Message, MessageRole, ScoredSummary, Session, SubjectProfile};
use crate::storage::repository::{MemoryStore, rank_summaries};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SubjectRow {
    subject_id: String,
    display_name: String,
    created_at: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    #[serde(default)]
    preferences: HashMap<String, serde_json::Value>,
}

impl From<SubjectRow> for SubjectProfile {
    fn from(row: SubjectRow) -> Self {
        Self {
            id: row.subject_id,
            display_name: row.display_name,
            created_at: row.created_at,
            last_seen: row.last_seen,
            preferences: row.preferences,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionRow {
    session_id: String,
    subject_id: String,
    title: String,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    last_activity_ms: i64,
    #[serde(default)]
    messages: Vec<Message>,
}

impl From<Session> for SessionRow {
    fn from(session: Session) -> Self {
        Self {
            last_activity_ms: session.last_activity.timestamp_millis(),
            session_id: session.id,
            subject_id: session.subject_id,
            title: session.title,
            created_at: session.created_at,
            last_activity: session.last_activity,
            messages: session.messages,
        }
    }
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Self {
            id: row.session_id,
            subject_id: row.subject_id,
            title: row.title,
            created_at: row.created_at,
            last_activity: row.last_activity,
            messages: row.messages,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SummaryRow {
    subject_id: String,
    text: String,
    created_at: DateTime<Utc>,
    created_ns: i64,
    embedding: Option<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct SummaryText {
    text: String,
}

/// SurrealDB 记忆存储
#[derive(Clone)]
pub struct SurrealStore {
    db: Surreal<Any>,
}

impl SurrealStore {
    /// 建立连接，连接或认证失败返回 `StoreUnavailable`
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let unavailable = |e: surrealdb::Error| AppError::StoreUnavailable(e.to_string());

        let db: Surreal<Any> = connect(config.url.as_str()).await.map_err(unavailable)?;

        if !config.url.starts_with("mem://") {
            db.signin(Root {
                username: &config.username,
                password: &config.password,
            })
            .await
            .map_err(unavailable)?;
        }

        db.use_ns(config.namespace.as_str())
            .use_db(config.database.as_str())
            .await
            .map_err(unavailable)?;

        tracing::info!(
            "Connected to SurrealDB at {} ({}/{})",
            config.url,
            config.namespace,
            config.database
        );
        Ok(Self { db })
    }

    async fn load_subject(&self, id: &str) -> Result<Option<SubjectRow>> {
        let row: Option<SubjectRow> = self
            .db
            .query("SELECT * FROM type::thing('subject', $id)")
            .bind(("id", id.to_string()))
            .await?
            .take(0)?;
        Ok(row)
    }

    async fn load_session(&self, id: &str) -> Result<Option<SessionRow>> {
        let row: Option<SessionRow> = self
            .db
            .query("SELECT * FROM type::thing('session', $id)")
            .bind(("id", id.to_string()))
            .await?
            .take(0)?;
        Ok(row)
    }

    async fn require_session(&self, id: &str) -> Result<()> {
        match self.load_session(id).await? {
            Some(_) => Ok(()),
            None => Err(AppError::SessionNotFound(id.to_string())),
        }
    }
}

#[async_trait]
impl MemoryStore for SurrealStore {
    async fn create_subject(&self, id: &str, display_name: &str) -> Result<SubjectProfile> {
        if id.trim().is_empty() {
            return Err(AppError::Validation("subject id must not be empty".into()));
        }

        if let Some(existing) = self.load_subject(id).await? {
            return Ok(existing.into());
        }

        let profile = SubjectProfile::new(id, display_name);
        let row = SubjectRow {
            subject_id: profile.id.clone(),
            display_name: profile.display_name.clone(),
            created_at: profile.created_at,
            last_seen: profile.last_seen,
            preferences: HashMap::new(),
        };
        self.db
            .query("CREATE type::thing('subject', $id) CONTENT $row")
            .bind(("id", id.to_string()))
            .bind(("row", row))
            .await?
            .check()?;

        tracing::info!("Created subject: {}", id);
        Ok(profile)
    }

    async fn get_subject(&self, id: &str) -> Result<Option<SubjectProfile>> {
        if self.load_subject(id).await?.is_none() {
            return Ok(None);
        }

        let updated: Option<SubjectRow> = self
            .db
            .query("UPDATE type::thing('subject', $id) SET last_seen = $now RETURN AFTER")
            .bind(("id", id.to_string()))
            .bind(("now", Utc::now()))
            .await?
            .take(0)?;
        Ok(updated.map(Into::into))
    }

    async fn set_preference(
        &self,
        subject_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        if self.load_subject(subject_id).await?.is_none() {
            return Err(AppError::SubjectNotFound(subject_id.to_string()));
        }

        let patch = serde_json::json!({ "preferences": { key: value } });
        self.db
            .query("UPDATE type::thing('subject', $id) MERGE $patch")
            .bind(("id", subject_id.to_string()))
            .bind(("patch", patch))
            .await?
            .check()?;
        Ok(())
    }

    async fn create_session(&self, subject_id: &str, title: &str) -> Result<String> {
        let session = Session::new(subject_id, title);
        let id = session.id.clone();
        self.db
            .query("CREATE type::thing('session', $id) CONTENT $row")
            .bind(("id", id.clone()))
            .bind(("row", SessionRow::from(session)))
            .await?
            .check()?;

        tracing::debug!("Created session {} for subject {}", id, subject_id);
        Ok(id)
    }

    async fn create_session_with_id(&self, id: &str, subject_id: &str, title: &str) -> Result<()> {
        if id.trim().is_empty() {
            return Err(AppError::Validation("session id must not be empty".into()));
        }
        if self.load_session(id).await?.is_some() {
            return Err(AppError::Validation(format!("Session already exists: {}", id)));
        }

        self.db
            .query("CREATE type::thing('session', $id) CONTENT $row")
            .bind(("id", id.to_string()))
            .bind(("row", SessionRow::from(Session::with_id(id, subject_id, title))))
            .await?
            .check()?;
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.load_session(id).await?.map(Into::into))
    }

    async fn list_sessions(&self, subject_id: &str, limit: usize) -> Result<Vec<Session>> {
        let query = "
            SELECT * FROM session
            WHERE subject_id = $subject_id
            ORDER BY last_activity_ms DESC
            LIMIT $limit
        ";
        let rows: Vec<SessionRow> = self
            .db
            .query(query)
            .bind(("subject_id", subject_id.to_string()))
            .bind(("limit", limit as i64))
            .await?
            .take(0)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn append_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<Message> {
        self.require_session(session_id).await?;

        let message = Message::new(role, content, metadata);
        let now = Utc::now();
        let query = "
            UPDATE type::thing('session', $id) SET
                messages += $message,
                last_activity = $now,
                last_activity_ms = $now_ms
        ";
        self.db
            .query(query)
            .bind(("id", session_id.to_string()))
            .bind(("message", message.clone()))
            .bind(("now", now))
            .bind(("now_ms", now.timestamp_millis()))
            .await?
            .check()?;
        Ok(message)
    }

    async fn rename_session(&self, session_id: &str, title: &str) -> Result<()> {
        let Some(current) = self.load_session(session_id).await? else {
            return Err(AppError::SessionNotFound(session_id.to_string()));
        };
        if current.title == title {
            return Ok(());
        }

        let now = Utc::now();
        self.db
            .query(
                "UPDATE type::thing('session', $id) SET title = $title, last_activity = $now, last_activity_ms = $now_ms",
            )
            .bind(("id", session_id.to_string()))
            .bind(("title", title.to_string()))
            .bind(("now", now))
            .bind(("now_ms", now.timestamp_millis()))
            .await?
            .check()?;
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let deleted: Vec<SessionRow> = self
            .db
            .query("DELETE type::thing('session', $id) RETURN BEFORE")
            .bind(("id", session_id.to_string()))
            .await?
            .take(0)?;
        Ok(!deleted.is_empty())
    }

    async fn add_summary(
        &self,
        subject_id: &str,
        text: &str,
        embedding: Option<Vec<f32>>,
    ) -> Result<()> {
        if self.load_subject(subject_id).await?.is_none() {
            return Err(AppError::SubjectNotFound(subject_id.to_string()));
        }

        let now = Utc::now();
        let row = SummaryRow {
            subject_id: subject_id.to_string(),
            text: text.to_string(),
            created_at: now,
            created_ns: now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp_micros()),
            embedding,
        };
        self.db
            .query("CREATE summary CONTENT $row")
            .bind(("row", row))
            .await?
            .check()?;
        Ok(())
    }

    async fn recent_summaries(&self, subject_id: &str, n: usize) -> Result<Vec<String>> {
        let query = "
            SELECT text, created_ns FROM summary
            WHERE subject_id = $subject_id
            ORDER BY created_ns DESC
            LIMIT $limit
        ";
        let rows: Vec<SummaryText> = self
            .db
            .query(query)
            .bind(("subject_id", subject_id.to_string()))
            .bind(("limit", n as i64))
            .await?
            .take(0)?;
        Ok(rows.into_iter().map(|r| r.text).collect())
    }

    async fn all_summaries(&self, subject_id: &str) -> Result<Vec<String>> {
        let query = "
            SELECT text, created_ns FROM summary
            WHERE subject_id = $subject_id
            ORDER BY created_ns DESC
        ";
        let rows: Vec<SummaryText> = self
            .db
            .query(query)
            .bind(("subject_id", subject_id.to_string()))
            .await?
            .take(0)?;
        Ok(rows.into_iter().map(|r| r.text).collect())
    }

    async fn semantic_summaries(
        &self,
        subject_id: &str,
        query: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<ScoredSummary>> {
        let rows: Vec<SummaryRow> = self
            .db
            .query("SELECT * FROM summary WHERE subject_id = $subject_id ORDER BY created_ns DESC")
            .bind(("subject_id", subject_id.to_string()))
            .await?
            .take(0)?;

        let scored = rows
            .into_iter()
            .filter_map(|row| {
                let score = cosine_similarity(query, row.embedding.as_ref()?);
                (score >= min_similarity).then(|| ScoredSummary {
                    text: row.text,
                    score,
                    created_at: row.created_at,
                })
            })
            .collect();

        Ok(rank_summaries(scored, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SurrealStore {
        let config = DatabaseConfig {
            backend: "surrealdb".into(),
            url: "mem://".into(),
            ..DatabaseConfig::default()
        };
        SurrealStore::connect(&config).await.unwrap()
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let store = memory_store().await;
        store.create_subject("p1", "Patient").await.unwrap();
        store.create_session_with_id("s1", "p1", "").await.unwrap();

        store
            .append_message("s1", MessageRole::User, "hi", HashMap::new())
            .await
            .unwrap();
        store
            .append_message("s1", MessageRole::Assistant, "hello", HashMap::new())
            .await
            .unwrap();
        store.rename_session("s1", "Greeting").await.unwrap();

        let session = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.message_count(), 2);
        assert_eq!(session.title, "Greeting");
        assert_eq!(session.messages[0].role, MessageRole::User);

        assert!(matches!(
            store.append_message("ghost", MessageRole::User, "x", HashMap::new()).await,
            Err(AppError::SessionNotFound(_))
        ));
        assert!(store.delete_session("s1").await.unwrap());
    }

    #[tokio::test]
    async fn test_summaries_order_and_search() {
        let store = memory_store().await;
        store.create_subject("p1", "Patient").await.unwrap();
        store.add_summary("p1", "first", Some(vec![0.0, 1.0])).await.unwrap();
        store.add_summary("p1", "second", Some(vec![1.0, 0.0])).await.unwrap();
        store.add_summary("p1", "third", None).await.unwrap();

        let recent = store.recent_summaries("p1", 2).await.unwrap();
        assert_eq!(recent, vec!["third".to_string(), "second".to_string()]);

        let hits = store
            .semantic_summaries("p1", &[1.0, 0.0], 2, 0.5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "second");

        assert!(matches!(
            store.add_summary("ghost", "x", None).await,
            Err(AppError::SubjectNotFound(_))
        ));
    }
}
