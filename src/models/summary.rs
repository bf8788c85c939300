//! 长期记忆摘要

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 一轮问答的两行摘要（`q: …` / `a: …`），写入后不可变
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySummary {
    pub id: String,
    /// 所属主体
    pub subject_id: String,
    /// 摘要文本
    pub text: String,
    pub created_at: DateTime<Utc>,
    /// 嵌入向量，仅在生成成功时存在
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl MemorySummary {
    pub fn new(subject_id: &str, text: &str, embedding: Option<Vec<f32>>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            subject_id: subject_id.to_string(),
            text: text.to_string(),
            created_at: Utc::now(),
            embedding,
        }
    }
}

/// 语义检索命中
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredSummary {
    pub text: String,
    /// 余弦相似度
    pub score: f32,
    pub created_at: DateTime<Utc>,
}
