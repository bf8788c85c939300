//! 记忆主体（用户或患者）档案

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 未设置角色时的默认值
pub const UNKNOWN_ROLE: &str = "Unknown";

/// 记忆主体档案
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectProfile {
    /// 主体标识（不透明字符串）
    pub id: String,
    /// 显示名称
    pub display_name: String,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 最近一次被读取的时间
    pub last_seen: DateTime<Utc>,
    /// 偏好设置
    #[serde(default)]
    pub preferences: HashMap<String, serde_json::Value>,
}

impl SubjectProfile {
    pub fn new(id: &str, display_name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            created_at: now,
            last_seen: now,
            preferences: HashMap::new(),
        }
    }

    /// 更新最近访问时间
    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
    }

    /// 用户角色，例如 "Physician"、"Patient"
    pub fn role(&self) -> &str {
        self.preference_str("role").unwrap_or(UNKNOWN_ROLE)
    }

    /// 专科方向
    pub fn specialty(&self) -> Option<&str> {
        self.preference_str("specialty")
    }

    fn preference_str(&self, key: &str) -> Option<&str> {
        self.preferences
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
    }
}
