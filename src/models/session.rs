use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// 会话默认标题
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

/// 消息角色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// 用户消息
    User,
    /// 助手回复
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 会话消息，会话内只追加不修改
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// 消息唯一标识
    pub id: String,
    /// 角色
    pub role: MessageRole,
    /// 内容
    pub content: String,
    /// 时间戳
    pub timestamp: DateTime<Utc>,
    /// 自由格式元数据
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Message {
    /// 创建新消息
    pub fn new(
        role: MessageRole,
        content: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
            metadata,
        }
    }

    /// 渲染为 `role: content`
    pub fn render(&self) -> String {
        format!("{}: {}", self.role, self.content)
    }
}

/// 会话实体
///
/// 一条对话线程。标题在首轮问答（恰好两条消息）之后自动改写一次，
/// 其后只允许显式重命名。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// 会话唯一标识
    pub id: String,

    /// 所属记忆主体
    pub subject_id: String,

    /// 会话标题
    pub title: String,

    /// 会话创建时间
    pub created_at: DateTime<Utc>,

    /// 最后活跃时间
    pub last_activity: DateTime<Utc>,

    /// 消息列表
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Session {
    /// 创建新会话
    pub fn new(subject_id: &str, title: &str) -> Self {
        Self::with_id(&Uuid::new_v4().to_string(), subject_id, title)
    }

    /// 使用指定 ID 创建会话
    pub fn with_id(id: &str, subject_id: &str, title: &str) -> Self {
        let now = Utc::now();
        let title = if title.trim().is_empty() {
            DEFAULT_SESSION_TITLE
        } else {
            title
        };
        Self {
            id: id.to_string(),
            subject_id: subject_id.to_string(),
            title: title.to_string(),
            created_at: now,
            last_activity: now,
            messages: Vec::new(),
        }
    }

    /// 更新最后活跃时间
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// 追加消息
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.touch();
    }

    /// 最近 `limit` 条消息，按时间正序
    pub fn recent_messages(&self, limit: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(limit);
        &self.messages[start..]
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_title_defaults_to_placeholder() {
        let session = Session::new("p1", "  ");
        assert_eq!(session.title, DEFAULT_SESSION_TITLE);
        assert_eq!(session.subject_id, "p1");
        assert!(session.messages.is_empty());
    }

    #[test]
    fn test_recent_messages_window() {
        let mut session = Session::with_id("s1", "p1", "t");
        for i in 0..12 {
            session.push(Message::new(
                MessageRole::User,
                &format!("m{}", i),
                HashMap::new(),
            ));
        }

        let window = session.recent_messages(10);
        assert_eq!(window.len(), 10);
        assert_eq!(window[0].content, "m2");
        assert_eq!(window[9].content, "m11");
        assert_eq!(session.recent_messages(50).len(), 12);
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&MessageRole::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
        let message = Message::new(MessageRole::User, "hi", HashMap::new());
        assert_eq!(message.render(), "user: hi");
    }
}
