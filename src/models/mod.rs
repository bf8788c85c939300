//! 核心数据模型模块
//!
//! 定义记忆引擎的核心数据结构：SubjectProfile, Session, Message, MemorySummary。

pub mod session;
pub mod subject;
pub mod summary;

pub use session::{DEFAULT_SESSION_TITLE, Message, MessageRole, Session};
pub use subject::SubjectProfile;
pub use summary::{MemorySummary, ScoredSummary};
