//! 外部服务接入模块
//!
//! 凭证轮换、弹性调度以及基于调度器的生成模型客户端。

pub mod chat;
pub mod dispatcher;
pub mod rotator;

pub use chat::{ChatProvider, GeminiChat, OpenAiCompatChat};
pub use dispatcher::{AuthScheme, DispatchPolicy, DispatchRequest, Dispatcher};
pub use rotator::KeyRotator;
