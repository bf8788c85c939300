//! Mnemed - 医疗对话机器人的对话记忆与弹性检索引擎
//!
//! 把每轮问答压缩成摘要，分层保存为短期记忆与带向量的长期记忆，
//! 并为下一轮组装融合上下文。外部生成与嵌入服务通过带凭证轮换的调度器访问，
//! 任何外部故障都降级为确定性回退。

pub mod config;
pub mod error;
pub mod index;
pub mod models;
pub mod observability;
pub mod provider;
pub mod services;
pub mod state;
pub mod storage;

pub use error::{AppError, Result};
pub use state::AppState;
