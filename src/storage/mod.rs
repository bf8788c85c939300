//! 存储层模块
//!
//! 提供分层记忆的持久化服务，默认使用内存后端，可选 SurrealDB。

#[cfg(feature = "surrealdb")]
pub mod surrealdb;

pub mod factory;
pub mod memory;
pub mod repository;

pub use factory::StorageFactory;
pub use memory::InMemoryStore;
pub use repository::MemoryStore;
