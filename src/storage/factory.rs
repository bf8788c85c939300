//! 存储工厂模块
//!
//! 根据配置创建相应的记忆存储实例。

use std::sync::Arc;

use crate::config::config::DatabaseConfig;
use crate::error::{AppError, Result};
use crate::storage::memory::InMemoryStore;
use crate::storage::repository::MemoryStore;

#[cfg(feature = "surrealdb")]
use crate::storage::surrealdb::SurrealStore;

/// 存储工厂
pub struct StorageFactory;

impl StorageFactory {
    /// 根据配置创建存储实例
    pub async fn create(config: &DatabaseConfig) -> Result<Arc<dyn MemoryStore>> {
        match config.backend.as_str() {
            "memory" => {
                tracing::info!("Using in-memory store");
                Ok(Arc::new(InMemoryStore::new()))
            }
            "surrealdb" => Self::create_surrealdb(config).await,
            other => Err(AppError::Config(format!("unknown storage backend: {}", other))),
        }
    }

    #[cfg(feature = "surrealdb")]
    async fn create_surrealdb(config: &DatabaseConfig) -> Result<Arc<dyn MemoryStore>> {
        let store = SurrealStore::connect(config).await?;
        Ok(Arc::new(store))
    }

    #[cfg(not(feature = "surrealdb"))]
    async fn create_surrealdb(_config: &DatabaseConfig) -> Result<Arc<dyn MemoryStore>> {
        Err(AppError::Config(
            "SurrealDB feature is not enabled. Enable 'surrealdb' feature to use SurrealDB.".into(),
        ))
    }
}
