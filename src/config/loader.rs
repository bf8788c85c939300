use crate::config::config::AppConfig;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::path::{Path, PathBuf};

/// 环境变量前缀，嵌套字段使用 `__` 分隔，例如 `MNEMED_MEMORY__STM_SIZE=5`
pub const ENV_PREFIX: &str = "MNEMED_";

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从默认路径加载配置
    ///
    /// 合并顺序：
    /// 1. 内置默认值
    /// 2. ./mnemed.toml
    /// 3. 环境变量
    pub fn load() -> Result<AppConfig, figment::Error> {
        Self::load_from(default_config_path())
    }

    /// 从指定路径加载配置
    pub fn load_from(path: impl AsRef<Path>) -> Result<AppConfig, figment::Error> {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }

    /// 验证配置
    pub fn validate(config: &AppConfig) -> Result<(), ConfigValidationError> {
        if config.embedding.dimension == 0 {
            return Err(ConfigValidationError::InvalidDimension);
        }

        if config.provider.max_attempts == 0 {
            return Err(ConfigValidationError::InvalidAttempts);
        }

        if !(-1.0..=1.0).contains(&config.memory.similarity_floor) {
            return Err(ConfigValidationError::InvalidSimilarityFloor(
                config.memory.similarity_floor,
            ));
        }

        if config.memory.stm_size == 0 {
            return Err(ConfigValidationError::InvalidStmSize);
        }

        match config.database.backend.as_str() {
            "memory" => {}
            "surrealdb" => {
                if config.database.url.is_empty() {
                    return Err(ConfigValidationError::MissingDatabaseUrl);
                }
            }
            other => return Err(ConfigValidationError::UnknownBackend(other.to_string())),
        }

        Ok(())
    }
}

/// 配置验证错误
#[derive(thiserror::Error, Debug)]
pub enum ConfigValidationError {
    #[error("数据库连接 URL 未配置")]
    MissingDatabaseUrl,

    #[error("未知的存储后端: {0}")]
    UnknownBackend(String),

    #[error("向量维度无效，必须大于 0")]
    InvalidDimension,

    #[error("最大尝试次数无效，必须大于 0")]
    InvalidAttempts,

    #[error("相似度下限必须位于 [-1, 1]，当前为 {0}")]
    InvalidSimilarityFloor(f32),

    #[error("短期记忆窗口必须大于 0")]
    InvalidStmSize,
}

/// 获取默认配置文件路径
pub fn default_config_path() -> PathBuf {
    PathBuf::from("mnemed.toml")
}
