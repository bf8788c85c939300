use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// 存储后端: "memory" 或 "surrealdb"
    pub backend: String,
    /// SurrealDB 连接地址
    pub url: String,
    /// 命名空间
    pub namespace: String,
    /// 数据库名称
    pub database: String,
    /// 用户名
    pub username: String,
    /// 密码
    pub password: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: "memory".into(),
            url: String::new(),
            namespace: "mnemed".into(),
            database: "memory".into(),
            username: "root".into(),
            password: "root".into(),
        }
    }
}

/// 单个生成模型提供方配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatProviderConfig {
    /// 是否启用
    pub enabled: bool,
    /// API 基础地址
    pub base_url: String,
    /// 模型名称
    pub model: String,
    /// 凭证环境变量前缀，例如 `GEMINI_API_` 会读取 `GEMINI_API_1` .. `GEMINI_API_5`
    pub key_prefix: String,
    /// 凭证槽位数
    pub max_slots: usize,
    /// 采样温度
    pub temperature: f32,
}

impl ChatProviderConfig {
    /// Gemini 默认配置
    pub fn gemini() -> Self {
        Self {
            enabled: true,
            base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
            model: "gemini-2.5-flash-lite".into(),
            key_prefix: "GEMINI_API_".into(),
            max_slots: 5,
            temperature: 0.0,
        }
    }

    /// NVIDIA（OpenAI 兼容接口）默认配置
    pub fn nvidia() -> Self {
        Self {
            enabled: true,
            base_url: "https://integrate.api.nvidia.com/v1".into(),
            model: "meta/llama-3.1-8b-instruct".into(),
            key_prefix: "NVIDIA_API_".into(),
            max_slots: 5,
            temperature: 0.0,
        }
    }
}

impl Default for ChatProviderConfig {
    fn default() -> Self {
        Self::nvidia()
    }
}

/// 外部服务调度配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// 主摘要 / 回答生成服务
    pub gemini: ChatProviderConfig,
    /// 次摘要 / 相关性过滤 / 标题生成服务
    pub nvidia: ChatProviderConfig,
    /// 单次调度的最大尝试次数
    pub max_attempts: u32,
    /// 单次请求超时（秒）
    pub timeout_secs: u64,
    /// 两次尝试之间的固定退避（毫秒）
    pub retry_backoff_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            gemini: ChatProviderConfig::gemini(),
            nvidia: ChatProviderConfig::nvidia(),
            max_attempts: 5,
            timeout_secs: 60,
            retry_backoff_ms: 0,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: String,
    /// 结构化日志格式
    pub structured: bool,
    /// 日志文件目录，为空时输出到 stderr
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            structured: false,
            log_dir: None,
        }
    }
}

/// 嵌入模型配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding 后端类型: "hash"、"ollama" 或 "openai"
    pub backend: String,
    /// 模型名称
    pub model_name: String,
    /// 向量维度
    pub dimension: usize,
    /// 后端服务地址
    pub url: String,
    /// 请求超时（秒）
    pub timeout_secs: u64,
    /// "openai" 后端的凭证环境变量前缀
    pub key_prefix: String,
    /// 凭证槽位数
    pub max_slots: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: "hash".into(),
            model_name: "all-MiniLM-L6-v2".into(),
            dimension: 384,
            url: "http://localhost:11434".into(),
            timeout_secs: 30,
            key_prefix: "EMBEDDING_API_".into(),
            max_slots: 5,
        }
    }
}

/// 记忆编排配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// 短期记忆窗口大小
    pub stm_size: usize,
    /// 长期记忆语义检索条数
    pub ltm_top_k: usize,
    /// 语义检索相似度下限
    pub similarity_floor: f32,
    /// 当前会话窗口消息数
    pub session_window: usize,
    /// 自动标题的最大词数（会被限制在 3..=7）
    pub title_max_words: usize,
    /// 会话默认标题
    pub default_title: String,
    /// 列出会话时的上限
    pub max_sessions: usize,
    /// 病历摘要默认条数
    pub history_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            stm_size: 3,
            ltm_top_k: 2,
            similarity_floor: 0.5,
            session_window: 10,
            title_max_words: 5,
            default_title: crate::models::session::DEFAULT_SESSION_TITLE.into(),
            max_sessions: 20,
            history_limit: 20,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// 数据库配置
    pub database: DatabaseConfig,
    /// 外部服务配置
    pub provider: ProviderConfig,
    /// 嵌入模型配置
    pub embedding: EmbeddingConfig,
    /// 记忆编排配置
    pub memory: MemoryConfig,
    /// 日志配置
    pub logging: LoggingConfig,
    /// 环境
    pub environment: String,
}

impl AppConfig {
    /// 创建开发环境配置
    pub fn development() -> Self {
        Self {
            logging: LoggingConfig {
                level: "debug".into(),
                structured: false,
                log_dir: None,
            },
            environment: "development".into(),
            ..Self::default()
        }
    }

    /// 创建生产环境配置
    pub fn production() -> Self {
        let mut config = Self::development();
        config.environment = "production".into();
        config.logging.level = "info".into();
        config.logging.structured = true;
        config.logging.log_dir = Some(PathBuf::from("./logs"));
        config
    }

    /// 离线配置：禁用所有外部服务，只使用确定性回退
    pub fn offline() -> Self {
        let mut config = Self::development();
        config.provider.gemini.enabled = false;
        config.provider.nvidia.enabled = false;
        config.embedding.backend = "hash".into();
        config
    }
}
