//! 错误处理模块
//!
//! 定义应用程序的错误类型和错误处理逻辑。
//!
//! 外部服务（生成模型、嵌入模型）的失败在编排层被本地降级吸收，
//! 只有存储层的错误会作为硬错误传递给调用方。

use thiserror::Error;

/// 应用程序错误类型
#[derive(Error, Debug)]
pub enum AppError {
    /// 所有凭证轮换与重试均已耗尽，或没有可用凭证
    #[error("外部服务不可用: {0}")]
    ProviderUnavailable(String),

    /// 会话不存在
    #[error("会话不存在: {0}")]
    SessionNotFound(String),

    /// 记忆主体不存在
    #[error("记忆主体不存在: {0}")]
    SubjectNotFound(String),

    /// 会话不属于该主体
    #[error("会话 {session} 不属于主体 {subject}")]
    SessionOwnership { session: String, subject: String },

    /// 模型输出不符合约定格式（仅用于触发降级链）
    #[error("模型输出格式错误: {0}")]
    MalformedProviderOutput(String),

    /// 存储连接失败
    #[error("存储不可用: {0}")]
    StoreUnavailable(String),

    /// 数据库错误
    #[error("数据库错误: {0}")]
    Database(String),

    /// 参数验证错误
    #[error("参数验证失败: {0}")]
    Validation(String),

    /// 超时错误
    #[error("操作超时: {0}")]
    Timeout(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    Serialization(String),

    /// 嵌入模型错误
    #[error("嵌入模型错误: {0}")]
    Embedding(String),

    /// HTTP 请求错误
    #[error("HTTP 请求错误: {0}")]
    Http(String),

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(String),
}

impl AppError {
    /// 是否为不可降级的存储层错误
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::StoreUnavailable(_))
    }

    /// 错误代码，用于结构化日志
    pub fn code(&self) -> &'static str {
        match self {
            AppError::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            AppError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            AppError::SubjectNotFound(_) => "SUBJECT_NOT_FOUND",
            AppError::SessionOwnership { .. } => "SESSION_OWNERSHIP",
            AppError::MalformedProviderOutput(_) => "MALFORMED_PROVIDER_OUTPUT",
            AppError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Timeout(_) => "TIMEOUT",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Embedding(_) => "EMBEDDING_ERROR",
            AppError::Http(_) => "HTTP_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::Io(_) => "IO_ERROR",
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Serialization(e.to_string())
    }
}

impl From<figment::Error> for AppError {
    fn from(e: figment::Error) -> Self {
        AppError::Config(e.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AppError::Timeout(e.to_string())
        } else {
            AppError::Http(e.to_string())
        }
    }
}

/// 连接类错误（传输中断、连接未建立）视为存储不可用，其余为普通数据库错误
#[cfg(feature = "surrealdb")]
impl From<surrealdb::Error> for AppError {
    fn from(e: surrealdb::Error) -> Self {
        use surrealdb::error::Api;

        match e {
            surrealdb::Error::Api(Api::Http(_) | Api::Ws(_) | Api::ConnectionUninitialised) => {
                AppError::StoreUnavailable(e.to_string())
            }
            other => AppError::Database(other.to_string()),
        }
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_store_unavailable_is_fatal() {
        assert!(AppError::StoreUnavailable("down".into()).is_fatal());
        assert!(!AppError::SessionNotFound("s1".into()).is_fatal());
        assert!(!AppError::ProviderUnavailable("gemini".into()).is_fatal());
    }

    #[test]
    fn test_error_display_carries_detail() {
        let err = AppError::SessionNotFound("abc".to_string());
        assert_eq!(err.to_string(), "会话不存在: abc");
        assert_eq!(err.code(), "SESSION_NOT_FOUND");
    }

    #[cfg(feature = "surrealdb")]
    #[test]
    fn test_surrealdb_connection_errors_are_fatal() {
        use surrealdb::error::Api;

        let lost: AppError = surrealdb::Error::Api(Api::Ws("connection reset".into())).into();
        assert!(matches!(lost, AppError::StoreUnavailable(_)));
        assert!(lost.is_fatal());

        let uninit: AppError = surrealdb::Error::Api(Api::ConnectionUninitialised).into();
        assert!(uninit.is_fatal());

        let query: AppError = surrealdb::Error::Api(Api::Query("parse error".into())).into();
        assert!(matches!(query, AppError::Database(_)));
        assert!(!query.is_fatal());
    }

    #[test]
    fn test_session_ownership_error() {
        let err = AppError::SessionOwnership {
            session: "s1".into(),
            subject: "p2".into(),
        };
        assert_eq!(err.to_string(), "会话 s1 不属于主体 p2");
        assert_eq!(err.code(), "SESSION_OWNERSHIP");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        let err: AppError = io.into();
        assert!(matches!(err, AppError::Io(_)));
    }
}
