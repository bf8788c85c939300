//! 弹性调度器
//!
//! 对外部服务的每一次调用都经过这里：使用当前凭证发送请求，
//! 遇到鉴权失败、限流、5xx 以及任何其他失败时轮换凭证并重试，
//! 尝试次数有上限，耗尽后返回 `ProviderUnavailable`。
//! 调度器不关心提示词内容，摘要、嵌入与回答生成共用同一实现。

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::config::config::ProviderConfig;
use crate::error::{AppError, Result};
use crate::provider::rotator::{KeyRotator, mask_key};

/// 凭证放置方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// 自定义请求头，例如 Gemini 的 `x-goog-api-key`
    Header(String),
}

/// 一次调度请求（POST JSON）
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub url: String,
    pub body: Value,
}

impl DispatchRequest {
    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self {
            url: url.into(),
            body,
        }
    }
}

/// 重试策略
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    /// 最大尝试次数
    pub max_attempts: u32,
    /// 单次请求超时
    pub timeout: Duration,
    /// 两次尝试之间的固定等待
    pub backoff: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            timeout: Duration::from_secs(60),
            backoff: Duration::ZERO,
        }
    }
}

impl DispatchPolicy {
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// 单次尝试的失败分类
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchFailure {
    #[error("credential rejected with status {0}")]
    Auth(u16),
    #[error("rate limited")]
    RateLimited,
    #[error("server error with status {0}")]
    Server(u16),
    #[error("request rejected with status {0}")]
    Rejected(u16),
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("undecodable response body: {0}")]
    Decode(String),
}

impl DispatchFailure {
    /// 按 HTTP 状态码分类
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => DispatchFailure::Auth(status),
            429 => DispatchFailure::RateLimited,
            500..=599 => DispatchFailure::Server(status),
            other => DispatchFailure::Rejected(other),
        }
    }

    /// 鉴权、限流、5xx 与超时属于典型的瞬时故障
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DispatchFailure::Auth(_)
                | DispatchFailure::RateLimited
                | DispatchFailure::Server(_)
                | DispatchFailure::Timeout
        )
    }
}

impl From<reqwest::Error> for DispatchFailure {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DispatchFailure::Timeout
        } else {
            DispatchFailure::Transport(e.to_string())
        }
    }
}

/// 带凭证轮换的调度器
pub struct Dispatcher {
    client: reqwest::Client,
    rotator: Arc<KeyRotator>,
    auth: AuthScheme,
    policy: DispatchPolicy,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("provider", &self.rotator.name())
            .field("credentials", &self.rotator.len())
            .field("auth", &self.auth)
            .field("policy", &self.policy)
            .finish()
    }
}

impl Dispatcher {
    pub fn new(rotator: Arc<KeyRotator>, auth: AuthScheme, policy: DispatchPolicy) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(policy.timeout).build()?;

        Ok(Self {
            client,
            rotator,
            auth,
            policy,
        })
    }

    pub fn name(&self) -> &str {
        self.rotator.name()
    }

    pub fn rotator(&self) -> &Arc<KeyRotator> {
        &self.rotator
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    /// 是否至少有一个凭证
    pub fn has_credentials(&self) -> bool {
        !self.rotator.is_empty()
    }

    /// 发送请求，失败时轮换凭证重试
    ///
    /// 成功后不回滚轮换位置。轮换以本次尝试读到的位置为条件，
    /// 其他调用方已经越过该凭证时不再重复前进。
    pub async fn dispatch(&self, request: &DispatchRequest) -> Result<Value> {
        if self.rotator.is_empty() {
            return Err(AppError::ProviderUnavailable(format!(
                "{}: no credentials configured",
                self.name()
            )));
        }

        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_failure: Option<DispatchFailure> = None;

        for attempt in 1..=max_attempts {
            let Some((observed, key)) = self.rotator.current_with_position() else {
                break;
            };

            match self.attempt(request, key).await {
                Ok(value) => {
                    tracing::debug!(
                        "{} request to {} succeeded on attempt {}/{}",
                        self.name(),
                        request.url,
                        attempt,
                        max_attempts
                    );
                    return Ok(value);
                }
                Err(failure) => {
                    tracing::warn!(
                        "{} attempt {}/{} with key {} failed ({}): {}; rotating",
                        self.name(),
                        attempt,
                        max_attempts,
                        mask_key(key),
                        if failure.is_transient() { "transient" } else { "rejected" },
                        failure
                    );
                    // 并发失败在同一凭证上只轮换一次
                    self.rotator.rotate_from(observed);
                    last_failure = Some(failure);

                    if attempt < max_attempts && !self.policy.backoff.is_zero() {
                        tokio::time::sleep(self.policy.backoff).await;
                    }
                }
            }
        }

        let reason = last_failure
            .map(|f| f.to_string())
            .unwrap_or_else(|| "no attempt made".to_string());
        Err(AppError::ProviderUnavailable(format!(
            "{} request failed after {} attempts: {}",
            self.name(),
            max_attempts,
            reason
        )))
    }

    async fn attempt(
        &self,
        request: &DispatchRequest,
        key: &str,
    ) -> std::result::Result<Value, DispatchFailure> {
        let builder = self.client.post(&request.url).json(&request.body);
        let builder = match &self.auth {
            AuthScheme::Bearer => builder.bearer_auth(key),
            AuthScheme::Header(name) => builder.header(name.as_str(), key),
        };

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DispatchFailure::from_status(status.as_u16()));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| DispatchFailure::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(DispatchFailure::from_status(401), DispatchFailure::Auth(401));
        assert_eq!(DispatchFailure::from_status(403), DispatchFailure::Auth(403));
        assert_eq!(DispatchFailure::from_status(429), DispatchFailure::RateLimited);
        assert_eq!(DispatchFailure::from_status(503), DispatchFailure::Server(503));
        assert_eq!(DispatchFailure::from_status(400), DispatchFailure::Rejected(400));

        assert!(DispatchFailure::from_status(502).is_transient());
        assert!(!DispatchFailure::from_status(404).is_transient());
    }

    #[test]
    fn test_policy_from_config_is_bounded() {
        let mut config = ProviderConfig::default();
        config.max_attempts = 0;
        config.timeout_secs = 0;
        let policy = DispatchPolicy::from_config(&config);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.timeout, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_empty_pool_fails_without_network() {
        let dispatcher = Dispatcher::new(
            Arc::new(KeyRotator::empty("none")),
            AuthScheme::Bearer,
            DispatchPolicy::default(),
        )
        .unwrap();

        let request = DispatchRequest::post_json("http://127.0.0.1:9/unused", Value::Null);
        let err = dispatcher.dispatch(&request).await.unwrap_err();
        assert!(matches!(err, AppError::ProviderUnavailable(_)));
        assert!(!dispatcher.has_credentials());
    }
}
