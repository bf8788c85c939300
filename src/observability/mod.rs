//! 可观测性模块
//!
//! 结构化日志初始化：控制台输出（文本或 JSON），可选按天滚动的 JSON 日志文件。

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::config::LoggingConfig;

/// 日志文件名前缀
pub const LOG_FILE_PREFIX: &str = "mnemed.log";

/// 构建日志过滤器，`RUST_LOG` 优先于配置
fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 初始化结构化日志
///
/// 配置了 `log_dir` 时返回文件写入线程的 guard，调用方需在进程生命周期内持有。
/// 已存在全局 subscriber 时不会覆盖。
pub fn init_tracing(config: &LoggingConfig) -> Option<WorkerGuard> {
    let console: Box<dyn Layer<Registry> + Send + Sync> = if config.structured {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_line_number(true)
            .boxed()
    };

    let (file, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(console)
        .with(file)
        .with(build_filter(&config.level))
        .try_init();

    match installed {
        Ok(()) => tracing::debug!(
            "Tracing initialised (level={}, structured={})",
            config.level,
            config.structured
        ),
        Err(e) => tracing::debug!("Tracing already initialised: {}", e),
    }

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_falls_back_on_invalid_level() {
        let filter = build_filter("not a [valid filter");
        assert!(!filter.to_string().is_empty());
    }

    #[test]
    fn test_init_tracing_twice_does_not_panic() {
        let config = LoggingConfig::default();
        assert!(init_tracing(&config).is_none());
        assert!(init_tracing(&config).is_none());
    }
}
