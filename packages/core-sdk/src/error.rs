use thiserror::Error;

use crate::models::FailureReport;

/**
 * \brief 代理层错误；仅 Validation 与 Exhausted 会返回给调用方。
 */
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Prompt is required")]
    Validation,
    #[error("all models failed: {}", .0.details())]
    Exhausted(FailureReport),
    #[error("request cancelled before a candidate succeeded")]
    Cancelled,
}

/**
 * \brief 配置加载与校验错误。
 */
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}
