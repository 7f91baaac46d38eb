use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::models::{dedup_models, CandidateList};

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:11434";
pub const DEFAULT_MODEL: &str = "llama3.2";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 20;

/**
 * \brief 代理配置；候选模型列表的唯一来源。
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /** \brief 推理后端基地址，如 Ollama 的 http://127.0.0.1:11434 */
    pub backend_url: String,
    /** \brief 请求未指定模型时使用的首选模型 */
    pub default_model: String,
    /** \brief 按顺序追加在首选模型之后的次级模型 */
    pub fallback_models: Vec<String>,
    /** \brief 即便作为回退模型服务也不附加说明的模型 */
    pub quiet_models: Vec<String>,
    /** \brief 发送给后端的固定温度 */
    pub temperature: f64,
    /** \brief 单次尝试的超时（秒） */
    pub attempt_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            fallback_models: vec!["llama3.2:1b".to_string(), "phi3:mini".to_string()],
            quiet_models: Vec::new(),
            temperature: DEFAULT_TEMPERATURE,
            attempt_timeout_secs: DEFAULT_ATTEMPT_TIMEOUT_SECS,
        }
    }
}

impl ProxyConfig {
    /**
     * \brief 依次应用默认值、TOML 文件与环境变量，并完成校验。
     * \param path 可选的配置文件路径
     */
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /**
     * \brief 应用 URBANLENS_* 环境变量覆盖。
     * \param lookup 变量读取函数，便于测试注入
     */
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("URBANLENS_BACKEND_URL") {
            self.backend_url = url;
        }
        if let Some(model) = lookup("URBANLENS_DEFAULT_MODEL") {
            self.default_model = model;
        }
        if let Some(list) = lookup("URBANLENS_FALLBACK_MODELS") {
            self.fallback_models = list.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Some(raw) = lookup("URBANLENS_TEMPERATURE") {
            self.temperature = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid("URBANLENS_TEMPERATURE", raw.clone()))?;
        }
        if let Some(raw) = lookup("URBANLENS_ATTEMPT_TIMEOUT_SECS") {
            self.attempt_timeout_secs = raw.trim().parse().map_err(|_| {
                ConfigError::invalid("URBANLENS_ATTEMPT_TIMEOUT_SECS", raw.clone())
            })?;
        }
        Ok(())
    }

    /**
     * \brief 校验并规范化配置（次级模型去重）。
     */
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.default_model = self.default_model.trim().to_string();
        if self.default_model.is_empty() {
            return Err(ConfigError::invalid("default_model", "must not be empty"));
        }
        if self.backend_url.trim().is_empty() {
            return Err(ConfigError::invalid("backend_url", "must not be empty"));
        }
        if self.attempt_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "attempt_timeout_secs",
                "must be greater than zero",
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::invalid(
                "temperature",
                format!("{} is outside [0, 2]", self.temperature),
            ));
        }
        self.fallback_models = dedup_models(&self.fallback_models);
        self.quiet_models = dedup_models(&self.quiet_models);
        Ok(())
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    /**
     * \brief 构造候选列表：首选模型在前，随后是次级模型。
     * \param requested 调用方指定的模型（为空白时视为未指定）
     * \param allow_fallback 为 false 时仅包含首选模型
     */
    pub fn candidates_for(&self, requested: Option<&str>, allow_fallback: bool) -> CandidateList {
        let primary = requested
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.default_model.as_str());
        if allow_fallback {
            CandidateList::build(primary, &self.fallback_models)
        } else {
            CandidateList::build(primary, std::iter::empty())
        }
    }

    pub fn is_quiet(&self, model: &str) -> bool {
        self.quiet_models.iter().any(|m| m == model)
    }
}
