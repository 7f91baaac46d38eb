use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};

use crate::config::ProxyConfig;
use crate::models::AttemptOutcome;

/**
 * \brief 推理后端抽象：对单个模型执行一次非流式生成。
 *
 * 所有失败都以 `AttemptOutcome` 的变体返回，而不是错误，调用方据此决定是否尝试下一个候选。
 */
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn generate(&self, model: &str, prompt: &str) -> AttemptOutcome;
}

/**
 * \brief 本地 Ollama 兼容后端（POST /api/generate）。
 */
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    api_base: String,
    temperature: f64,
    timeout: Duration,
    client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(api_base: impl Into<String>, temperature: f64, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_base: api_base.into(),
            temperature,
            timeout,
            client,
        })
    }

    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        Self::new(
            config.backend_url.clone(),
            config.temperature,
            config.attempt_timeout(),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base.trim_end_matches('/'), path)
    }

    /**
     * \brief 列出后端已安装的模型（GET /api/tags）。
     */
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let resp = self.client.get(self.url("api/tags")).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("list models failed: {} -> {}", status, text));
        }
        parse_model_list(resp.json().await?)
    }

    fn describe_transport_error(&self, err: &reqwest::Error) -> String {
        if err.is_timeout() {
            format!("request timed out after {}s", self.timeout.as_secs())
        } else if err.is_connect() {
            format!("connection refused by {}: {}", self.api_base, err)
        } else {
            format!("request error: {}", err)
        }
    }
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    async fn generate(&self, model: &str, prompt: &str) -> AttemptOutcome {
        let body = json!({
            "model": model,
            "prompt": prompt,
            "stream": false,
            "temperature": self.temperature,
        });

        let resp = match self
            .client
            .post(self.url("api/generate"))
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return AttemptOutcome::BackendError(self.describe_transport_error(&e)),
        };

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return AttemptOutcome::BackendError(format!("request failed: {} -> {}", status, text));
        }

        match resp.json::<Value>().await {
            Ok(v) => AttemptOutcome::from_text(&extract_response_text(&v)),
            Err(e) => AttemptOutcome::BackendError(self.describe_transport_error(&e)),
        }
    }
}

fn extract_response_text(v: &Value) -> String {
    v.get("response")
        .and_then(|r| r.as_str())
        .unwrap_or("")
        .to_string()
}

fn parse_model_list(v: Value) -> Result<Vec<String>> {
    if let Some(arr) = v.get("models").and_then(|x| x.as_array()) {
        Ok(arr
            .iter()
            .filter_map(|item| {
                item.get("name")
                    .and_then(|s| s.as_str())
                    .or_else(|| item.get("model").and_then(|s| s.as_str()))
            })
            .map(|s| s.to_string())
            .collect())
    } else {
        Err(anyhow!("unexpected models payload: {}", v))
    }
}
