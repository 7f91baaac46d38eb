use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::context::DatasetContext;
use crate::models::{annotate_fallback, CandidateList};
use crate::server::{CompletionBody, CompletionReply, ErrorReply, ModelsReply};

/**
 * \brief 请求端的回退模式。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequesterMode {
    /** \brief 由代理执行回退循环，单次请求 */
    #[default]
    ServerFallback,
    /** \brief 由请求端逐个候选调用单模型代理 */
    ClientIterated,
}

/**
 * \brief 面向界面的回复。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequesterReply {
    pub text: String,
    pub serving_model: Option<String>,
    pub used_fallback: bool,
}

#[derive(Debug, Error)]
pub enum RequesterError {
    #[error("{0}")]
    Validation(String),
    #[error("all models failed: {details}")]
    Exhausted { details: String },
    #[error("completion proxy unreachable: {0}")]
    ProxyUnreachable(#[source] reqwest::Error),
    #[error("completion proxy did not answer in time: {0}")]
    Timeout(#[source] reqwest::Error),
    #[error("unexpected proxy response: {status} -> {body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("invalid proxy response: {0}")]
    Decode(#[source] reqwest::Error),
}

/**
 * \brief 给本地运维者的可执行提示，而不是原始错误文本。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guidance {
    InvalidPrompt,
    ProxyUnreachable,
    BackendUnreachable,
    BackendTimeout,
    NoModelAvailable,
    Unknown,
}

impl Guidance {
    pub fn message(&self) -> &'static str {
        match self {
            Guidance::InvalidPrompt => "Please type a question before sending.",
            Guidance::ProxyUnreachable => concat!(
                "The chat server is not reachable. ",
                "Start it with `urbanlens serve` and try again."
            ),
            Guidance::BackendUnreachable => concat!(
                "The local model server is not running. ",
                "Start it with `ollama serve` and try again."
            ),
            Guidance::BackendTimeout => concat!(
                "The local model server took too long to answer. ",
                "Try a smaller model or raise the timeout."
            ),
            Guidance::NoModelAvailable => concat!(
                "No configured model is available. ",
                "Install one with `ollama pull <model>` or adjust fallback_models."
            ),
            Guidance::Unknown => concat!(
                "The assistant could not answer right now. ",
                "Check the server logs for details."
            ),
        }
    }
}

impl RequesterError {
    pub fn guidance(&self) -> Guidance {
        match self {
            RequesterError::Validation(_) => Guidance::InvalidPrompt,
            RequesterError::ProxyUnreachable(_) => Guidance::ProxyUnreachable,
            RequesterError::Timeout(_) => Guidance::BackendTimeout,
            RequesterError::Exhausted { details } => classify_details(details),
            RequesterError::UnexpectedStatus { .. } | RequesterError::Decode(_) => {
                Guidance::Unknown
            }
        }
    }
}

fn classify_details(details: &str) -> Guidance {
    let lower = details.to_ascii_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        Guidance::BackendTimeout
    } else if lower.contains("connection refused") || lower.contains("error sending request") {
        Guidance::BackendUnreachable
    } else if lower.contains("not found")
        || lower.contains("404")
        || lower.contains("no candidate models")
    {
        Guidance::NoModelAvailable
    } else {
        Guidance::Unknown
    }
}

fn send_error(err: reqwest::Error) -> RequesterError {
    if err.is_timeout() {
        RequesterError::Timeout(err)
    } else {
        RequesterError::ProxyUnreachable(err)
    }
}

/**
 * \brief 补全请求端：拼接数据集摘要，调用代理并映射失败。
 */
#[derive(Debug, Clone)]
pub struct CompletionRequester {
    proxy_base: String,
    mode: RequesterMode,
    preferred_model: Option<String>,
    http: reqwest::Client,
}

impl CompletionRequester {
    pub fn new(proxy_base: impl Into<String>) -> Self {
        Self {
            proxy_base: proxy_base.into(),
            mode: RequesterMode::default(),
            preferred_model: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_mode(mut self, mode: RequesterMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.preferred_model = model
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
        self
    }

    /**
     * \brief 为整个请求设置超时；客户端逐个迭代时作用于每次调用。
     */
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, reqwest::Error> {
        self.http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.proxy_base.trim_end_matches('/'), path)
    }

    /**
     * \brief 发送一条用户消息。
     * \param message 用户输入
     * \param context 可选的数据集摘要
     */
    pub async fn ask(
        &self,
        message: &str,
        context: Option<&DatasetContext>,
    ) -> Result<RequesterReply, RequesterError> {
        if message.trim().is_empty() {
            return Err(RequesterError::Validation("Prompt is required".to_string()));
        }
        let prompt = match context {
            Some(ctx) => ctx.render_prompt(message),
            None => message.to_string(),
        };

        match self.mode {
            RequesterMode::ServerFallback => {
                self.post_completion(&prompt, self.preferred_model.as_deref(), true)
                    .await
            }
            RequesterMode::ClientIterated => self.iterate_candidates(&prompt).await,
        }
    }

    /** \brief 从代理读取候选列表（配置的唯一来源）。 */
    pub async fn fetch_candidates(&self) -> Result<ModelsReply, RequesterError> {
        let resp = self
            .http
            .get(self.url("models"))
            .send()
            .await
            .map_err(send_error)?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(RequesterError::UnexpectedStatus { status, body });
        }
        resp.json().await.map_err(RequesterError::Decode)
    }

    async fn iterate_candidates(&self, prompt: &str) -> Result<RequesterReply, RequesterError> {
        let reply = self.fetch_candidates().await?;
        let list = match &self.preferred_model {
            Some(model) => CandidateList::build(model, &reply.candidates),
            None => CandidateList {
                primary: reply.primary,
                candidates: reply.candidates,
            },
        };
        if list.is_empty() {
            return Err(RequesterError::Exhausted {
                details: "no candidate models configured".to_string(),
            });
        }

        let mut last_details = None;
        for (index, model) in list.iter().enumerate() {
            debug!(model, index, "requesting single-model completion");
            match self.post_completion(prompt, Some(model), false).await {
                Ok(mut answer) => {
                    answer.used_fallback = model != list.primary;
                    if answer.used_fallback && !reply.quiet.iter().any(|q| q == model) {
                        answer.text = annotate_fallback(&answer.text, model);
                    }
                    answer.serving_model = Some(model.to_string());
                    info!(model, index, used_fallback = answer.used_fallback, "completion served");
                    return Ok(answer);
                }
                Err(RequesterError::Exhausted { details }) => {
                    warn!(model, index, details = details.as_str(), "candidate failed");
                    last_details = Some(details);
                }
                Err(other) => return Err(other),
            }
        }

        Err(RequesterError::Exhausted {
            details: last_details.unwrap_or_else(|| "all candidate models failed".to_string()),
        })
    }

    async fn post_completion(
        &self,
        prompt: &str,
        model: Option<&str>,
        fallback: bool,
    ) -> Result<RequesterReply, RequesterError> {
        let body = CompletionBody {
            prompt: Some(prompt.to_string()),
            model: model.map(str::to_string),
            fallback,
        };
        let resp = self
            .http
            .post(self.url("completion"))
            .json(&body)
            .send()
            .await
            .map_err(send_error)?;

        let status = resp.status();
        if status.is_success() {
            let reply: CompletionReply = resp.json().await.map_err(RequesterError::Decode)?;
            return Ok(RequesterReply {
                text: reply.response,
                serving_model: reply.model,
                used_fallback: reply.used_fallback.unwrap_or(false),
            });
        }

        let text = resp.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<ErrorReply>(&text).ok();
        match (status, parsed) {
            (StatusCode::BAD_REQUEST, Some(err)) => Err(RequesterError::Validation(err.error)),
            (s, Some(err)) if s.is_server_error() => Err(RequesterError::Exhausted {
                details: err.details.unwrap_or(err.error),
            }),
            (s, _) => Err(RequesterError::UnexpectedStatus {
                status: s.as_u16(),
                body: text,
            }),
        }
    }
}
