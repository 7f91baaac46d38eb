use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::llm::InferenceBackend;
use crate::models::{
    annotate_fallback, AttemptOutcome, CandidateList, CompletionRequest, CompletionResponse,
    FailureReport, ModelAttemptResult,
};

/**
 * \brief 回退代理：按顺序尝试候选模型，返回第一个非空成功结果。
 *
 * 同一请求内的尝试严格串行；请求之间不共享可变状态。
 */
pub struct FallbackProxy<B> {
    config: Arc<ProxyConfig>,
    backend: B,
}

impl<B: InferenceBackend> FallbackProxy<B> {
    pub fn new(config: Arc<ProxyConfig>, backend: B) -> Self {
        Self { config, backend }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /**
     * \brief 处理一次补全请求。
     * \param request 补全请求
     * \param cancel  请求上下文的取消令牌；取消后不再发起新的尝试
     */
    pub async fn complete(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, ProxyError> {
        if request.prompt.trim().is_empty() {
            warn!("rejecting completion request with empty prompt");
            return Err(ProxyError::Validation);
        }

        let candidates = self
            .config
            .candidates_for(request.primary_model.as_deref(), request.allow_fallback);
        self.run(&candidates, &request.prompt, cancel).await
    }

    async fn run(
        &self,
        candidates: &CandidateList,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, ProxyError> {
        if candidates.is_empty() {
            warn!("no candidate models configured");
            return Err(ProxyError::Exhausted(FailureReport::no_candidates()));
        }

        let mut last_failure: Option<ModelAttemptResult> = None;
        for (index, model) in candidates.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(model, index, "request cancelled, skipping remaining candidates");
                return Err(ProxyError::Cancelled);
            }

            debug!(model, index, total = candidates.len(), "attempting candidate");
            let attempt = ModelAttemptResult {
                model: model.to_string(),
                outcome: self.backend.generate(model, prompt).await,
            };

            match &attempt.outcome {
                AttemptOutcome::Success(text) => {
                    let used_fallback = model != candidates.primary;
                    info!(model, index, used_fallback, "candidate succeeded");
                    let text = if used_fallback && !self.config.is_quiet(model) {
                        annotate_fallback(text, model)
                    } else {
                        text.clone()
                    };
                    return Ok(CompletionResponse {
                        text,
                        used_fallback,
                        serving_model: model.to_string(),
                    });
                }
                AttemptOutcome::EmptyResponse => {
                    warn!(model, index, "candidate returned empty response");
                }
                AttemptOutcome::BackendError(message) => {
                    warn!(model, index, error = message.as_str(), "candidate failed");
                }
            }
            last_failure = Some(attempt);
        }

        let last_error = last_failure.and_then(|a| {
            a.outcome
                .failure_message()
                .map(|msg| format!("{}: {}", a.model, msg))
        });
        warn!(
            candidates = candidates.len(),
            last_error = last_error.as_deref(),
            "all candidate models failed"
        );
        Err(ProxyError::Exhausted(FailureReport {
            last_error,
            exhausted: true,
        }))
    }
}
