use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::{
    config::ProxyConfig,
    error::ProxyError,
    llm::{InferenceBackend, OllamaBackend},
    models::CompletionRequest,
    proxy::FallbackProxy,
};

/**
 * \brief 启动补全代理 HTTP 服务。
 * \param addr   监听地址，如 "127.0.0.1:8787"
 * \param config 已校验的代理配置
 */
pub async fn run(addr: &str, config: ProxyConfig) -> Result<()> {
    let backend = OllamaBackend::from_config(&config)?;
    info!(
        backend = config.backend_url.as_str(),
        default_model = config.default_model.as_str(),
        fallbacks = ?config.fallback_models,
        timeout_secs = config.attempt_timeout_secs,
        "starting completion proxy"
    );
    let proxy = Arc::new(FallbackProxy::new(Arc::new(config), backend));
    let app = router(proxy);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/**
 * \brief 构建路由：/completion、/health、/models。
 */
pub fn router<B: InferenceBackend + 'static>(proxy: Arc<FallbackProxy<B>>) -> Router {
    Router::new()
        .route("/completion", post(completion::<B>))
        .route("/health", get(health))
        .route("/models", get(models::<B>))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { proxy })
}

struct AppState<B> {
    proxy: Arc<FallbackProxy<B>>,
}

impl<B> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            proxy: Arc::clone(&self.proxy),
        }
    }
}

fn default_fallback() -> bool {
    true
}

/**
 * \brief POST /completion 请求体。
 */
#[derive(Serialize, Deserialize, Debug)]
pub struct CompletionBody {
    /** \brief 提示词（必填） */
    #[serde(default)]
    pub prompt: Option<String>,
    /** \brief 首选模型（可选） */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /** \brief 为 false 时只尝试首选模型 */
    #[serde(default = "default_fallback")]
    pub fallback: bool,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CompletionReply {
    pub response: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub used_fallback: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorReply {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ModelsReply {
    pub primary: String,
    pub candidates: Vec<String>,
    #[serde(default)]
    pub quiet: Vec<String>,
}

type ApiError = (StatusCode, Json<ErrorReply>);

fn api_err(status: StatusCode, error: &str, details: Option<String>) -> ApiError {
    (
        status,
        Json(ErrorReply {
            error: error.to_string(),
            details,
        }),
    )
}

/**
 * \brief 补全接口：在独立任务中执行回退循环；调用方断开时停止后续尝试。
 */
async fn completion<B: InferenceBackend + 'static>(
    State(state): State<AppState<B>>,
    payload: Result<Json<CompletionBody>, JsonRejection>,
) -> Result<Json<CompletionReply>, ApiError> {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => {
            warn!(%rejection, "rejecting malformed completion body");
            return Err(api_err(StatusCode::BAD_REQUEST, "Prompt is required", None));
        }
    };
    let prompt = body.prompt.unwrap_or_default();
    let mut request = CompletionRequest::new(prompt);
    request.primary_model = body.model;
    request.allow_fallback = body.fallback;

    let token = CancellationToken::new();
    let _disconnect_guard = token.clone().drop_guard();
    let proxy = Arc::clone(&state.proxy);
    let outcome = tokio::spawn(async move { proxy.complete(request, &token).await }).await;

    match outcome {
        Ok(Ok(resp)) => Ok(Json(CompletionReply {
            response: resp.text,
            model: Some(resp.serving_model),
            used_fallback: Some(resp.used_fallback),
        })),
        Ok(Err(ProxyError::Validation)) => {
            Err(api_err(StatusCode::BAD_REQUEST, "Prompt is required", None))
        }
        Ok(Err(ProxyError::Exhausted(report))) => Err(api_err(
            StatusCode::BAD_GATEWAY,
            "All models failed",
            Some(report.details()),
        )),
        Ok(Err(ProxyError::Cancelled)) => Err(api_err(
            StatusCode::SERVICE_UNAVAILABLE,
            "Request cancelled",
            None,
        )),
        Err(join_err) => {
            error!(%join_err, "completion task aborted");
            Err(api_err(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error",
                Some(join_err.to_string()),
            ))
        }
    }
}

/**
 * \brief 存活检查，无副作用。
 */
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/**
 * \brief 返回默认候选列表，供逐个迭代的请求端使用。
 */
async fn models<B: InferenceBackend + 'static>(
    State(state): State<AppState<B>>,
) -> Json<ModelsReply> {
    let config = state.proxy.config();
    let list = config.candidates_for(None, true);
    Json(ModelsReply {
        primary: list.primary,
        candidates: list.candidates,
        quiet: config.quiet_models.clone(),
    })
}
