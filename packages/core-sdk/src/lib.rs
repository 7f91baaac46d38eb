pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod models;
pub mod proxy;
pub mod requester;
pub mod server;
pub mod telemetry;

/**
 * \brief SDK 预导入集合，方便外部引用常用模块。
 */
pub mod prelude {
    pub use crate::config::ProxyConfig;
    pub use crate::context::{DatasetContext, DistrictRecord};
    pub use crate::error::{ConfigError, ProxyError};
    pub use crate::llm::{InferenceBackend, OllamaBackend};
    pub use crate::models::{CompletionRequest, CompletionResponse};
    pub use crate::proxy::FallbackProxy;
    pub use crate::requester::{CompletionRequester, Guidance, RequesterError, RequesterMode};
    pub use crate::{server, telemetry};
}
