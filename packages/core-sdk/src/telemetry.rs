use tracing_subscriber::{fmt, EnvFilter};

/**
 * \brief 安装全局 tracing 订阅者；优先读取 RUST_LOG。
 * \param default_directive RUST_LOG 未设置时使用的过滤规则，如 "info"
 */
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    if let Err(err) = fmt().with_env_filter(filter).with_target(false).try_init() {
        eprintln!("telemetry init skipped: {}", err);
    }
}
