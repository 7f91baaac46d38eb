use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use urbanlens_core_sdk::{
    config::ProxyConfig,
    context::DatasetContext,
    llm::OllamaBackend,
    requester::{CompletionRequester, RequesterMode},
    server, telemetry,
};

/**
 * \brief CLI 程序入口：运行补全代理或向其提问。
 */
#[derive(Parser, Debug)]
#[command(name = "urbanlens", version, about = "UrbanLens planning assistant proxy")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 启动补全代理 HTTP 服务。
     */
    Serve {
        #[arg(long, default_value = "127.0.0.1:8787")]
        addr: String,
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /**
     * \brief 通过代理提问，可附带数据集摘要。
     * \param context 街区记录 JSON 文件
     * \param client_fallback 由 CLI 逐个尝试候选模型
     * \param timeout_secs 整个请求的超时（逐个迭代时为每次调用）
     */
    Ask {
        #[arg(long)]
        prompt: String,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        context: Option<PathBuf>,
        #[arg(long, default_value = "http://127.0.0.1:8787")]
        proxy: String,
        #[arg(long, default_value_t = false)]
        client_fallback: bool,
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /**
     * \brief 列出后端已安装的模型与配置的候选列表。
     */
    Models {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init("info");

    match cli.command {
        Commands::Serve { addr, config } => {
            let config = ProxyConfig::load(config.as_deref()).context("load config failed")?;
            server::run(&addr, config).await?;
        }
        Commands::Ask {
            prompt,
            model,
            context,
            proxy,
            client_fallback,
            timeout_secs,
        } => {
            let context = context
                .as_deref()
                .map(DatasetContext::from_json_file)
                .transpose()?;
            let mode = if client_fallback {
                RequesterMode::ClientIterated
            } else {
                RequesterMode::ServerFallback
            };
            let mut requester = CompletionRequester::new(proxy)
                .with_mode(mode)
                .with_model(model);
            if let Some(secs) = timeout_secs {
                requester = requester
                    .with_timeout(Duration::from_secs(secs))
                    .context("build http client failed")?;
            }

            match requester.ask(&prompt, context.as_ref()).await {
                Ok(reply) => {
                    println!("{}", reply.text);
                    if let Some(model) = reply.serving_model {
                        tracing::debug!(model = model.as_str(), "served by");
                    }
                }
                Err(err) => {
                    tracing::error!(%err, "completion failed");
                    bail!("{}", err.guidance().message());
                }
            }
        }
        Commands::Models { config } => {
            let config = ProxyConfig::load(config.as_deref()).context("load config failed")?;
            let backend = OllamaBackend::from_config(&config)?;
            let installed = backend
                .list_models()
                .await
                .with_context(|| format!("query {} failed", config.backend_url))?;
            println!("Installed on {}:", config.backend_url);
            for name in &installed {
                println!("  {}", name);
            }
            println!("Candidates:");
            for name in config.candidates_for(None, true).iter() {
                let tagged = format!("{name}:");
                let mark = if installed.iter().any(|m| m == name || m.starts_with(&tagged)) {
                    "ok"
                } else {
                    "missing"
                };
                println!("  {} ({})", name, mark);
            }
        }
    }

    Ok(())
}
