use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use runflow::config::RunflowConfig;
use runflow::generation::OpenAiProvider;
use runflow::persistence::InMemoryProjectRepository;
use runflow::runtime::RunService;
use runflow::telemetry::{init_tracing, LogFormat};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "runflow-server", version, about = "runflow HTTP and SSE server")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "RUNFLOW_LISTEN", default_value = "0.0.0.0:8080")]
    listen: SocketAddr,
    /// JSON configuration file. Environment variables override it.
    #[arg(long, env = "RUNFLOW_CONFIG")]
    config: Option<PathBuf>,
    /// `pretty` or `json`.
    #[arg(long, default_value = "pretty")]
    log_format: LogFormat,
    /// Filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<RunflowConfig> {
    let base = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            RunflowConfig::from_json_str(&raw)
                .with_context(|| format!("failed to parse config {}", path.display()))?
        }
        None => RunflowConfig::default(),
    };
    base.with_env(|key| std::env::var(key).ok())
        .context("invalid configuration from environment")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format, &args.log_level);

    let config = load_config(args.config.as_ref())?;
    let provider = OpenAiProvider::from_config(&config.generation)
        .context("generation provider unavailable; set OPENAI_API_KEY")?;
    info!(
        api_base = %provider.api_base(),
        model = %config.generation.model,
        "generation provider ready"
    );

    let service = RunService::new(
        config,
        Arc::new(provider),
        Arc::new(InMemoryProjectRepository::new()),
    )
    .context("failed to build run service")?;

    runflow_server::run_server(Arc::new(service), args.listen).await
}
