use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use convert_server::config::{AppConfig, CliConfig, FileConfig};
use convert_server::server::{metrics, run_server, RequestsLoggingLevel, ServerState};

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI
    /// arguments.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 5000)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Path to the frontend directory to be statically served.
    #[clap(long)]
    pub frontend_dir_path: Option<String>,

    /// Directory for the disk cache backend.
    #[clap(long)]
    pub cache_dir: Option<PathBuf>,
}

impl From<&CliArgs> for CliConfig {
    fn from(args: &CliArgs) -> Self {
        CliConfig {
            port: args.port,
            metrics_port: args.metrics_port,
            logging_level: args.logging_level.clone(),
            frontend_dir_path: args.frontend_dir_path.clone(),
            cache_dir: args.cache_dir.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };

    let cli_config: CliConfig = (&cli_args).into();
    let app_config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  port: {}", app_config.port);
    info!("  cache backend: {:?}", app_config.cache.backend);
    info!(
        "  workers: {}, queue size: {}",
        app_config.processing.max_concurrent_files, app_config.processing.max_queue_size
    );

    metrics::init_metrics();

    let shutdown = CancellationToken::new();
    let state = ServerState::build(&app_config, shutdown.clone()).await?;

    info!("Ready to serve at port {}!", app_config.port);

    tokio::select! {
        result = run_server(state, shutdown.clone()) => {
            info!("HTTP server stopped: {:?}", result);
            shutdown.cancel();
            result
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            shutdown.cancel();
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            Ok(())
        }
    }
}
