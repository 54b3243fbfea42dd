use anyhow::{Context, Result};
use clap::Parser;
use ibc_backlog_exporter::{load_config, run};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "ibc-backlog-exporter",
    version,
    about = "Prometheus exporter for IBC relayer packet/ack backlog depth"
)]
struct Cli {
    /// Path to the TOML config file. Falls back to $CONFIG_PATH or ./config.toml.example
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn init_logging(log_level: &str) {
    let env_filter = if !log_level.is_empty() {
        EnvFilter::new(log_level.to_lowercase())
    } else if let Ok(level) = std::env::var("RUST_LOG") {
        EnvFilter::new(level)
    } else {
        EnvFilter::new("info")
    };
    let subscriber = tracing_subscriber::fmt().with_env_filter(env_filter).finish();
    tracing::subscriber::set_global_default(subscriber).expect("failed to set global subscriber");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .or_else(|| std::env::var_os("CONFIG_PATH").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("./config.toml.example"));

    let cfg = load_config(&config_path).with_context(|| format!("loading config from {}", config_path.display()))?;
    init_logging(&cfg.exporter.log_level);

    info!(?config_path, home_chain = %cfg.home_chain().chain_id, "loaded configuration");

    let handle = ibc_backlog_exporter::metrics_server::install_recorder()?;
    let addr: std::net::SocketAddr = format!("{}:{}", cfg.exporter.address, cfg.exporter.port)
        .parse()
        .context("invalid exporter address/port")?;
    tokio::spawn(async move {
        if let Err(err) = ibc_backlog_exporter::metrics_server::serve(handle, addr).await {
            tracing::error!(%err, "metrics server exited");
        }
    });

    run(cfg).await
}
