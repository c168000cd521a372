use anyhow::Context;
use interlink::{config::InterlinkConfig, init_tracing, metrics::MetricsService, Interlink};
use std::env;
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Get config file path from command line or use default
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "config/interlink.yaml".to_string());

    // Load configuration before tracing so the log format can be honored
    let config = match InterlinkConfig::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from {}: {}", config_path, e);
            eprintln!("Usage: interlink [config_file]");
            process::exit(1);
        }
    };

    init_tracing(&config.logging);

    if let Err(e) = run(config, config_path).await {
        error!("Interlink error: {:#}", e);
        process::exit(1);
    }
}

async fn run(config: InterlinkConfig, config_path: String) -> anyhow::Result<()> {
    let metrics = MetricsService::new().context("failed to install metrics recorder")?;

    let interlink = Interlink::from_config(config)
        .await
        .context("invalid configuration")?
        .with_metrics(metrics)
        .with_config_path(config_path);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
        }
        signal.cancel();
    });

    interlink.run(shutdown).await.context("interlink stopped with an error")
}
