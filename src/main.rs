//! Entry point for the segment-data-downloader CLI

use anyhow::{anyhow, Context};
use clap::Parser;
use segment_data_downloader::cli::Cli;
use segment_data_downloader::metrics;
use segment_data_downloader::shutdown::{self, SharedShutdown, ShutdownCoordinator};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "segment_data_downloader=info";

/// Initialize tracing, with JSON output when `LOG_FORMAT=json`
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match std::env::var("LOG_FORMAT") {
        Ok(format) if format.eq_ignore_ascii_case("json") => builder.json().init(),
        _ => builder.init(),
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    // First Ctrl+C finishes the current job, the second abandons it
    let shutdown = ShutdownCoordinator::shared();
    shutdown::set_global_shutdown(shutdown.clone());
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if shutdown.escalate() {
                    warn!("Second Ctrl+C received, aborting the in-flight job");
                    break;
                }
                warn!("Ctrl+C received, stopping after the current job (press again to abort)");
            }
        }
    });

    if let Err(e) = run(&cli, shutdown).await {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: &Cli, shutdown: SharedShutdown) -> anyhow::Result<()> {
    if let Some(addr) = cli.metrics_addr {
        metrics::init_metrics(addr)
            .map_err(|e| anyhow!("failed to start metrics exporter on {addr}: {e}"))?;
    }
    cli.execute(shutdown)
        .await
        .with_context(|| format!("{} run failed", cli.command_name()))?;
    Ok(())
}
