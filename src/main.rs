use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use sts_monitor::config::ConfigOverrides;
use sts_monitor::runtime::{init_logging, load_config};
use sts_monitor::{metrics, watch, HttpSource};
use tracing::{error, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Roster endpoint of the server
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// System to show once the roster lists it
    #[arg(short, long, value_name = "ID")]
    system: Option<String>,

    /// Roster poll interval in milliseconds
    #[arg(long, value_name = "MS")]
    roster_interval: Option<u64>,

    /// Detail poll interval in milliseconds
    #[arg(long, value_name = "MS")]
    detail_interval: Option<u64>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable debug mode
    #[arg(short, long)]
    debug: bool,

    /// Fetch once and exit instead of polling
    #[arg(long)]
    once: bool,

    /// Metrics server port (set to 0 to disable)
    #[arg(long, default_value_t = 0)]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.debug)?;
    let _metrics_server = metrics::spawn_metrics_server(cli.metrics_port);

    info!("Starting sts-monitor v{}", env!("CARGO_PKG_VERSION"));

    let loaded = load_config(cli.config.as_deref()).await?;
    let mut config = loaded.config;
    config.apply_overrides(ConfigOverrides {
        base_url: cli.base_url,
        system: cli.system,
        roster_interval_ms: cli.roster_interval,
        detail_interval_ms: cli.detail_interval,
    });

    let source = Arc::new(HttpSource::new(&config.base_url, config.request_timeout())?);
    info!(base_url = %config.base_url, "watching server");

    let result = if cli.once {
        watch::run_once(source, &config).await.map(|_| ())
    } else {
        let shutdown = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(?err, "failed to listen for ctrl-c");
            }
        };
        watch::run_live(source, &config, shutdown).await
    };

    match result {
        Ok(()) => {
            info!("Monitor stopped");
            Ok(())
        }
        Err(e) => {
            error!("Monitor failed: {:#}", e);
            std::process::exit(1);
        }
    }
}
