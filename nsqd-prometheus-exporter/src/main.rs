//! Prometheus exporter for nsqd.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use nsqd_prometheus_exporter::config::{
    ConfigOverrides, DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig,
};
use nsqd_prometheus_exporter::{Exporter, ExporterConfig};

/// Scrapes nsqd stats and serves them up as Prometheus metrics.
#[derive(Parser, Debug)]
#[command(name = "nsqd-prometheus-exporter")]
#[command(about = "Scrapes nsqd stats and serves them up as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// URL of nsqd to export stats from.
    #[arg(short, long, env = "NSQD_URL")]
    nsqd_url: Option<String>,

    /// Port on which prometheus will expose metrics.
    #[arg(short = 'p', long, env = "LISTEN_PORT")]
    listen_port: Option<String>,

    /// How often (in seconds) nsqd stats should be scraped.
    #[arg(short, long, env = "SCRAPE_INTERVAL")]
    scrape_interval: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Log output format (text, json).
    #[arg(long, env = "LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if tracing::dispatcher::has_been_set() {
                error!("{:#}", e);
            } else {
                eprintln!("Error: {:#}", e);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    // Load configuration
    let mut config = match &args.config {
        Some(path) => ExporterConfig::load_from_file(path)
            .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?,
        None => ExporterConfig::default(),
    };

    let warnings = config.apply_overrides(ConfigOverrides {
        nsqd_url: args.nsqd_url,
        listen_port: args.listen_port,
        scrape_interval: args.scrape_interval,
        log_level: args.log_level,
        log_format: args.log_format,
    });

    init_tracing(&config.logging);

    for warning in &warnings {
        warn!("{}", warning);
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        nsqd = %config.nsqd.url,
        "Starting nsqd Prometheus exporter"
    );

    let exporter = Exporter::bind(&config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    exporter.run(shutdown_rx).await?;
    Ok(())
}

/// Initialize logging; `RUST_LOG` takes precedence over the configured level.
fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    match config.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down...");
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, shutting down...");
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
