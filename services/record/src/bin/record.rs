//! Record service binary: broker → disk.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use tapedeck_broker::SocketSubscriber;
use tapedeck_config::{pid, RecordConfig};
use tapedeck_record::Record;

#[derive(Parser, Debug)]
#[command(name = "record")]
#[command(about = "Archive broker topic traffic to rotated files")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = RecordConfig::load(&args.config)?;
    let level = args.log_level.as_deref().unwrap_or(&config.log.level);
    init_logging(level);

    info!(name = %config.name, config = %args.config.display(), "starting record service");

    if let Some(pid_file) = &config.pid_file {
        pid::write_pid_file(pid_file)?;
    }

    let endpoints = config
        .broker
        .resolve_endpoints()
        .context("failed to resolve broker endpoints")?;
    info!(endpoints = endpoints.len(), "broker endpoints resolved");
    let subscriber = Arc::new(
        SocketSubscriber::new(endpoints).with_max_in_flight(config.broker.max_in_flight),
    );

    Record::new(config, subscriber).run().await
}

fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
