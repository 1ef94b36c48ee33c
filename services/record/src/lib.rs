//! # Tapedeck Record Service
//!
//! ## Purpose
//! Archives broker topic traffic to disk. For every configured
//! (directory × topic) pair the orchestrator opens a broker subscription
//! on the shared channel name and runs a [`RecordDaemon`] that frames each
//! delivery and appends it to rotated, optionally gzipped files.
//!
//! ## Architecture Role
//! ```text
//! broker subscription → RecordDaemon → frame encode → FileRotator → disk
//! ```
//!
//! ## Shutdown
//! SIGINT/SIGTERM cancels a shared token. Every daemon stops its
//! subscription, drains what was already delivered, performs a final
//! rotation, and exits; the orchestrator waits for all of them. A single
//! daemon failure (disk full, permissions) stops only that daemon; the
//! process fails only when every daemon has failed.

pub mod daemon;
pub mod rotate;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use flate2::Compression;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use tapedeck_archive::FilenameTemplate;
use tapedeck_broker::Subscriber;
use tapedeck_config::RecordConfig;

pub use daemon::{RecordDaemon, RecordDaemonError, RecordStats};
pub use rotate::{FileRotator, RotateError};

/// Top-level record orchestrator.
pub struct Record {
    config: RecordConfig,
    subscriber: Arc<dyn Subscriber>,
    cancel: CancellationToken,
}

impl Record {
    pub fn new(config: RecordConfig, subscriber: Arc<dyn Subscriber>) -> Self {
        Self {
            config,
            subscriber,
            cancel: CancellationToken::new(),
        }
    }

    /// Token cancelled on shutdown; exposed so embedders and tests can
    /// stop the orchestrator without a process signal.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(self) -> Result<()> {
        let config = &self.config;
        info!(name = %config.name, "record orchestrator starting");

        let gzip = config
            .rotate
            .gzip
            .then(|| Compression::new(config.rotate.gzip_level));

        let mut daemons: JoinSet<Result<(), RecordDaemonError>> = JoinSet::new();
        let mut started = 0usize;

        for dir in &config.dirs {
            for topic in &config.topics {
                let template = FilenameTemplate::new(
                    &config.rotate.filename_template,
                    dir,
                    topic,
                    &config.channel,
                    &config.rotate.time_pattern,
                )
                .with_context(|| {
                    format!("bad filename template for {}/{}", dir.display(), topic)
                })?;
                let rotator = FileRotator::new(
                    template,
                    config.rotate.interval(),
                    config.rotate.max_bytes(),
                    gzip,
                )
                .context("bad rotation settings")?;

                let subscription = self
                    .subscriber
                    .subscribe(topic, &config.channel)
                    .await
                    .with_context(|| {
                        format!("failed to subscribe to {}/{}", topic, config.channel)
                    })?;

                let daemon = RecordDaemon::new(
                    dir.clone(),
                    topic.clone(),
                    config.channel.clone(),
                    rotator,
                    config.daemon.tick(),
                    config.daemon.idle_log(),
                    self.cancel.child_token(),
                );
                daemons.spawn(daemon.run(subscription));
                started += 1;
            }
        }
        info!(daemons = started, "record daemons running");

        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            cancel.cancel();
        });

        let mut failed = 0usize;
        while let Some(joined) = daemons.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failed += 1;
                    error!(error = %e, "record daemon failed");
                }
                Err(e) => {
                    failed += 1;
                    error!(error = %e, "record daemon panicked");
                }
            }
        }

        if started > 0 && failed == started {
            bail!("all {started} record daemons failed");
        }
        info!(name = %config.name, failed, "record orchestrator stopped");
        Ok(())
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
