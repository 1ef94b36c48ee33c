//! # Tapedeck Play Service
//!
//! ## Purpose
//! Replays archived frame files back into the broker. One [`PlayDaemon`]
//! per watched (topic × directory) pair scans for finished archives and
//! pushes their frames onto a bounded publish channel; one producer task
//! per broker endpoint drains that channel and publishes.
//!
//! ## Architecture Role
//! ```text
//! disk → DirectoryScanner → frame decode → bounded channel → Publisher → broker
//! ```
//!
//! ## Shutdown
//! SIGINT/SIGTERM cancels a shared token. Daemons stop (mid-file if
//! necessary; an unfinished file is simply not marked done) and drop
//! their channel senders; the channel closes once the last daemon exits,
//! and producers drain what remains before stopping. That ordering is what
//! guarantees no frame is pushed into a channel nobody will ever read.

pub mod daemon;
pub mod scan;

use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tapedeck_archive::Message;
use tapedeck_broker::Publisher;
use tapedeck_config::PlayConfig;

pub use daemon::{PlayDaemon, PlayDaemonError, PlayStats};
pub use scan::DirectoryScanner;

/// Top-level play orchestrator.
pub struct Play {
    config: PlayConfig,
    publishers: Vec<Arc<dyn Publisher>>,
    cancel: CancellationToken,
}

impl Play {
    pub fn new(config: PlayConfig, publishers: Vec<Arc<dyn Publisher>>) -> Self {
        Self {
            config,
            publishers,
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
        info!(name = %config.name, "play orchestrator starting");

        if self.publishers.is_empty() {
            bail!("play needs at least one broker publisher");
        }
        if config.watches.is_empty() {
            bail!("play needs at least one watch entry");
        }

        let (tx, rx) = flume::bounded::<Message>(config.daemon.channel_capacity.max(1));

        let mut producers: JoinSet<()> = JoinSet::new();
        for publisher in &self.publishers {
            producers.spawn(producer_loop(publisher.clone(), rx.clone()));
        }
        drop(rx);

        let mut daemons: JoinSet<Result<(), PlayDaemonError>> = JoinSet::new();
        let mut started = 0usize;
        for watch in &config.watches {
            for dir in &watch.dirs {
                let daemon = PlayDaemon::new(
                    watch.topic.clone(),
                    dir.clone(),
                    config.daemon.scan_interval(),
                    config.daemon.push_timeout(),
                    tx.clone(),
                    self.cancel.child_token(),
                );
                daemons.spawn(daemon.run());
                started += 1;
            }
        }
        drop(tx);
        info!(daemons = started, producers = self.publishers.len(), "play daemons running");

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
                    error!(error = %e, "play daemon failed");
                }
                Err(e) => {
                    failed += 1;
                    error!(error = %e, "play daemon panicked");
                }
            }
        }

        // All daemon senders are gone; producers see the channel close
        // once they have drained it.
        while producers.join_next().await.is_some() {}

        if started > 0 && failed == started {
            bail!("all {started} play daemons failed");
        }
        info!(name = %config.name, failed, "play orchestrator stopped");
        Ok(())
    }
}

/// Drain the publish channel into one broker endpoint. A failed publish is
/// logged and the message dropped from this pass; rerunning the archive
/// replays it.
async fn producer_loop(publisher: Arc<dyn Publisher>, rx: flume::Receiver<Message>) {
    debug!(publisher = ?publisher, "producer started");

    while let Ok(message) = rx.recv_async().await {
        if let Err(e) = publisher.publish(message.topic(), message.body().clone()).await {
            warn!(
                topic = message.topic(),
                len = message.body().len(),
                error = %e,
                "publish failed; frame dropped from this pass"
            );
        }
    }

    debug!(publisher = ?publisher, "producer stopped");
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
