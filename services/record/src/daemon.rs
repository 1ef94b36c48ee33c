//! Record-side directory daemon.
//!
//! One daemon owns one (directory, topic, channel) triple: it drains the
//! broker subscription for that pair, frames every delivery, and hands the
//! frames to its [`FileRotator`]. A periodic tick rotates stale files even
//! when no traffic arrives and gives quiet files a durability sync.
//!
//! Acknowledgment is deferred: a delivery is acked only after its frame
//! was accepted by the file writer. If the process dies between write and
//! ack the broker redelivers, so the archive may carry rare duplicate
//! frames. That is the documented at-least-once contract.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tapedeck_archive::Message;
use tapedeck_broker::{Delivery, Subscription};

use crate::rotate::{FileRotator, RotateError};

/// Why a record daemon stopped exceptionally. Every variant is fatal for
/// the daemon: continuing would mean acking messages that were never
/// written.
#[derive(Debug, Error)]
pub enum RecordDaemonError {
    #[error(transparent)]
    Rotate(#[from] RotateError),
}

/// Lifetime counters, shared so callers can inspect a daemon after it
/// stopped.
#[derive(Debug, Default)]
pub struct RecordStats {
    pub received: AtomicU64,
    pub written: AtomicU64,
    pub acked: AtomicU64,
}

pub struct RecordDaemon {
    dir: PathBuf,
    topic: String,
    channel: String,
    rotator: FileRotator,
    tick: Duration,
    idle_log: Duration,
    cancel: CancellationToken,
    stats: Arc<RecordStats>,
}

impl fmt::Display for RecordDaemon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "record dir{{{}}}/topic{{{}}}/channel{{{}}}",
            self.dir.display(),
            self.topic,
            self.channel
        )
    }
}

impl RecordDaemon {
    pub fn new(
        dir: PathBuf,
        topic: String,
        channel: String,
        rotator: FileRotator,
        tick: Duration,
        idle_log: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            dir,
            topic,
            channel,
            rotator,
            tick,
            idle_log,
            cancel,
            stats: Arc::new(RecordStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<RecordStats> {
        self.stats.clone()
    }

    /// Run until cancellation or until the subscription ends upstream.
    /// On the way out: stop the broker feed, archive everything already
    /// delivered, and perform the final rotation.
    pub async fn run(mut self, mut sub: Subscription) -> Result<(), RecordDaemonError> {
        info!(daemon = %self, "started");

        let cancel = self.cancel.clone();
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + self.tick, self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe = sub.recv() => match maybe {
                    Some(delivery) => self.archive(delivery)?,
                    None => {
                        warn!(daemon = %self, "subscription ended upstream");
                        break;
                    }
                },
                _ = ticker.tick() => self.on_tick()?,
                _ = tokio::time::sleep(self.idle_log) => {
                    debug!(daemon = %self, idle_secs = self.idle_log.as_secs(), "no deliveries");
                }
                _ = cancel.cancelled() => {
                    debug!(daemon = %self, "shutdown notified");
                    break;
                }
            }
        }

        // Drain: nothing new arrives after close(), but deliveries already
        // buffered belong to us and must reach disk before the final
        // rotation.
        sub.close();
        while let Some(delivery) = sub.recv().await {
            self.archive(delivery)?;
        }
        self.rotator.rotate()?;

        info!(
            daemon = %self,
            received = self.stats.received.load(Ordering::Relaxed),
            written = self.stats.written.load(Ordering::Relaxed),
            acked = self.stats.acked.load(Ordering::Relaxed),
            "stopped"
        );
        Ok(())
    }

    fn archive(&mut self, delivery: Delivery) -> Result<(), RecordDaemonError> {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        if self.rotator.needs_rotate() {
            self.rotator.rotate()?;
            self.rotator.open()?;
        }

        let message = Message::new(delivery.body().clone());
        self.rotator.write(message.frame())?;
        self.stats.written.fetch_add(1, Ordering::Relaxed);

        delivery.ack();
        self.stats.acked.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Periodic maintenance: roll a stale open file, or sync a quiet one.
    /// Files are only ever opened on the write path, so an idle topic does
    /// not churn out empty archives.
    fn on_tick(&mut self) -> Result<(), RecordDaemonError> {
        if !self.rotator.is_open() {
            return Ok(());
        }
        if self.rotator.needs_rotate() {
            debug!(daemon = %self, "tick rotation");
            self.rotator.rotate()?;
        } else {
            self.rotator.sync()?;
        }
        Ok(())
    }
}
