//! Play-side directory daemon.
//!
//! One daemon owns one (directory, topic) pair. Every pass it scans the
//! directory, replays each finished file frame by frame onto the shared
//! publish channel, and moves fully replayed files to `done/<name>.done`.
//!
//! Delivery discipline: a frame is never dropped on backpressure (the
//! push retries with a timeout until it lands or shutdown is requested),
//! and a file is marked done only after its last frame was pushed. A file
//! that fails to decode is left in place and retried every pass until an
//! operator repairs or removes it.

use std::fmt;
use std::fs;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use flate2::read::MultiGzDecoder;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use tapedeck_archive::{FrameReader, Message};

use crate::scan::DirectoryScanner;

#[derive(Debug, Error)]
pub enum PlayDaemonError {
    /// Every producer is gone; nothing can consume pushed frames, so
    /// continuing would stall forever.
    #[error("publish channel closed")]
    ChannelClosed,
}

/// Lifetime counters, shared for post-shutdown inspection.
#[derive(Debug, Default)]
pub struct PlayStats {
    pub files_replayed: AtomicU64,
    pub frames_pushed: AtomicU64,
    pub files_failed: AtomicU64,
}

enum FileOutcome {
    Completed,
    Failed,
    Cancelled,
}

pub struct PlayDaemon {
    topic: String,
    dir: PathBuf,
    scanner: DirectoryScanner,
    scan_interval: Duration,
    push_timeout: Duration,
    tx: flume::Sender<Message>,
    cancel: CancellationToken,
    stats: Arc<PlayStats>,
}

impl fmt::Display for PlayDaemon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "play dir{{{}}}/topic{{{}}}", self.dir.display(), self.topic)
    }
}

impl PlayDaemon {
    pub fn new(
        topic: String,
        dir: PathBuf,
        scan_interval: Duration,
        push_timeout: Duration,
        tx: flume::Sender<Message>,
        cancel: CancellationToken,
    ) -> Self {
        let scanner = DirectoryScanner::new(dir.clone());
        Self {
            topic,
            dir,
            scanner,
            scan_interval,
            push_timeout,
            tx,
            cancel,
            stats: Arc::new(PlayStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<PlayStats> {
        self.stats.clone()
    }

    /// Run passes until cancellation, sleeping the scan interval between
    /// them. May stop mid-file on shutdown; a partially replayed file is
    /// never marked done.
    pub async fn run(mut self) -> Result<(), PlayDaemonError> {
        info!(daemon = %self, "started");

        let cancel = self.cancel.clone();
        loop {
            self.pass().await?;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.scan_interval) => {}
            }
        }

        info!(
            daemon = %self,
            files = self.stats.files_replayed.load(Ordering::Relaxed),
            frames = self.stats.frames_pushed.load(Ordering::Relaxed),
            "stopped"
        );
        Ok(())
    }

    /// One scan-and-replay pass over the directory.
    async fn pass(&mut self) -> Result<(), PlayDaemonError> {
        let files = match self.scanner.scan() {
            Ok(files) => files,
            Err(e) => {
                warn!(daemon = %self, error = %e, "directory scan failed, retrying next pass");
                return Ok(());
            }
        };
        trace!(daemon = %self, files = files.len(), "scan pass");

        // Advisory high-water mark within this pass: the sorted listing
        // must ascend, so a non-ascending name means a clock or naming
        // anomaly. Reset each pass so failed files keep getting retried.
        let mut last_processed: Option<String> = None;

        for name in files {
            if self.cancel.is_cancelled() {
                break;
            }
            if let Some(last) = &last_processed {
                if &name <= last {
                    warn!(
                        daemon = %self,
                        file = %name,
                        last = %last,
                        "file does not sort after the last processed one; skipping"
                    );
                    continue;
                }
            }

            let started = Instant::now();
            match self.replay_file(&name).await? {
                FileOutcome::Completed => {
                    self.mark_done(&name);
                    self.stats.files_replayed.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        daemon = %self,
                        file = %name,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "file replayed"
                    );
                    last_processed = Some(name);
                }
                FileOutcome::Failed => {
                    self.stats.files_failed.fetch_add(1, Ordering::Relaxed);
                }
                FileOutcome::Cancelled => break,
            }
        }
        Ok(())
    }

    async fn replay_file(&self, name: &str) -> Result<FileOutcome, PlayDaemonError> {
        let path = self.dir.join(name);
        debug!(daemon = %self, file = %path.display(), "replaying");

        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) => {
                warn!(daemon = %self, file = %path.display(), error = %e, "open failed");
                return Ok(FileOutcome::Failed);
            }
        };
        let source: Box<dyn Read + Send> = if name.ends_with(".gz") {
            Box::new(BufReader::new(MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        let mut reader = FrameReader::new(source);

        loop {
            match reader.next_frame() {
                Ok(Some(body)) => {
                    let message = Message::new(body).with_topic(self.topic.as_str());
                    if !self.push(message).await? {
                        return Ok(FileOutcome::Cancelled);
                    }
                    self.stats.frames_pushed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(None) => return Ok(FileOutcome::Completed),
                Err(e) => {
                    warn!(
                        daemon = %self,
                        file = %path.display(),
                        error = %e,
                        "frame decode failed; file kept for operator recovery"
                    );
                    return Ok(FileOutcome::Failed);
                }
            }
        }
    }

    /// Push with timeout-retry. Returns `false` when shutdown arrived
    /// before the push succeeded; the message is never dropped otherwise.
    async fn push(&self, message: Message) -> Result<bool, PlayDaemonError> {
        loop {
            let send = tokio::time::timeout(self.push_timeout, self.tx.send_async(message.clone()));
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(false),
                result = send => match result {
                    Ok(Ok(())) => return Ok(true),
                    Ok(Err(_)) => return Err(PlayDaemonError::ChannelClosed),
                    Err(_) => trace!(daemon = %self, "publish channel full, retrying"),
                },
            }
        }
    }

    /// Move a fully replayed file to `done/<name>.done`. Failures are
    /// logged, not fatal: the worst case is a duplicate replay next pass,
    /// which the at-least-once contract already admits.
    fn mark_done(&self, name: &str) {
        let src = self.dir.join(name);
        let done_dir = self.dir.join("done");
        if let Err(e) = fs::create_dir_all(&done_dir) {
            warn!(daemon = %self, dir = %done_dir.display(), error = %e, "failed to create done dir");
            return;
        }

        let dst = done_dir.join(format!("{name}.done"));
        debug!(daemon = %self, from = %src.display(), to = %dst.display(), "marking done");
        if let Err(e) = fs::rename(&src, &dst) {
            warn!(
                daemon = %self,
                file = %src.display(),
                error = %e,
                "mark-done rename failed; file will be replayed again"
            );
        }
    }
}
