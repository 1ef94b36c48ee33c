//! Output file rotation.
//!
//! A [`FileRotator`] owns at most one open output file and moves it through
//! the rotation lifecycle: open under a pending name (the `{count}` token
//! unresolved), accept framed writes, and finalize: flush, fsync, close,
//! then atomically rename to the count-resolved name. Readers treat the
//! rename as the commit point: a file is finished exactly when its name no
//! longer carries the pending marker.
//!
//! Compressed output uses one `GzEncoder` per file lifetime. A gzip stream
//! cannot be flushed and then continued, so [`FileRotator::sync`] ends the
//! current gzip member and starts a new one; replay reads the resulting
//! multi-member files with `MultiGzDecoder`.
//!
//! Raw files are opened in append mode and survive a crashed finalize
//! (append continues under the pending name). Compressed files are opened
//! create-new, because appending to a closed gzip stream would corrupt it.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Local;
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use tapedeck_archive::{FilenameTemplate, TemplateError};

/// Rotation failures. Everything here except the internal rename (which is
/// logged, not returned) is fatal for the owning daemon: with no file to
/// write to, accepting further messages would mean acking data we cannot
/// store.
#[derive(Debug, Error)]
pub enum RotateError {
    #[error("failed to create output directory {path}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open output file {path}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write to output file {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to sync output file {path}")]
    Sync {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `write` was called with no file open; callers must check
    /// `needs_rotate` and `open` first.
    #[error("no open output file")]
    NotOpen,
}

enum SegmentWriter {
    Plain(File),
    Gzip(GzEncoder<File>),
}

struct ActiveFile {
    writer: SegmentWriter,
    pending_path: PathBuf,
    opened_at: Instant,
    bytes: u64,
    frames: u64,
    dirty: bool,
}

pub struct FileRotator {
    template: FilenameTemplate,
    interval: Option<Duration>,
    max_bytes: Option<u64>,
    gzip: Option<Compression>,
    current: Option<ActiveFile>,
}

impl FileRotator {
    /// `interval` and `max_bytes` are independent rotation triggers; `None`
    /// disables one. `gzip` selects compressed output at the given level.
    pub fn new(
        template: FilenameTemplate,
        interval: Option<Duration>,
        max_bytes: Option<u64>,
        gzip: Option<Compression>,
    ) -> Result<Self, TemplateError> {
        if gzip.is_some() {
            template.require_gz_suffix()?;
        } else if template.require_gz_suffix().is_ok() {
            warn!("filename template ends in .gz but compression is off; replay will misread these files");
        }

        Ok(Self {
            template,
            interval,
            max_bytes,
            gzip,
            current: None,
        })
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    /// Pending path of the active file, if one is open.
    pub fn pending_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|a| a.pending_path.as_path())
    }

    /// Frames written to the active file since it was opened.
    pub fn frames_written(&self) -> u64 {
        self.current.as_ref().map(|a| a.frames).unwrap_or(0)
    }

    /// True when a write should be preceded by `rotate` + `open`: no file
    /// is open, the open interval elapsed, or the byte budget is exceeded.
    pub fn needs_rotate(&self) -> bool {
        let Some(active) = &self.current else {
            return true;
        };

        if let Some(interval) = self.interval {
            if active.opened_at.elapsed() > interval {
                return true;
            }
        }

        if let Some(max_bytes) = self.max_bytes {
            if active.bytes > max_bytes {
                return true;
            }
        }

        false
    }

    /// Finalize the active file: flush the compressed trailer, fsync,
    /// close, and rename to the count-resolved name. A rename failure is
    /// logged and swallowed: the data is safe under the pending name and
    /// recovery is manual. No-op when nothing is open.
    pub fn rotate(&mut self) -> Result<(), RotateError> {
        let Some(active) = self.current.take() else {
            return Ok(());
        };

        let pending = active.pending_path;
        let file = match active.writer {
            SegmentWriter::Plain(file) => file,
            SegmentWriter::Gzip(encoder) => {
                encoder.finish().map_err(|source| RotateError::Write {
                    path: pending.clone(),
                    source,
                })?
            }
        };
        file.sync_all().map_err(|source| RotateError::Sync {
            path: pending.clone(),
            source,
        })?;
        drop(file);

        let finalized = FilenameTemplate::finalized_path(&pending, active.frames);
        info!(
            file = %finalized.display(),
            frames = active.frames,
            bytes = active.bytes,
            "finalizing output file"
        );
        if let Err(e) = fs::rename(&pending, &finalized) {
            error!(
                from = %pending.display(),
                to = %finalized.display(),
                error = %e,
                "finalize rename failed, file left under pending name"
            );
        }
        Ok(())
    }

    /// Open the next output file under a freshly resolved pending name.
    pub fn open(&mut self) -> Result<(), RotateError> {
        let pending = self.template.pending_path(Local::now());

        if let Some(parent) = pending.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| RotateError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let mut options = OpenOptions::new();
        if self.gzip.is_some() {
            options.write(true).create_new(true);
        } else {
            options.append(true).create(true);
        }
        let file = options.open(&pending).map_err(|source| RotateError::Open {
            path: pending.clone(),
            source,
        })?;

        let size = file
            .metadata()
            .map_err(|source| RotateError::Open {
                path: pending.clone(),
                source,
            })?
            .len();
        debug!(file = %pending.display(), size, "opened output file");

        let writer = match self.gzip {
            Some(level) => SegmentWriter::Gzip(GzEncoder::new(file, level)),
            None => SegmentWriter::Plain(file),
        };
        self.current = Some(ActiveFile {
            writer,
            pending_path: pending,
            opened_at: Instant::now(),
            bytes: size,
            frames: 0,
            dirty: false,
        });
        Ok(())
    }

    /// Append one framed message to the active file.
    pub fn write(&mut self, frame: &[u8]) -> Result<(), RotateError> {
        let active = self.current.as_mut().ok_or(RotateError::NotOpen)?;

        match &mut active.writer {
            SegmentWriter::Plain(file) => file.write_all(frame),
            SegmentWriter::Gzip(encoder) => encoder.write_all(frame),
        }
        .map_err(|source| RotateError::Write {
            path: active.pending_path.clone(),
            source,
        })?;

        active.bytes += frame.len() as u64;
        active.frames += 1;
        active.dirty = true;
        Ok(())
    }

    /// Push unsynced writes to stable storage without rotating. For gzip
    /// output this ends the current stream member and starts a new one;
    /// the member boundary is invisible to `MultiGzDecoder` readers.
    pub fn sync(&mut self) -> Result<(), RotateError> {
        let Some(mut active) = self.current.take() else {
            return Ok(());
        };
        if !active.dirty {
            self.current = Some(active);
            return Ok(());
        }

        let path = active.pending_path.clone();
        match active.writer {
            SegmentWriter::Plain(file) => {
                file.sync_all().map_err(|source| RotateError::Sync {
                    path: path.clone(),
                    source,
                })?;
                active.writer = SegmentWriter::Plain(file);
            }
            SegmentWriter::Gzip(encoder) => {
                let file = encoder.finish().map_err(|source| RotateError::Write {
                    path: path.clone(),
                    source,
                })?;
                file.sync_all().map_err(|source| RotateError::Sync {
                    path: path.clone(),
                    source,
                })?;
                let level = self.gzip.expect("gzip writer implies gzip config");
                active.writer = SegmentWriter::Gzip(GzEncoder::new(file, level));
            }
        }

        active.dirty = false;
        self.current = Some(active);
        Ok(())
    }
}
