//! Directory scanning for replayable archives.
//!
//! A scan returns the names of files that are safe to replay right now:
//! regular files, finalized (no in-progress `{count}` marker in the name,
//! so play never races a co-located record process), and non-empty. Names
//! come back sorted lexicographically, which the record side's zero-padded
//! time token turns into wall-clock order.
//!
//! Each pass lists the directory from scratch; the `done/` subdirectory
//! where processed files are moved is excluded like any other directory.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use tapedeck_archive::FilenameTemplate;

pub struct DirectoryScanner {
    dir: PathBuf,
}

impl DirectoryScanner {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// List replayable file names in ascending lexicographic order.
    pub fn scan(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();

        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let metadata = entry.metadata()?;

            if metadata.is_dir() {
                trace!(name, "skipping directory entry");
                continue;
            }
            if FilenameTemplate::is_pending_name(&name) {
                debug!(name, "skipping in-progress file");
                continue;
            }
            if metadata.len() == 0 {
                debug!(name, "skipping empty file");
                continue;
            }

            names.push(name);
        }

        names.sort();
        Ok(names)
    }
}
