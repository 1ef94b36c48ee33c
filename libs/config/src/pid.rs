//! Pid-file helper for the service binaries.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

/// Write the current process id, creating parent directories as needed.
pub fn write_pid_file(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create pid dir {}", parent.display()))?;
        }
    }
    let pid = std::process::id();
    std::fs::write(path, format!("{pid}\n"))
        .with_context(|| format!("failed to write pid file {}", path.display()))?;
    debug!(pid, path = %path.display(), "pid file written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_pid_and_creates_parents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run/tapedeck/record.pid");

        write_pid_file(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
    }
}
