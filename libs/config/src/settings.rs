//! Service configuration structures and loading.
//!
//! Both services load a TOML file and then apply environment overrides
//! with the `TAPEDECK` prefix (`TAPEDECK_LOG__LEVEL=debug` overrides
//! `[log] level`). Defaults follow the original deployment values: 60 s /
//! 300 MB rotation, 30 s ticks and scans, a 5-slot publish channel, and a
//! 3 s push timeout.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use tracing::debug;

use crate::zones::{self, ZonePolicy};

const ENV_PREFIX: &str = "TAPEDECK";

fn load_from<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let config = Config::builder()
        .add_source(File::from(path))
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()
        .with_context(|| format!("failed to read configuration from {}", path.display()))?;

    let settings = config
        .try_deserialize()
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    debug!(path = %path.display(), "configuration loaded");
    Ok(settings)
}

/// Record service configuration: one daemon per (directory × topic) pair,
/// all consuming through the same channel name.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordConfig {
    #[serde(default = "default_record_name")]
    pub name: String,
    pub dirs: Vec<PathBuf>,
    pub topics: Vec<String>,
    pub channel: String,
    pub broker: BrokerSettings,
    #[serde(default)]
    pub rotate: RotateSettings,
    #[serde(default)]
    pub daemon: RecordDaemonSettings,
    #[serde(default)]
    pub log: LogSettings,
    #[serde(default)]
    pub pid_file: Option<PathBuf>,
}

impl RecordConfig {
    pub fn load(path: &Path) -> Result<Self> {
        load_from(path)
    }
}

/// Play service configuration: one daemon per (topic × directory) pair.
#[derive(Debug, Clone, Deserialize)]
pub struct PlayConfig {
    #[serde(default = "default_play_name")]
    pub name: String,
    pub watches: Vec<WatchSettings>,
    pub broker: BrokerSettings,
    #[serde(default)]
    pub daemon: PlayDaemonSettings,
    #[serde(default)]
    pub log: LogSettings,
    #[serde(default)]
    pub pid_file: Option<PathBuf>,
}

impl PlayConfig {
    pub fn load(path: &Path) -> Result<Self> {
        load_from(path)
    }
}

/// One watched replay source: every file that appears in one of `dirs` is
/// replayed onto `topic`.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchSettings {
    pub topic: String,
    pub dirs: Vec<PathBuf>,
}

/// Broker endpoints, either inline or discovered from a zone-mapped
/// endpoints file.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerSettings {
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub endpoints_file: Option<PathBuf>,
    #[serde(default)]
    pub zone_policy: ZonePolicy,
    #[serde(default)]
    pub zone_name: Option<String>,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl BrokerSettings {
    /// Inline endpoints win; otherwise consult the endpoints file with the
    /// configured zone policy.
    pub fn resolve_endpoints(&self) -> Result<Vec<String>> {
        if !self.endpoints.is_empty() {
            return Ok(self.endpoints.clone());
        }

        let path = self
            .endpoints_file
            .as_ref()
            .context("broker config needs either endpoints or an endpoints_file")?;
        let map = zones::EndpointsFile::load(path)?;
        map.select(self.zone_policy, self.zone_name.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RotateSettings {
    pub filename_template: String,
    pub time_pattern: String,
    /// Rotate after this many seconds with the same file open; 0 disables.
    pub interval_secs: u64,
    /// Rotate once a file accumulates this many megabytes; 0 disables.
    pub max_file_mb: u64,
    pub gzip: bool,
    pub gzip_level: u32,
}

impl Default for RotateSettings {
    fn default() -> Self {
        Self {
            filename_template: "{dir}/{topic}/{channel}-{time}-{count}.reel.gz".to_string(),
            time_pattern: "%Y-%m-%d-%H-%M-%S%.3f".to_string(),
            interval_secs: 60,
            max_file_mb: 300,
            gzip: true,
            gzip_level: 6,
        }
    }
}

impl RotateSettings {
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }

    pub fn max_bytes(&self) -> Option<u64> {
        (self.max_file_mb > 0).then(|| self.max_file_mb * 1024 * 1024)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecordDaemonSettings {
    /// Rotation tick, so idle topics still roll stale files over.
    pub tick_secs: u64,
    /// Log a liveness line after this long with no deliveries.
    pub idle_log_secs: u64,
}

impl Default for RecordDaemonSettings {
    fn default() -> Self {
        Self {
            tick_secs: 30,
            idle_log_secs: 10,
        }
    }
}

impl RecordDaemonSettings {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }

    pub fn idle_log(&self) -> Duration {
        Duration::from_secs(self.idle_log_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlayDaemonSettings {
    pub scan_interval_secs: u64,
    pub push_timeout_secs: u64,
    /// Capacity of the publish channel shared by all play daemons.
    pub channel_capacity: usize,
}

impl Default for PlayDaemonSettings {
    fn default() -> Self {
        Self {
            scan_interval_secs: 30,
            push_timeout_secs: 3,
            channel_capacity: 5,
        }
    }
}

impl PlayDaemonSettings {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_secs(self.push_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn default_record_name() -> String {
    "record".to_string()
}

fn default_play_name() -> String {
    "play".to_string()
}

fn default_max_in_flight() -> usize {
    64
}
