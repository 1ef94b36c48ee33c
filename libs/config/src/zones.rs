//! Broker endpoint discovery by zone.
//!
//! Deployments keep one JSON endpoints file per fleet, mapping zone names
//! to broker endpoint lists:
//!
//! ```json
//! { "zones": { "global": ["10.0.0.1:4150"], "east2": ["10.2.0.1:4150"] } }
//! ```
//!
//! The zone is picked by policy: `global` uses the `global` section,
//! `named` uses an explicitly configured zone, and `host` derives the zone
//! from the machine's hostname, which follows the
//! `<host>.<cluster>.<zone>...` convention.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::debug;

/// How to choose the zone section of the endpoints file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZonePolicy {
    /// Zone parsed out of the local hostname.
    Host,
    /// The `global` section.
    #[default]
    Global,
    /// An explicitly configured zone name.
    Named,
}

#[derive(Debug, Deserialize)]
pub struct EndpointsFile {
    pub zones: HashMap<String, Vec<String>>,
}

impl EndpointsFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read endpoints file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid endpoints file {}", path.display()))
    }

    pub fn select(&self, policy: ZonePolicy, zone_name: Option<&str>) -> Result<Vec<String>> {
        let zone = match policy {
            ZonePolicy::Host => host_zone()?,
            ZonePolicy::Global => "global".to_string(),
            ZonePolicy::Named => zone_name
                .context("zone_policy = \"named\" requires zone_name")?
                .to_string(),
        };

        let endpoints = self.zones.get(&zone).cloned().unwrap_or_default();
        if endpoints.is_empty() {
            bail!("endpoints file has no entries for zone {zone:?}");
        }
        debug!(zone, count = endpoints.len(), "selected broker endpoints");
        Ok(endpoints)
    }
}

/// Zone component of the local hostname.
pub fn host_zone() -> Result<String> {
    let host = hostname()?;
    zone_from_hostname(&host)
        .with_context(|| format!("hostname {host:?} has no zone component (want host.cluster.zone)"))
}

fn zone_from_hostname(host: &str) -> Option<String> {
    let mut fields = host.split('.');
    let zone = fields.nth(2)?;
    if zone.is_empty() {
        return None;
    }
    Some(zone.to_string())
}

fn hostname() -> Result<String> {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.is_empty() {
            return Ok(name);
        }
    }
    let raw = std::fs::read_to_string("/proc/sys/kernel/hostname")
        .context("failed to determine hostname")?;
    Ok(raw.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn sample_file() -> EndpointsFile {
        let dir = tempdir().unwrap();
        let path = dir.path().join("endpoints.json");
        fs::write(
            &path,
            r#"{"zones": {"global": ["10.0.0.1:4150"], "east2": ["10.2.0.1:4150", "10.2.0.2:4150"]}}"#,
        )
        .unwrap();
        EndpointsFile::load(&path).unwrap()
    }

    #[test]
    fn selects_global_zone_by_default_policy() {
        let file = sample_file();
        assert_eq!(
            file.select(ZonePolicy::Global, None).unwrap(),
            vec!["10.0.0.1:4150"]
        );
    }

    #[test]
    fn selects_named_zone() {
        let file = sample_file();
        assert_eq!(
            file.select(ZonePolicy::Named, Some("east2")).unwrap().len(),
            2
        );
    }

    #[test]
    fn named_policy_without_name_fails() {
        let file = sample_file();
        assert!(file.select(ZonePolicy::Named, None).is_err());
    }

    #[test]
    fn unknown_zone_fails() {
        let file = sample_file();
        assert!(file.select(ZonePolicy::Named, Some("west9")).is_err());
    }

    #[test]
    fn zone_parses_from_third_hostname_field() {
        assert_eq!(
            zone_from_hostname("bridge01.prod.east2.example.com").as_deref(),
            Some("east2")
        );
        assert_eq!(zone_from_hostname("bridge01.prod"), None);
        assert_eq!(zone_from_hostname("localhost"), None);
    }
}
