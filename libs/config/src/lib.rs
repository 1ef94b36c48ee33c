//! # Tapedeck Configuration
//!
//! Configuration for the record and play services: TOML files layered with
//! `TAPEDECK`-prefixed environment overrides, endpoint-set discovery by
//! zone, and the pid-file helper the binaries use at startup.
//!
//! Values are validated where they are consumed (the filename template by
//! the rotator, endpoints by the broker clients), so this crate stays a
//! plain data layer.

pub mod pid;
pub mod settings;
pub mod zones;

pub use settings::{
    BrokerSettings, LogSettings, PlayConfig, PlayDaemonSettings, RecordConfig,
    RecordDaemonSettings, RotateSettings, WatchSettings,
};
pub use zones::ZonePolicy;
