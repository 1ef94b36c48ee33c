//! Two-phase filename templates.
//!
//! Output filenames are produced from a template over a fixed token set:
//!
//! | token       | resolved at        | value                             |
//! |-------------|--------------------|-----------------------------------|
//! | `{dir}`     | construction       | the daemon's base directory       |
//! | `{topic}`   | construction       | topic name                        |
//! | `{channel}` | construction       | channel name                      |
//! | `{time}`    | file open          | wall clock, strftime-formatted    |
//! | `{count}`   | finalize (rename)  | frames written to the file        |
//!
//! Because `{count}` resolves only at finalize, a filename still containing
//! the literal token is by definition an in-progress file; readers identify
//! finished files solely by its absence. Token syntax is reserved:
//! substituted values may not contain `{` or `}`, which closes the
//! collision a topic named after a token would otherwise cause.
//!
//! The time pattern must sort lexicographically in wall-clock order
//! (zero-padded, most significant first); directory scans rely on it.

use std::path::{Path, PathBuf};

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};

use crate::error::TemplateError;

pub const DIR_TOKEN: &str = "{dir}";
pub const TOPIC_TOKEN: &str = "{topic}";
pub const CHANNEL_TOKEN: &str = "{channel}";
pub const TIME_TOKEN: &str = "{time}";

/// Marker left in a filename until finalize; its presence means the file is
/// still being written and must be skipped by scanners.
pub const COUNT_TOKEN: &str = "{count}";

/// A filename template with the static tokens already substituted.
#[derive(Debug, Clone)]
pub struct FilenameTemplate {
    resolved: String,
    time_pattern: String,
}

impl FilenameTemplate {
    /// Build a template for one (directory, topic, channel) binding.
    ///
    /// Validates that the format carries the `{time}` and `{count}` tokens,
    /// that no substituted value smuggles token delimiters in, and that the
    /// time pattern parses as strftime.
    pub fn new(
        format: &str,
        dir: &Path,
        topic: &str,
        channel: &str,
        time_pattern: &str,
    ) -> Result<Self, TemplateError> {
        let dir = dir.to_string_lossy();
        for (field, value) in [
            ("directory", dir.as_ref()),
            ("topic", topic),
            ("channel", channel),
        ] {
            if value.contains('{') || value.contains('}') {
                return Err(TemplateError::ReservedCharacters {
                    field,
                    value: value.to_string(),
                });
            }
        }

        if !format.contains(TIME_TOKEN) {
            return Err(TemplateError::MissingToken { token: TIME_TOKEN });
        }
        if !format.contains(COUNT_TOKEN) {
            return Err(TemplateError::MissingToken { token: COUNT_TOKEN });
        }

        if StrftimeItems::new(time_pattern).any(|item| matches!(item, Item::Error)) {
            return Err(TemplateError::BadTimePattern {
                pattern: time_pattern.to_string(),
            });
        }

        let resolved = format
            .replace(DIR_TOKEN, &dir)
            .replace(TOPIC_TOKEN, topic)
            .replace(CHANNEL_TOKEN, channel);

        Ok(Self {
            resolved,
            time_pattern: time_pattern.to_string(),
        })
    }

    /// Require a `.gz` suffix so replay can detect compressed files.
    pub fn require_gz_suffix(&self) -> Result<(), TemplateError> {
        if self.resolved.ends_with(".gz") {
            Ok(())
        } else {
            Err(TemplateError::MissingGzSuffix {
                template: self.resolved.clone(),
            })
        }
    }

    /// Phase one: resolve `{time}` for a file opened now. The `{count}`
    /// token stays in place as the in-progress marker.
    pub fn pending_path(&self, opened_at: DateTime<Local>) -> PathBuf {
        let stamp = opened_at.format(&self.time_pattern).to_string();
        PathBuf::from(self.resolved.replace(TIME_TOKEN, &stamp))
    }

    /// Phase two: resolve `{count}` into the finalized name.
    pub fn finalized_path(pending: &Path, count: u64) -> PathBuf {
        let name = pending.to_string_lossy();
        PathBuf::from(name.replace(COUNT_TOKEN, &count.to_string()))
    }

    /// Whether a filename still carries the in-progress marker.
    pub fn is_pending_name(name: &str) -> bool {
        name.contains(COUNT_TOKEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const FORMAT: &str = "{dir}/{topic}/{channel}-{time}-{count}.reel";
    const PATTERN: &str = "%Y-%m-%d-%H-%M-%S%.3f";

    fn template() -> FilenameTemplate {
        FilenameTemplate::new(FORMAT, Path::new("/data"), "orders", "archive", PATTERN)
            .unwrap()
    }

    fn sample_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 5, 10, 20, 30).unwrap()
    }

    #[test]
    fn pending_name_keeps_count_token() {
        let pending = template().pending_path(sample_time());
        let name = pending.to_string_lossy();

        assert!(name.starts_with("/data/orders/archive-2024-03-05-10-20-30"));
        assert!(FilenameTemplate::is_pending_name(&name));
    }

    #[test]
    fn finalize_differs_only_in_count_substitution() {
        let pending = template().pending_path(sample_time());
        let finalized = FilenameTemplate::finalized_path(&pending, 42);

        let expected = pending.to_string_lossy().replace(COUNT_TOKEN, "42");
        assert_eq!(finalized.to_string_lossy(), expected);
        assert!(!FilenameTemplate::is_pending_name(
            &finalized.to_string_lossy()
        ));
    }

    #[test]
    fn time_tokens_sort_with_wall_clock() {
        let earlier = template().pending_path(sample_time());
        let later = template().pending_path(
            Local.with_ymd_and_hms(2024, 3, 5, 10, 20, 31).unwrap(),
        );

        assert!(earlier.to_string_lossy() < later.to_string_lossy());
    }

    #[test]
    fn rejects_topic_with_reserved_characters() {
        let err = FilenameTemplate::new(
            FORMAT,
            Path::new("/data"),
            "evil{count}topic",
            "archive",
            PATTERN,
        )
        .unwrap_err();

        assert!(matches!(
            err,
            TemplateError::ReservedCharacters { field: "topic", .. }
        ));
    }

    #[test]
    fn rejects_format_without_required_tokens() {
        let no_count = "{dir}/{topic}-{time}.reel";
        assert!(matches!(
            FilenameTemplate::new(no_count, Path::new("/d"), "t", "c", PATTERN),
            Err(TemplateError::MissingToken { token: COUNT_TOKEN })
        ));

        let no_time = "{dir}/{topic}-{count}.reel";
        assert!(matches!(
            FilenameTemplate::new(no_time, Path::new("/d"), "t", "c", PATTERN),
            Err(TemplateError::MissingToken { token: TIME_TOKEN })
        ));
    }

    #[test]
    fn rejects_invalid_time_pattern() {
        assert!(matches!(
            FilenameTemplate::new(FORMAT, Path::new("/d"), "t", "c", "%Q-nope"),
            Err(TemplateError::BadTimePattern { .. })
        ));
    }

    #[test]
    fn gz_suffix_check() {
        let gz = FilenameTemplate::new(
            "{dir}/{topic}-{time}-{count}.reel.gz",
            Path::new("/d"),
            "t",
            "c",
            PATTERN,
        )
        .unwrap();
        assert!(gz.require_gz_suffix().is_ok());
        assert!(template().require_gz_suffix().is_err());
    }
}
