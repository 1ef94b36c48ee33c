//! Archive format errors with diagnostic context.

use thiserror::Error;

/// Frame encode/decode errors.
///
/// Offsets are byte positions within the decoded stream (after
/// decompression, for gzipped files), so operators can locate a corrupt
/// frame with `dd`/`xxd` against the raw file contents.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Buffer handed to a whole-buffer decode cannot hold a header.
    #[error("frame buffer too small: need at least {need} bytes, got {got}")]
    BufferTooSmall { need: usize, got: usize },

    /// Whole-buffer decode where the header disagrees with the buffer size.
    #[error("frame length mismatch: header declares a {declared} byte body, buffer holds {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Stream ended inside a frame: a partial header, or a payload shorter
    /// than its header declared.
    #[error("truncated frame at byte {offset}: {missing} byte(s) missing")]
    Truncated { offset: u64, missing: usize },

    /// Underlying reader failed mid-frame.
    #[error("frame read failed at byte {offset}")]
    Io {
        offset: u64,
        #[source]
        source: std::io::Error,
    },
}

/// Filename template construction and resolution errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// The template string lacks a token the rotation protocol depends on.
    #[error("filename template is missing required token {token}")]
    MissingToken { token: &'static str },

    /// A substituted value contains the reserved token delimiters.
    #[error("{field} value {value:?} contains reserved template characters '{{' or '}}'")]
    ReservedCharacters { field: &'static str, value: String },

    /// The time pattern is not a valid strftime format string.
    #[error("invalid time pattern {pattern:?}")]
    BadTimePattern { pattern: String },

    /// Compressed output requires a `.gz` template so replay can detect it.
    #[error("gzip output requires the filename template to end in .gz, got {template:?}")]
    MissingGzSuffix { template: String },
}
