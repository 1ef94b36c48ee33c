//! # Tapedeck Archive Format
//!
//! ## Purpose
//! Defines everything two tapedeck processes must agree on through the
//! filesystem: the frame layout inside an archive file and the filename
//! conventions that mark a file as in-progress or finished.
//!
//! ## File Format
//! An archive file is a flat concatenation of frames, optionally wrapped in
//! a whole-file gzip stream:
//!
//! ```text
//! repeat {
//!     u32 big-endian   length L of the payload
//!     L bytes          opaque broker message body
//! }
//! ```
//!
//! End of file is end of frames. There is no file header, index, or
//! checksum; ordering and completeness come from the filename conventions
//! in [`template`].
//!
//! ## Integration Points
//! - **Record side**: [`Message::new`] precomputes the frame handed to the
//!   file rotator.
//! - **Play side**: [`FrameReader`] walks a finished file frame by frame,
//!   distinguishing a clean end of input from a truncated tail.
//! - **Both sides**: [`template::FilenameTemplate`] resolves output names in
//!   two phases and defines the in-progress marker scanners must skip.

pub mod error;
pub mod frame;
pub mod message;
pub mod template;

pub use error::{FrameError, TemplateError};
pub use frame::FrameReader;
pub use message::{Message, HEADER_LEN};
pub use template::FilenameTemplate;
