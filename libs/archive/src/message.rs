//! One queue item and its frame encoding.
//!
//! A [`Message`] owns the raw broker payload and the precomputed frame
//! (4-byte big-endian length header + payload). The frame is built once at
//! construction and never mutated, so re-serialization always reproduces
//! the same bytes.

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};

use crate::error::FrameError;

/// Size of the big-endian length header preceding every payload.
pub const HEADER_LEN: usize = 4;

/// One broker message, framed for the archive format.
///
/// The `topic` is transport routing state set by whichever daemon
/// constructed the message; it is not part of the wire data and does not
/// survive a round trip through a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    body: Bytes,
    frame: Bytes,
    topic: String,
}

impl Message {
    /// Frame a raw payload.
    ///
    /// Bodies whose length does not fit in a u32 are outside the format's
    /// domain; the archive never produces them because broker messages are
    /// bounded far below 4 GiB.
    pub fn new(body: impl Into<Bytes>) -> Self {
        let body = body.into();
        debug_assert!(body.len() <= u32::MAX as usize);

        let mut frame = BytesMut::with_capacity(HEADER_LEN + body.len());
        frame.put_u32(body.len() as u32);
        frame.extend_from_slice(&body);

        Self {
            body,
            frame: frame.freeze(),
            topic: String::new(),
        }
    }

    /// Tag the message with its destination or source topic.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Decode a single frame already extracted by a transport layer.
    ///
    /// The buffer must be exactly one frame: a 4-byte header followed by
    /// precisely the number of payload bytes the header declares.
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < HEADER_LEN {
            return Err(FrameError::BufferTooSmall {
                need: HEADER_LEN,
                got: buf.len(),
            });
        }

        let declared = BigEndian::read_u32(&buf[..HEADER_LEN]) as usize;
        let actual = buf.len() - HEADER_LEN;
        if declared != actual {
            return Err(FrameError::LengthMismatch { declared, actual });
        }

        Ok(Self::new(Bytes::copy_from_slice(&buf[HEADER_LEN..])))
    }

    /// Raw payload bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Header + payload, as written to disk.
    pub fn frame(&self) -> &Bytes {
        &self.frame
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}
