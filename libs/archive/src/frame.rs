//! Streaming frame decoder.
//!
//! [`FrameReader`] walks a reader as a concatenation of frames. A clean end
//! of input at a frame boundary is the normal "no more frames" condition;
//! an end of input anywhere inside a frame is a truncation error carrying
//! the stream offset where bytes ran out.

use std::io::{ErrorKind, Read};

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;

use crate::error::FrameError;
use crate::message::HEADER_LEN;

/// Sequential frame decoder over any [`Read`] source.
///
/// Wrap the source in a `BufReader` (and a gzip decoder for compressed
/// files) before handing it here; the reader itself issues small header
/// reads and would be slow against an unbuffered file.
pub struct FrameReader<R> {
    inner: R,
    offset: u64,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, offset: 0 }
    }

    /// Byte offset of the next unread frame within the decoded stream.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Decode the next frame.
    ///
    /// Returns `Ok(None)` on a clean end of input before any header byte,
    /// `Ok(Some(body))` for a complete frame, and an error for a partial
    /// header, a short payload, or an I/O failure.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        let mut header = [0u8; HEADER_LEN];
        let got = self.fill(&mut header)?;
        if got == 0 {
            return Ok(None);
        }
        if got < HEADER_LEN {
            return Err(FrameError::Truncated {
                offset: self.offset + got as u64,
                missing: HEADER_LEN - got,
            });
        }

        let len = BigEndian::read_u32(&header) as usize;
        let mut body = vec![0u8; len];
        let got = self.fill(&mut body)?;
        if got < len {
            return Err(FrameError::Truncated {
                offset: self.offset + (HEADER_LEN + got) as u64,
                missing: len - got,
            });
        }

        self.offset += (HEADER_LEN + len) as u64;
        Ok(Some(Bytes::from(body)))
    }

    /// Read until `buf` is full or the stream ends; returns bytes read.
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize, FrameError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(FrameError::Io {
                        offset: self.offset + filled as u64,
                        source: e,
                    })
                }
            }
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn frames(bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut reader = FrameReader::new(Cursor::new(bytes.to_vec()));
        let mut out = Vec::new();
        while let Some(body) = reader.next_frame().unwrap() {
            out.push(body.to_vec());
        }
        out
    }

    #[test]
    fn decodes_concatenated_frames_in_order() {
        // "a", "bb", "ccc" as specified by the file format.
        let bytes = [
            0x00, 0x00, 0x00, 0x01, 0x61, // "a"
            0x00, 0x00, 0x00, 0x02, 0x62, 0x62, // "bb"
            0x00, 0x00, 0x00, 0x03, 0x63, 0x63, 0x63, // "ccc"
        ];

        let bodies = frames(&bytes);
        assert_eq!(bodies, vec![b"a".to_vec(), b"bb".to_vec(), b"ccc".to_vec()]);
    }

    #[test]
    fn empty_input_is_not_an_error() {
        assert!(frames(&[]).is_empty());
    }

    #[test]
    fn clean_eof_after_last_frame_is_normal_completion() {
        let msg = crate::Message::new(&b"tail"[..]);
        let mut reader = FrameReader::new(Cursor::new(msg.frame().to_vec()));

        assert_eq!(
            reader.next_frame().unwrap().unwrap().as_ref(),
            msg.body().as_ref()
        );
        assert!(reader.next_frame().unwrap().is_none());
        // Repeated polls at EOF stay clean.
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn partial_header_is_truncation() {
        let mut reader = FrameReader::new(Cursor::new(vec![0x00, 0x00]));
        let err = reader.next_frame().unwrap_err();
        assert!(matches!(
            err,
            FrameError::Truncated {
                offset: 2,
                missing: 2
            }
        ));
    }

    #[test]
    fn short_payload_is_truncation_with_offset() {
        // Complete first frame, then a header declaring 5 bytes with 2 present.
        let mut bytes = crate::Message::new(&b"ok"[..]).frame().to_vec();
        bytes.extend_from_slice(&[0x00, 0x00, 0x00, 0x05, 0x61, 0x62]);
        let mut reader = FrameReader::new(Cursor::new(bytes));

        assert_eq!(reader.next_frame().unwrap().unwrap().as_ref(), b"ok");
        let err = reader.next_frame().unwrap_err();
        // First frame is 6 bytes; truncation lands after header + 2 payload bytes.
        assert!(matches!(
            err,
            FrameError::Truncated {
                offset: 12,
                missing: 3
            }
        ));
    }

    #[test]
    fn tracks_stream_offset_across_frames() {
        let mut bytes = crate::Message::new(&b"a"[..]).frame().to_vec();
        bytes.extend_from_slice(crate::Message::new(&b"bb"[..]).frame());
        let mut reader = FrameReader::new(Cursor::new(bytes));

        assert_eq!(reader.offset(), 0);
        reader.next_frame().unwrap();
        assert_eq!(reader.offset(), 5);
        reader.next_frame().unwrap();
        assert_eq!(reader.offset(), 11);
    }
}
