//! Delimiter-based line framing for `tokio_util::codec::Framed`.
//!
//! The wire carries plain ASCII lines ending in a single delimiter byte
//! (carriage return by default).  [`LineCodec`] buffers inbound bytes until
//! the delimiter shows up and yields each line without it.
//!
//! # Oversized input
//!
//! A peer that never sends the delimiter must not make the buffer grow
//! forever.  Once more than `max_length` bytes are buffered without a
//! delimiter, the buffered bytes are dropped with a warning and everything up
//! to the next delimiter is discarded as well.  Framing then resumes
//! normally.

use std::io;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

/// Default line terminator.
pub const DEFAULT_DELIMITER: u8 = b'\r';

/// Default bound on a single line.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 4096;

/// Frames a byte stream into lines.
#[derive(Debug, Clone)]
pub struct LineCodec {
    delimiter: u8,
    max_length: usize,
    /// Bytes already scanned for the delimiter.
    next_index: usize,
    /// Dropping bytes until the next delimiter after an overflow.
    discarding: bool,
}

impl LineCodec {
    pub fn new(delimiter: u8, max_length: usize) -> Self {
        Self {
            delimiter,
            max_length: max_length.max(1),
            next_index: 0,
            discarding: false,
        }
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(DEFAULT_DELIMITER, DEFAULT_MAX_LINE_LENGTH)
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        loop {
            let found = buf[self.next_index..]
                .iter()
                .position(|b| *b == self.delimiter)
                .map(|offset| self.next_index + offset);

            match found {
                Some(end) => {
                    self.next_index = 0;
                    let frame = buf.split_to(end + 1);
                    if self.discarding {
                        self.discarding = false;
                        continue;
                    }
                    let line = String::from_utf8_lossy(&frame[..end]);
                    // Tolerate CRLF peers when the delimiter is CR, and vice versa.
                    let line = line.trim_matches(|c| c == '\r' || c == '\n');
                    if line.is_empty() {
                        continue;
                    }
                    return Ok(Some(line.to_string()));
                }
                None if buf.len() > self.max_length => {
                    if !self.discarding {
                        warn!(
                            buffered = buf.len(),
                            max = self.max_length,
                            "no line delimiter within bound, truncating input"
                        );
                    }
                    buf.advance(buf.len());
                    self.next_index = 0;
                    self.discarding = true;
                    return Ok(None);
                }
                None => {
                    self.next_index = buf.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        // A final line without delimiter is dropped; the peer went away mid-line.
        buf.clear();
        self.next_index = 0;
        self.discarding = false;
        Ok(None)
    }
}

impl<T: AsRef<str>> Encoder<T> for LineCodec {
    type Error = io::Error;

    fn encode(&mut self, line: T, buf: &mut BytesMut) -> Result<(), io::Error> {
        let line = line.as_ref();
        if line.as_bytes().contains(&self.delimiter) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("line {line:?} contains the delimiter"),
            ));
        }
        buf.reserve(line.len() + 1);
        buf.put_slice(line.as_bytes());
        buf.put_u8(self.delimiter);
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
