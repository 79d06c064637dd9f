//! CR/LF line framer for device and client byte streams.
//!
//! Bytes are pushed as they arrive and whole lines come out. A line ends at
//! CR or LF; CRLF counts as one terminator even when split across reads.
//! A line that grows to [`MAX_LINE`] bytes without a terminator is cut there.
use bytes::{Buf, BytesMut};

use crate::protocol::MAX_LINE;

pub struct LineFramer {
    buf: BytesMut,
    after_cr: bool,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode one framed line. A line whose first byte is not ASCII is noise on
/// the wire and reads as empty.
fn decode(raw: &[u8]) -> String {
    match raw.first() {
        Some(b) if !b.is_ascii() => String::new(),
        _ => String::from_utf8_lossy(raw).into_owned(),
    }
}

impl LineFramer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
            after_cr: false,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Next complete line without its terminator, if one is buffered.
    pub fn next_line(&mut self) -> Option<String> {
        if self.after_cr && !self.buf.is_empty() {
            if self.buf[0] == b'\n' {
                self.buf.advance(1);
            }
            self.after_cr = false;
        }

        if let Some(pos) = self.buf.iter().position(|&b| b == b'\r' || b == b'\n') {
            let line = self.buf.split_to(pos);
            self.after_cr = self.buf[0] == b'\r';
            self.buf.advance(1);
            return Some(decode(&line));
        }

        if self.buf.len() >= MAX_LINE {
            let line = self.buf.split_to(MAX_LINE);
            return Some(decode(&line));
        }
        None
    }
}
