//! Incremental framing of CRLF-delimited JSON record streams.
//!
//! The feed wire format is a sequence of UTF-8 text segments separated by
//! the two-byte delimiter `\r\n`, each non-blank segment holding one JSON
//! value. Network reads split this stream at arbitrary byte offsets, so the
//! [`Framer`] accumulates chunks and only cuts segments at complete
//! delimiters, even when a delimiter itself straddles two reads.
//!
//! One framer serves exactly one physical connection. Reconnects get a
//! fresh framer so stale partial data from a dead connection can never leak
//! into the next one.
//!
//! # Examples
//!
//! ```
//! use firehose_client::Framer;
//!
//! let mut framer = Framer::new();
//! assert!(framer.feed(b"{\"a\":1}\r\n{\"b\"").len() == 1);
//! // the partial second record completes on the next read
//! assert!(framer.feed(b":2}\r\n").len() == 1);
//! ```

use bytes::{Buf, BytesMut};

/// Segment delimiter on the wire.
const DELIMITER: &[u8] = b"\r\n";

/// One framing outcome: a decoded record or an isolated decode failure.
#[derive(Debug)]
pub enum Frame {
    /// A complete segment that decoded as a JSON value.
    Record(serde_json::Value),
    /// A complete segment that was not valid JSON.
    ///
    /// Framing is not desynchronized by this: decoding resumes at the next
    /// delimiter.
    Malformed {
        /// The offending segment text.
        segment: String,
        /// The parse failure.
        error: serde_json::Error,
    },
}

/// Stateful incremental decoder for one physical connection.
#[derive(Debug, Default)]
pub struct Framer {
    /// Received bytes not yet consumed into a complete segment.
    buffer: BytesMut,
}

impl Framer {
    /// Create an empty framer.
    pub fn new() -> Self {
        Framer {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Feed one chunk of bytes, returning every frame it completes.
    ///
    /// Extracts all segments up to the last delimiter in the buffer, so
    /// after this returns the buffer never holds a complete segment. Blank
    /// segments (keep-alive lines) are skipped silently. Empty chunks are
    /// valid no-ops.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.find_delimiter() {
            let segment = self.buffer.split_to(pos);
            self.buffer.advance(DELIMITER.len());

            let text = String::from_utf8_lossy(&segment);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str(trimmed) {
                Ok(value) => frames.push(Frame::Record(value)),
                Err(error) => frames.push(Frame::Malformed {
                    segment: trimmed.to_string(),
                    error,
                }),
            }
        }
        frames
    }

    /// Bytes held back waiting for a delimiter.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn find_delimiter(&self) -> Option<usize> {
        self.buffer.windows(DELIMITER.len()).position(|w| w == DELIMITER)
    }
}
