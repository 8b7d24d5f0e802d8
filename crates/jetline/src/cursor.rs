//! Incremental NDJSON extraction over a growing response buffer
//!
//! The cursor owns a single read pointer into the full response text. Each
//! pass extracts every newly completed frame, never re-reading consumed
//! bytes and never consuming a trailing frame that may still be growing.
//! A line that fails to decode is indistinguishable from a frame split
//! across a delivery boundary, so the batch simply stops and the same bytes
//! are retried once more of the stream has arrived.

use serde_json::Value;
use tracing::{trace, warn};

#[derive(Debug, Default)]
pub(crate) struct StreamCursor {
    pointer: usize,
}

impl StreamCursor {
    pub fn new() -> Self {
        Self { pointer: 0 }
    }

    /// Bytes of the response text fully consumed into frames
    pub fn pointer(&self) -> usize {
        self.pointer
    }

    /// Extract every fully received frame not yet consumed, in order
    ///
    /// The pointer advances by `line.len() + 1` per decoded frame (the `+1`
    /// is the newline separator) and keeps those advances even when a later
    /// line in the same batch defers.
    pub fn drain(&mut self, buffer: &str) -> Vec<Value> {
        let mut frames = Vec::new();
        if self.pointer >= buffer.len() {
            return frames;
        }

        // The newest byte is never a trusted frame boundary: every flushed
        // frame ends with a newline, so hold the final character back until
        // more of the stream arrives.
        let mut end = buffer.len() - 1;
        while !buffer.is_char_boundary(end) {
            end -= 1;
        }
        if end <= self.pointer {
            return frames;
        }

        // A malformed stream can strand the pointer inside a multi-byte
        // character (a decoded line with no trailing newline, followed by
        // non-ASCII text). Treat that like any other incomplete input.
        let Some(slice) = buffer.get(self.pointer..end) else {
            return frames;
        };

        for line in slice.split('\n') {
            match serde_json::from_str::<Value>(line) {
                Ok(frame) => {
                    self.pointer += line.len() + 1;
                    frames.push(frame);
                }
                Err(err) => {
                    // Insufficient data, not a failure: retry this line on
                    // the next delivery.
                    trace!("deferring undecodable line of {} bytes: {err}", line.len());
                    break;
                }
            }
        }

        frames
    }

    /// Diagnostic for a trailing fragment that never decoded before the
    /// stream ended
    pub fn note_stream_end(&self, buffer: &str) {
        if self.pointer < buffer.len() {
            warn!(
                "stream ended with {} unconsumed bytes that never decoded",
                buffer.len() - self.pointer
            );
        }
    }
}
