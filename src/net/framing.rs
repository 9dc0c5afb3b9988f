//! Wire framing for the helmet telemetry link
//!
//! The stream transport carries one UTF-8 JSON object per line, newline
//! terminated. Partial frames are an expected artifact of stream reads, so
//! bytes accumulate across reads and malformed lines are discarded without
//! surfacing an error.

use bytes::BytesMut;
use tracing::trace;

/// Accumulates raw stream bytes and extracts newline-delimited JSON messages
///
/// Lives for the duration of one connection's receive loop; a new connection
/// attempt starts with a fresh (or reset) decoder.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard any buffered partial frame
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Number of buffered bytes awaiting a frame terminator
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Feed received bytes and return every complete message they finish
    ///
    /// Lines that fail JSON decoding are dropped; decoding continues with the
    /// next line. Trailing bytes after the last `\n` stay buffered.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<serde_json::Value> {
        self.buffer.extend_from_slice(chunk);

        let mut messages = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = self.buffer.split_to(pos + 1);
            match serde_json::from_slice(&line[..pos]) {
                Ok(message) => messages.push(message),
                Err(e) => trace!("Dropping malformed frame: {}", e),
            }
        }
        messages
    }

    /// Decode one datagram as a single complete JSON document
    ///
    /// No buffering across datagrams; a malformed datagram yields `None`.
    pub fn decode_datagram(data: &[u8]) -> Option<serde_json::Value> {
        match serde_json::from_slice(data) {
            Ok(message) => Some(message),
            Err(e) => {
                trace!("Dropping malformed datagram: {}", e);
                None
            }
        }
    }
}
