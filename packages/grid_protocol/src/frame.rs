//! Sentinel framing for the push channel.
//!
//! Each reply is a UTF-8 JSON document followed by [`FRAME_SENTINEL`]. Chunks
//! from the transport may split a frame (or the sentinel itself) anywhere, so
//! the decoder buffers raw bytes and only parses once a sentinel is seen.

use crate::error::FrameError;
use crate::message::Reply;

pub const FRAME_SENTINEL: &str = "*[STOP]*";

/// Append the sentinel to a serialized reply.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + FRAME_SENTINEL.len());
    frame.extend_from_slice(payload);
    frame.extend_from_slice(FRAME_SENTINEL.as_bytes());
    frame
}

/// Incremental decoder over the push channel byte stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already searched without finding a sentinel.
    scanned: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every frame it completed, in order.
    ///
    /// Pieces that are empty or whitespace are skipped. A piece that fails to
    /// parse yields an `Err` for that piece only.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<Reply, FrameError>> {
        self.buffer.extend_from_slice(chunk);
        let sentinel = FRAME_SENTINEL.as_bytes();
        let mut out = Vec::new();
        let mut start = 0;
        let mut from = self.scanned.min(self.buffer.len());
        while let Some(offset) = find(&self.buffer[from..], sentinel) {
            let end = from + offset;
            if let Some(result) = parse_piece(&self.buffer[start..end]) {
                out.push(result);
            }
            start = end + sentinel.len();
            from = start;
        }
        self.buffer.drain(..start);
        // a sentinel may still complete across the tail
        self.scanned = self.buffer.len().saturating_sub(sentinel.len() - 1);
        out
    }

    /// Bytes received since the last complete frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Discard any trailing partial frame, returning its length.
    pub fn finish(&mut self) -> usize {
        let len = self.buffer.len();
        self.buffer.clear();
        self.scanned = 0;
        len
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_piece(piece: &[u8]) -> Option<Result<Reply, FrameError>> {
    if piece.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    Some(
        serde_json::from_slice(piece).map_err(|source| FrameError::Malformed {
            len: piece.len(),
            source,
        }),
    )
}
