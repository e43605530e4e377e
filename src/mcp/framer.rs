//! Newline-delimited framing for the stdio transport
//!
//! Inbound bytes are split on `\n` into UTF-8 text frames. Blank frames are
//! dropped and a trailing `\r` is stripped. A frame longer than the configured
//! limit is discarded through its terminating newline, after which decoding
//! resumes normally.

use crate::error::{KgError, Result};
use bytes::BytesMut;
use serde::Serialize;
use tokio_util::codec::Decoder;
use tracing::warn;

/// Default cap on a single inbound frame
pub const DEFAULT_MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug)]
pub struct FrameCodec {
    max_frame_bytes: usize,
    // Bytes already scanned for a newline in the pending partial frame
    next_index: usize,
    discarding: bool,
    pending: BytesMut,
}

impl FrameCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            next_index: 0,
            discarding: false,
            pending: BytesMut::new(),
        }
    }

    /// Append a chunk and return every frame it completes
    ///
    /// The trailing partial frame is retained for the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut pending = std::mem::take(&mut self.pending);
        pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Ok(Some(frame)) = self.decode(&mut pending) {
            frames.push(frame);
        }
        self.pending = pending;
        frames
    }

    /// Bytes held for an incomplete frame
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    fn finish_line(&self, line: &[u8]) -> Option<String> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.len() > self.max_frame_bytes {
            warn!(
                "Dropping inbound frame of {} bytes (limit {})",
                line.len(),
                self.max_frame_bytes
            );
            return None;
        }
        let text = String::from_utf8_lossy(line);
        if text.trim().is_empty() {
            return None;
        }
        Some(text.into_owned())
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = KgError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        loop {
            let start = self.next_index.min(src.len());
            match src[start..].iter().position(|b| *b == b'\n') {
                Some(offset) => {
                    let newline = start + offset;
                    let line = src.split_to(newline + 1);
                    self.next_index = 0;

                    if self.discarding {
                        self.discarding = false;
                        continue;
                    }
                    if let Some(frame) = self.finish_line(&line[..newline]) {
                        return Ok(Some(frame));
                    }
                }
                None => {
                    if src.len() > self.max_frame_bytes {
                        if !self.discarding {
                            warn!(
                                "Inbound frame exceeds {} bytes, discarding until next newline",
                                self.max_frame_bytes
                            );
                        }
                        self.discarding = true;
                        src.clear();
                        self.next_index = 0;
                    } else {
                        self.next_index = src.len();
                    }
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        // Final frame without a trailing newline
        let rest = src.split();
        self.next_index = 0;
        if self.discarding {
            self.discarding = false;
            return Ok(None);
        }
        Ok(self.finish_line(&rest))
    }
}

/// Compact JSON followed by exactly one newline
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    Ok(bytes)
}
