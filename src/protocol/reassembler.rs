//! Notification packet reassembly.
//!
//! BLE indications are capped at the negotiated ATT payload size, so a
//! record frame may arrive split across several notifications. The
//! reassembler buffers chunks until the frame length implied by the type
//! byte is reached, and defends against the duplicate and garbage
//! notifications some adapters deliver.

use bytes::{Buf, BytesMut};
use tracing::{debug, warn};

use crate::protocol::frames::{FrameType, FRAME_TERMINATOR};

/// One complete logical record frame: type byte, payload, checksum.
pub type RawFrame = Vec<u8>;

/// Accumulates notification chunks into complete record frames.
#[derive(Debug, Default)]
pub struct PacketReassembler {
    /// Bytes of the in-flight frame (and any overflow into the next).
    buffer: BytesMut,
    /// The previous chunk, kept to reject duplicate indications.
    last_chunk: Option<Vec<u8>>,
}

impl PacketReassembler {
    /// Create an empty reassembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one notification chunk, returning a frame if one completed.
    ///
    /// Feeding an empty chunk performs no buffering and only drains a
    /// frame already completed by earlier chunks; callers loop on that
    /// after each notification so a chunk carrying two frame boundaries
    /// cannot strand bytes.
    pub fn feed(&mut self, chunk: &[u8]) -> Option<RawFrame> {
        if !chunk.is_empty() {
            if self.last_chunk.as_deref() == Some(chunk) {
                warn!("Dropping duplicate notification chunk ({} bytes)", chunk.len());
                return None;
            }
            self.last_chunk = Some(chunk.to_vec());

            let payload = strip_terminators(chunk);
            if payload.is_empty() {
                return None;
            }

            if self.buffer.is_empty() && FrameType::from_raw(payload[0]).is_none() {
                warn!(
                    "Dropping chunk with unknown frame type {:#04x} ({} bytes)",
                    payload[0],
                    payload.len()
                );
                return None;
            }

            self.buffer.extend_from_slice(payload);
        }

        self.extract_frame()
    }

    /// Number of buffered bytes belonging to an incomplete frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Discard any partial frame, e.g. between sessions.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.last_chunk = None;
    }

    fn extract_frame(&mut self) -> Option<RawFrame> {
        while let Some(&first) = self.buffer.first() {
            if first == FRAME_TERMINATOR {
                self.buffer.advance(1);
                continue;
            }

            let Some(frame_type) = FrameType::from_raw(first) else {
                // A known frame type started the buffer, so this is trailing
                // garbage from a corrupt split. Resynchronize on the next chunk.
                warn!(
                    "Discarding {} unparseable buffered bytes (leading byte {:#04x})",
                    self.buffer.len(),
                    first
                );
                self.buffer.clear();
                return None;
            };

            let expected = frame_type.frame_len();
            if self.buffer.len() < expected {
                debug!(
                    "Frame {:?} incomplete: {}/{} bytes",
                    frame_type,
                    self.buffer.len(),
                    expected
                );
                return None;
            }

            let frame = self.buffer.split_to(expected).to_vec();
            return Some(frame);
        }

        None
    }
}

fn strip_terminators(chunk: &[u8]) -> &[u8] {
    let start = chunk
        .iter()
        .position(|&b| b != FRAME_TERMINATOR)
        .unwrap_or(chunk.len());
    &chunk[start..]
}
