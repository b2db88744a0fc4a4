//! Reassembly of fragmented data messages

use super::frame::{Frame, FrameError, OpCode, MAX_PAYLOAD_LEN};

/// Largest reassembled message accepted
pub const MAX_MESSAGE_LEN: usize = MAX_PAYLOAD_LEN as usize;

/// A complete data message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Opcode of the first fragment
    pub opcode: OpCode,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            opcode: OpCode::Text,
            payload: text.into().into_bytes(),
        }
    }

    /// Payload as UTF-8 for text messages
    pub fn as_text(&self) -> Option<&str> {
        if self.opcode == OpCode::Text {
            std::str::from_utf8(&self.payload).ok()
        } else {
            None
        }
    }
}

/// Per-connection message builder
///
/// Fragments accumulate until a frame with `fin` set arrives; that frame
/// completes the message and empties the builder.
#[derive(Debug)]
pub struct MessageAssembler {
    opcode: Option<OpCode>,
    buffer: Vec<u8>,
    limit: usize,
}

impl Default for MessageAssembler {
    fn default() -> Self {
        Self::with_limit(MAX_MESSAGE_LEN)
    }
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder that rejects messages longer than `limit` bytes
    pub fn with_limit(limit: usize) -> Self {
        Self {
            opcode: None,
            buffer: Vec::new(),
            limit,
        }
    }

    /// Add a data frame; returns the message it completes, if any
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>, FrameError> {
        debug_assert!(!frame.opcode.is_control());

        if self.opcode.is_none() {
            if frame.opcode == OpCode::Continuation {
                return Err(FrameError::UnexpectedContinuation);
            }
            self.opcode = Some(frame.opcode);
        }

        let total = self.buffer.len().saturating_add(frame.payload.len());
        if total > self.limit {
            self.clear();
            return Err(FrameError::MessageTooLong(total));
        }
        self.buffer.extend_from_slice(&frame.payload);

        if !frame.fin {
            return Ok(None);
        }

        let opcode = self.opcode.take().unwrap_or(frame.opcode);
        let payload = std::mem::take(&mut self.buffer);
        Ok(Some(Message { opcode, payload }))
    }

    /// Whether no partial message is held
    pub fn is_empty(&self) -> bool {
        self.opcode.is_none() && self.buffer.is_empty()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.opcode = None;
        self.buffer.clear();
    }
}
