//! WebSocket frame codec (RFC 6455 section 5.2)

use thiserror::Error;

use crate::cursor::ByteCursor;

/// Largest payload accepted from the wire
pub const MAX_PAYLOAD_LEN: u64 = 64 * 1024 * 1024;

/// Largest payload a control frame may carry
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Frame opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl FrameError {
    /// Close status to send when this error ends the connection
    pub fn close_status(&self) -> u16 {
        match self {
            Self::MessageTooLong(_) => super::STATUS_MESSAGE_TOO_BIG,
            _ => super::STATUS_PROTOCOL_ERROR,
        }
    }
}

impl OpCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// Frame decoding errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Reserved opcode {0:#x}")]
    ReservedOpcode(u8),

    #[error("Payload length {0} exceeds limit")]
    InvalidLength(u64),

    #[error("Control frame payload of {0} bytes")]
    ControlTooLong(usize),

    #[error("Fragmented control frame")]
    FragmentedControl,

    #[error("Continuation frame without a message in progress")]
    UnexpectedContinuation,

    #[error("Message of {0} bytes exceeds limit")]
    MessageTooLong(usize),
}

/// A single WebSocket frame with its payload unmasked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
    pub opcode: OpCode,
    /// Whether the frame arrived masked
    pub masked: bool,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Final, unmasked frame
    pub fn new(opcode: OpCode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin: true,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            masked: false,
            payload: payload.into(),
        }
    }

    pub fn with_fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    /// Serialize, masking the payload when a key is given
    pub fn encode(&self, mask: Option<[u8; 4]>) -> Vec<u8> {
        let mut first = self.opcode.as_u8();
        if self.fin {
            first |= 0x80;
        }
        if self.rsv1 {
            first |= 0x40;
        }
        if self.rsv2 {
            first |= 0x20;
        }
        if self.rsv3 {
            first |= 0x10;
        }
        encode_frame(first, &self.payload, mask)
    }
}

/// Serialize a final frame straight from a borrowed payload
pub fn encode(opcode: OpCode, payload: &[u8], mask: Option<[u8; 4]>) -> Vec<u8> {
    encode_frame(0x80 | opcode.as_u8(), payload, mask)
}

fn encode_frame(first: u8, payload: &[u8], mask: Option<[u8; 4]>) -> Vec<u8> {
    let len = payload.len();
    let mut out = Vec::with_capacity(len + 14);
    out.push(first);

    let mask_bit = if mask.is_some() { 0x80 } else { 0 };
    if len <= 125 {
        out.push(mask_bit | len as u8);
    } else if len <= usize::from(u16::MAX) {
        out.push(mask_bit | 126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(mask_bit | 127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }

    match mask {
        Some(key) => {
            out.extend_from_slice(&key);
            let start = out.len();
            out.extend_from_slice(payload);
            apply_mask(&mut out[start..], key);
        }
        None => out.extend_from_slice(payload),
    }
    out
}

/// XOR `data` with the repeating 4-byte key; applying it twice restores the input
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

/// Decode one frame from the front of `buf`
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the frame and
/// the number of bytes it occupied.
pub fn decode(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
    let mut cursor = ByteCursor::new(buf);

    let Some(first) = cursor.read_u8() else {
        return Ok(None);
    };
    let Some(second) = cursor.read_u8() else {
        return Ok(None);
    };

    let fin = first & 0x80 != 0;
    let raw_opcode = first & 0x0F;
    let opcode = OpCode::from_u8(raw_opcode).ok_or(FrameError::ReservedOpcode(raw_opcode))?;
    let masked = second & 0x80 != 0;

    let len = match second & 0x7F {
        126 => match cursor.read_u16_be() {
            Some(len) => u64::from(len),
            None => return Ok(None),
        },
        127 => match cursor.read_u64_be() {
            Some(len) => len,
            None => return Ok(None),
        },
        len => u64::from(len),
    };

    if len > MAX_PAYLOAD_LEN {
        return Err(FrameError::InvalidLength(len));
    }
    let len = len as usize;
    if opcode.is_control() {
        if len > MAX_CONTROL_PAYLOAD {
            return Err(FrameError::ControlTooLong(len));
        }
        if !fin {
            return Err(FrameError::FragmentedControl);
        }
    }

    let key = if masked {
        match cursor.read_array::<4>() {
            Some(key) => Some(key),
            None => return Ok(None),
        }
    } else {
        None
    };

    let Some(body) = cursor.take(len) else {
        return Ok(None);
    };
    let mut payload = body.to_vec();
    if let Some(key) = key {
        apply_mask(&mut payload, key);
    }

    let frame = Frame {
        fin,
        rsv1: first & 0x40 != 0,
        rsv2: first & 0x20 != 0,
        rsv3: first & 0x10 != 0,
        opcode,
        masked,
        payload,
    };
    Ok(Some((frame, cursor.position())))
}

/// Split a CLOSE payload into status and reason
///
/// An empty payload reports 1005 (no status received).
pub fn parse_close_payload(payload: &[u8]) -> (u16, String) {
    let mut cursor = ByteCursor::new(payload);
    match cursor.read_u16_be() {
        Some(status) => {
            let rest = cursor.take(cursor.remaining()).unwrap_or_default();
            (status, String::from_utf8_lossy(rest).into_owned())
        }
        None => (super::STATUS_NO_STATUS, String::new()),
    }
}

/// Build a CLOSE payload from status and reason
pub fn close_payload(status: u16, reason: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&status.to_be_bytes());
    payload.extend_from_slice(reason.as_bytes());
    payload.truncate(MAX_CONTROL_PAYLOAD);
    payload
}
