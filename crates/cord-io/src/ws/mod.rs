//! WebSocket client (RFC 6455)
//!
//! Client-side only: frames are always sent masked and final, the opening
//! handshake is accepted on `HTTP/1.1 101`, and fragmented messages are
//! reassembled before delivery.

mod assembler;
mod client;
pub mod frame;
pub mod handshake;

pub use assembler::{Message, MessageAssembler, MAX_MESSAGE_LEN};
pub use client::{WebSocket, WsHandler};
pub use frame::{Frame, FrameError, OpCode};

/// Normal closure
pub const STATUS_NORMAL: u16 = 1000;
/// Protocol error, also reported for a failed handshake
pub const STATUS_PROTOCOL_ERROR: u16 = 1002;
/// CLOSE frame carried no status
pub const STATUS_NO_STATUS: u16 = 1005;
/// Connection dropped without a CLOSE frame
pub const STATUS_ABNORMAL: u16 = 1006;
/// Reassembled message over the size limit
pub const STATUS_MESSAGE_TOO_BIG: u16 = 1009;
