//! Instructions from the session state machine to its runner

use std::time::Duration;

use crate::events::DispatchEvent;
use crate::protocol::GatewayMessage;

#[derive(Debug, Clone, PartialEq)]
pub enum ShardCommand {
    /// Write an envelope to the socket
    Send(GatewayMessage),
    /// (Re)start the heartbeat timer with this period
    StartHeartbeat(Duration),
    /// Hand an event to the event handler
    Dispatch(DispatchEvent),
    /// Close the socket now
    Close { code: u16, reason: String },
    /// Close the socket once `delay` has passed
    CloseAfter { delay: Duration, code: u16 },
}

impl ShardCommand {
    pub(crate) fn close(code: impl Into<u16>, reason: impl Into<String>) -> Self {
        Self::Close {
            code: code.into(),
            reason: reason.into(),
        }
    }
}

/// What the runner does once the socket is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterClose {
    Reconnect(Duration),
    Stop,
}
