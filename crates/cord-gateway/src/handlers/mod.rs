//! Op code handlers
//!
//! Each server op is interpreted against a [`ShardSession`] and answered with
//! the [`ShardCommand`]s the runner should carry out.

mod dispatch;
mod error;
mod heartbeat;
mod hello;
mod invalid_session;
mod reconnect;

pub use dispatch::DispatchHandler;
pub use error::{HandlerError, HandlerResult};
pub use heartbeat::HeartbeatHandler;
pub use hello::HelloHandler;
pub use invalid_session::InvalidSessionHandler;
pub use reconnect::ReconnectHandler;

use crate::protocol::{GatewayMessage, OpCode};
use crate::shard::{ShardCommand, ShardSession};

/// Routes server messages to their handler
pub struct MessageDispatcher;

impl MessageDispatcher {
    /// Decode one text frame and handle it
    pub fn dispatch_text(
        session: &mut ShardSession,
        text: &str,
    ) -> HandlerResult<Vec<ShardCommand>> {
        let message = GatewayMessage::from_json(text)?;
        Self::dispatch(session, message)
    }

    pub fn dispatch(
        session: &mut ShardSession,
        message: GatewayMessage,
    ) -> HandlerResult<Vec<ShardCommand>> {
        tracing::trace!(shard_id = session.shard_id(), message = %message, "Received");

        match message.op {
            OpCode::Dispatch => DispatchHandler::handle(session, message),
            OpCode::Hello => HelloHandler::handle(session, &message),
            OpCode::Heartbeat => Ok(HeartbeatHandler::requested(session)),
            OpCode::HeartbeatAck => Ok(HeartbeatHandler::ack(session)),
            OpCode::InvalidSession => Ok(InvalidSessionHandler::handle(session, &message)),
            OpCode::Reconnect => Ok(ReconnectHandler::handle(session)),
            OpCode::Identify
            | OpCode::StatusUpdate
            | OpCode::VoiceStateUpdate
            | OpCode::VoiceServerPing
            | OpCode::Resume
            | OpCode::RequestGuildMembers => {
                tracing::warn!(
                    shard_id = session.shard_id(),
                    op = %message.op,
                    "Ignoring client-only op from server"
                );
                Ok(Vec::new())
            }
        }
    }
}
