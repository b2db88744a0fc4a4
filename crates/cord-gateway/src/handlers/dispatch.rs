//! Dispatch handler (op 0)

use tracing::info;

use super::{HandlerError, HandlerResult};
use crate::events::{DispatchEvent, GatewayEventType};
use crate::protocol::{GatewayMessage, OpCode, ReadyPayload};
use crate::shard::{ShardCommand, ShardSession, ShardState};

pub struct DispatchHandler;

impl DispatchHandler {
    /// Track the sequence, apply session events, forward the event
    pub fn handle(
        session: &mut ShardSession,
        message: GatewayMessage,
    ) -> HandlerResult<Vec<ShardCommand>> {
        let Some(name) = message.t else {
            return Err(HandlerError::invalid(OpCode::Dispatch, "missing event name"));
        };
        if let Some(seq) = message.s {
            session.record_seq(seq);
        }

        match GatewayEventType::from_name(&name) {
            GatewayEventType::Ready => {
                let ready: ReadyPayload = serde_json::from_value(message.d.clone())
                    .map_err(|e| HandlerError::invalid(OpCode::Dispatch, e))?;
                info!(
                    shard_id = session.shard_id(),
                    session_id = %ready.session_id,
                    version = ready.v,
                    "Session ready"
                );
                session.mark_ready(ready.session_id);
            }
            GatewayEventType::Resumed => {
                info!(shard_id = session.shard_id(), seq = ?session.seq(), "Session resumed");
                session.set_state(ShardState::Ready);
            }
            _ => {}
        }

        Ok(vec![ShardCommand::Dispatch(DispatchEvent::new(
            name, message.s, message.d,
        ))])
    }
}
