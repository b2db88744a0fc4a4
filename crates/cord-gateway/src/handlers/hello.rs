//! Hello handler (op 10)

use std::time::Duration;

use tracing::{debug, info, warn};

use super::{HandlerError, HandlerResult};
use crate::protocol::{GatewayMessage, HelloPayload, OpCode};
use crate::shard::{ShardCommand, ShardSession, ShardState};

/// Longest heartbeat interval accepted from the server
pub const MAX_HEARTBEAT_INTERVAL_MS: u64 = 10 * 60 * 1000;

pub struct HelloHandler;

impl HelloHandler {
    /// Start heartbeating and establish the session
    ///
    /// Sends RESUME when the shard is flagged to resume and holds a session
    /// id, IDENTIFY otherwise.
    pub fn handle(
        session: &mut ShardSession,
        message: &GatewayMessage,
    ) -> HandlerResult<Vec<ShardCommand>> {
        let hello: HelloPayload = message
            .payload()
            .map_err(|e| HandlerError::invalid(OpCode::Hello, e))?;

        let requested = hello.heartbeat_interval;
        if requested == 0 || requested > MAX_HEARTBEAT_INTERVAL_MS {
            warn!(
                shard_id = session.shard_id(),
                heartbeat_interval = requested,
                "Discarding hello with unusable heartbeat interval"
            );
            return Ok(Vec::new());
        }

        // beat ahead of the server's own deadline
        let interval = Duration::from_millis(requested - requested / 10);
        session.begin_heartbeat(interval);
        debug!(
            shard_id = session.shard_id(),
            interval_ms = interval.as_millis() as u64,
            "Hello received"
        );

        let opening = match session.resume_payload() {
            Some(resume) => {
                info!(
                    shard_id = session.shard_id(),
                    session_id = %resume.session_id,
                    seq = ?resume.seq,
                    "Resuming session"
                );
                session.set_state(ShardState::Resuming);
                GatewayMessage::resume(&resume)
            }
            None => {
                info!(shard_id = session.shard_id(), "Identifying");
                session.set_state(ShardState::Identifying);
                GatewayMessage::identify(&session.identify_payload())
            }
        };

        Ok(vec![
            ShardCommand::Send(opening),
            ShardCommand::StartHeartbeat(interval),
        ])
    }
}
