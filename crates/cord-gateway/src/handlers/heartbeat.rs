//! Heartbeat handlers (ops 1 and 11)

use tracing::{debug, trace};

use crate::protocol::GatewayMessage;
use crate::shard::{ShardCommand, ShardSession};

pub struct HeartbeatHandler;

impl HeartbeatHandler {
    /// Server acknowledged the last heartbeat
    pub fn ack(session: &mut ShardSession) -> Vec<ShardCommand> {
        trace!(shard_id = session.shard_id(), "Heartbeat acknowledged");
        session.ack_heartbeat();
        Vec::new()
    }

    /// Server asked for a heartbeat right away
    pub fn requested(session: &mut ShardSession) -> Vec<ShardCommand> {
        debug!(shard_id = session.shard_id(), seq = ?session.seq(), "Heartbeat requested");
        vec![ShardCommand::Send(GatewayMessage::heartbeat(session.seq()))]
    }
}
