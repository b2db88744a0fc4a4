//! Reconnect handler (op 7)

use tracing::info;

use crate::protocol::CloseCode;
use crate::shard::{ShardCommand, ShardSession};

pub struct ReconnectHandler;

impl ReconnectHandler {
    /// Close with 4000 so the session stays resumable
    pub fn handle(session: &mut ShardSession) -> Vec<ShardCommand> {
        info!(shard_id = session.shard_id(), "Server requested reconnect");
        session.flag_resume();
        vec![ShardCommand::close(CloseCode::UnknownError, "reconnect requested")]
    }
}
