//! Invalid session handler (op 9)

use tracing::warn;

use crate::protocol::GatewayMessage;
use crate::shard::{ShardCommand, ShardSession};

pub struct InvalidSessionHandler;

impl InvalidSessionHandler {
    /// Forget the session and drop the connection after a pause
    ///
    /// The next connection identifies from scratch.
    pub fn handle(session: &mut ShardSession, message: &GatewayMessage) -> Vec<ShardCommand> {
        let resumable = message.d.as_bool().unwrap_or(false);
        warn!(
            shard_id = session.shard_id(),
            resumable,
            "Session invalidated"
        );

        session.invalidate();
        vec![ShardCommand::CloseAfter {
            delay: session.config().invalid_session_delay,
            code: cord_io::ws::STATUS_NORMAL,
        }]
    }
}
