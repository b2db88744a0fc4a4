//! Gateway shards
//!
//! A shard is one gateway connection serving a slice of the bot's guilds.
//! [`ShardSession`] is the protocol state machine, [`Shard`] runs it on the
//! reactor and reconnects according to its [`ReconnectPolicy`].

mod command;
mod policy;
mod runner;
mod session;
mod state;

pub use command::{AfterClose, ShardCommand};
pub use policy::ReconnectPolicy;
pub use runner::Shard;
pub use session::ShardSession;
pub use state::ShardState;
