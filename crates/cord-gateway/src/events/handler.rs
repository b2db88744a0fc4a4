//! Event sink for shards

use std::cell::RefCell;
use std::rc::Rc;

use cord_io::Reactor;
use tracing::{debug, info};

use super::DispatchEvent;
use crate::shard::ShardState;

/// Receives what the shards observe
///
/// Called on the reactor thread between socket callbacks; the reactor may be
/// used to send requests or schedule work.
pub trait EventHandler {
    fn on_dispatch(&mut self, reactor: &mut Reactor, shard_id: u32, event: &DispatchEvent);

    /// A shard changed lifecycle state
    fn on_shard_state(&mut self, _reactor: &mut Reactor, _shard_id: u32, _state: ShardState) {}
}

/// Handler shared by every shard of a client
pub type SharedEventHandler = Rc<RefCell<dyn EventHandler>>;

/// Logs events and state changes
#[derive(Debug, Default)]
pub struct LoggingHandler {
    dispatched: u64,
}

impl LoggingHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn shared() -> SharedEventHandler {
        Rc::new(RefCell::new(Self::new()))
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }
}

impl EventHandler for LoggingHandler {
    fn on_dispatch(&mut self, _reactor: &mut Reactor, shard_id: u32, event: &DispatchEvent) {
        self.dispatched += 1;
        debug!(shard_id, event = %event.name, seq = ?event.seq, "Dispatch");
    }

    fn on_shard_state(&mut self, _reactor: &mut Reactor, shard_id: u32, state: ShardState) {
        info!(shard_id, state = %state, "Shard state changed");
    }
}
