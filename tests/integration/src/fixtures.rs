//! Test fixtures
//!
//! Gateway frames as the mock server sends them, configs with short delays,
//! and an event handler that records what the shards report.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use cord_gateway::protocol::GatewayMessage;
use cord_gateway::shard::ReconnectPolicy;
use cord_gateway::{DispatchEvent, EventHandler, ShardConfig, ShardState};
use cord_io::Reactor;
use serde_json::{json, Value};

pub const TEST_TOKEN: &str = "test-token";

fn to_value(message: &GatewayMessage) -> Value {
    serde_json::to_value(message).expect("envelope serializes")
}

pub fn hello(heartbeat_interval: u64) -> Value {
    to_value(&GatewayMessage::hello(heartbeat_interval))
}

pub fn ready(session_id: &str, seq: u64) -> Value {
    dispatch("READY", seq, json!({"v": 6, "session_id": session_id, "guilds": []}))
}

pub fn resumed(seq: u64) -> Value {
    dispatch("RESUMED", seq, Value::Null)
}

pub fn dispatch(event: &str, seq: u64, data: Value) -> Value {
    to_value(&GatewayMessage::dispatch(event, seq, data))
}

pub fn heartbeat_ack() -> Value {
    to_value(&GatewayMessage::heartbeat_ack())
}

pub fn invalid_session() -> Value {
    to_value(&GatewayMessage::invalid_session(false))
}

/// Op number of a received frame
pub fn op(frame: &Value) -> Option<u64> {
    frame["op"].as_u64()
}

/// Shard settings with delays short enough for tests
pub fn test_shard_config() -> ShardConfig {
    ShardConfig {
        token: TEST_TOKEN.to_string(),
        large_threshold: 250,
        invalid_session_delay: Duration::from_millis(50),
        reconnect: ReconnectPolicy {
            connect_retry: Duration::from_millis(100),
            reconnect_delay: Duration::from_millis(50),
            stop_on_fatal_close: true,
        },
    }
}

/// Everything the shards reported
#[derive(Debug, Default)]
pub struct RecordingHandler {
    pub events: Vec<(u32, DispatchEvent)>,
    pub states: Vec<(u32, ShardState)>,
}

impl RecordingHandler {
    pub fn shared() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn saw(&self, event: &str) -> usize {
        self.events.iter().filter(|(_, e)| e.name == event).count()
    }

    pub fn saw_state(&self, shard_id: u32, state: ShardState) -> bool {
        self.states.contains(&(shard_id, state))
    }
}

impl EventHandler for RecordingHandler {
    fn on_dispatch(&mut self, _reactor: &mut Reactor, shard_id: u32, event: &DispatchEvent) {
        self.events.push((shard_id, event.clone()));
    }

    fn on_shard_state(&mut self, _reactor: &mut Reactor, shard_id: u32, state: ShardState) {
        self.states.push((shard_id, state));
    }
}
