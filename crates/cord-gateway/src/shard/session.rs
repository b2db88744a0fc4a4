//! Shard session state machine
//!
//! [`ShardSession`] holds everything a shard remembers across connections
//! (sequence, session id, resume flag) and turns socket events into
//! [`ShardCommand`]s. It performs no I/O; [`Shard`](super::Shard) carries the
//! commands out against the reactor.

use std::time::Duration;

use tracing::{debug, warn};

use super::{AfterClose, ShardCommand, ShardState};
use crate::config::ShardConfig;
use crate::handlers::MessageDispatcher;
use crate::protocol::{CloseCode, GatewayMessage, IdentifyPayload, ResumePayload};

#[derive(Debug, Clone)]
pub struct ShardSession {
    shard_id: u32,
    shard_count: u32,
    config: ShardConfig,
    state: ShardState,
    seq: Option<u64>,
    session_id: Option<String>,
    resume: bool,
    heartbeat_interval: Option<Duration>,
    acked: bool,
    established: bool,
}

impl ShardSession {
    #[must_use]
    pub fn new(shard_id: u32, shard_count: u32, config: ShardConfig) -> Self {
        Self {
            shard_id,
            shard_count,
            config,
            state: ShardState::Disconnected,
            seq: None,
            session_id: None,
            resume: false,
            heartbeat_interval: None,
            acked: true,
            established: false,
        }
    }

    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    pub fn config(&self) -> &ShardConfig {
        &self.config
    }

    pub fn state(&self) -> ShardState {
        self.state
    }

    /// Last sequence number received
    pub fn seq(&self) -> Option<u64> {
        self.seq
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Next HELLO answers with RESUME rather than IDENTIFY
    pub fn should_resume(&self) -> bool {
        self.resume && self.session_id.is_some()
    }

    /// Adjusted heartbeat period, known once HELLO arrived
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval
    }

    pub fn is_acked(&self) -> bool {
        self.acked
    }

    // === Socket events ===

    /// A new connection attempt starts
    pub fn connecting(&mut self) {
        self.state = ShardState::Connecting;
        self.established = false;
        self.heartbeat_interval = None;
    }

    /// The WebSocket handshake completed
    pub fn opened(&mut self) {
        self.state = ShardState::AwaitingHello;
        self.established = true;
        self.acked = true;
    }

    /// A text frame arrived
    ///
    /// Frames that are not a JSON object or fail to decode are dropped.
    pub fn receive(&mut self, text: &str) -> Vec<ShardCommand> {
        let trimmed = text.trim();
        if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
            debug!(shard_id = self.shard_id, len = text.len(), "Discarding non-object frame");
            return Vec::new();
        }

        match MessageDispatcher::dispatch_text(self, trimmed) {
            Ok(commands) => commands,
            Err(e) if e.is_recoverable() => {
                warn!(shard_id = self.shard_id, error = %e, "Discarding undecodable message");
                Vec::new()
            }
            Err(e) => {
                warn!(shard_id = self.shard_id, error = %e, "Malformed gateway payload");
                vec![ShardCommand::close(e.to_close_code(), e.to_string())]
            }
        }
    }

    /// The heartbeat timer fired
    ///
    /// Sends a heartbeat if the previous one was acknowledged; otherwise the
    /// connection is considered dead and is closed with a resumable code.
    pub fn heartbeat_due(&mut self) -> Vec<ShardCommand> {
        if self.heartbeat_interval.is_none() || !self.state.is_connected() {
            return Vec::new();
        }

        if self.acked {
            self.acked = false;
            return vec![ShardCommand::Send(GatewayMessage::heartbeat(self.seq))];
        }

        warn!(shard_id = self.shard_id, seq = ?self.seq, "Heartbeat not acknowledged");
        self.resume = true;
        vec![ShardCommand::close(CloseCode::UnknownError, "heartbeat ack missed")]
    }

    /// The connection is gone, or never came up
    pub fn closed(&mut self, status: u16) -> AfterClose {
        self.heartbeat_interval = None;
        if self.state == ShardState::Stopped {
            return AfterClose::Stop;
        }

        if self.session_id.is_some() {
            self.resume = true;
        }

        if self.config.reconnect.stops_on(status) {
            warn!(
                shard_id = self.shard_id,
                status,
                "Fatal close code; shard stopped"
            );
            self.state = ShardState::Stopped;
            return AfterClose::Stop;
        }

        self.state = ShardState::Disconnected;
        AfterClose::Reconnect(self.config.reconnect.delay(self.established))
    }

    /// Never reconnect again
    pub fn stop(&mut self) {
        self.state = ShardState::Stopped;
        self.heartbeat_interval = None;
    }

    // === Handler hooks ===

    pub(crate) fn set_state(&mut self, state: ShardState) {
        self.state = state;
    }

    pub(crate) fn begin_heartbeat(&mut self, interval: Duration) {
        self.heartbeat_interval = Some(interval);
        self.acked = true;
    }

    pub(crate) fn ack_heartbeat(&mut self) {
        self.acked = true;
    }

    pub(crate) fn record_seq(&mut self, seq: u64) {
        self.seq = Some(self.seq.map_or(seq, |current| current.max(seq)));
    }

    pub(crate) fn mark_ready(&mut self, session_id: String) {
        self.session_id = Some(session_id);
        self.resume = false;
        self.state = ShardState::Ready;
    }

    pub(crate) fn flag_resume(&mut self) {
        self.resume = true;
    }

    /// Forget the session entirely
    pub(crate) fn invalidate(&mut self) {
        self.resume = false;
        self.session_id = None;
        self.seq = None;
    }

    pub(crate) fn identify_payload(&self) -> IdentifyPayload {
        IdentifyPayload::new(self.config.token.clone(), self.shard_id, self.shard_count)
            .with_large_threshold(self.config.large_threshold)
    }

    pub(crate) fn resume_payload(&self) -> Option<ResumePayload> {
        if !self.resume {
            return None;
        }
        self.session_id.as_ref().map(|session_id| ResumePayload {
            token: self.config.token.clone(),
            session_id: session_id.clone(),
            seq: self.seq,
        })
    }
}
