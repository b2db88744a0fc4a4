//! Gateway envelope
//!
//! Every gateway message is `{"op", "d", "s", "t"}`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{HelloPayload, IdentifyPayload, OpCode, ResumePayload};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayMessage {
    pub op: OpCode,

    /// Event data; `null` when the op carries none
    #[serde(default)]
    pub d: Value,

    /// Sequence number (dispatch only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    /// Event name (dispatch only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayMessage {
    #[must_use]
    pub fn new(op: OpCode, d: Value) -> Self {
        Self { op, d, s: None, t: None }
    }

    // === Client messages ===

    /// Heartbeat (op 1) carrying the last sequence received
    #[must_use]
    pub fn heartbeat(seq: Option<u64>) -> Self {
        Self::new(OpCode::Heartbeat, seq.map_or(Value::Null, Value::from))
    }

    #[must_use]
    pub fn identify(payload: &IdentifyPayload) -> Self {
        Self::new(OpCode::Identify, serde_json::to_value(payload).unwrap_or_default())
    }

    #[must_use]
    pub fn resume(payload: &ResumePayload) -> Self {
        Self::new(OpCode::Resume, serde_json::to_value(payload).unwrap_or_default())
    }

    // === Server messages ===

    #[must_use]
    pub fn dispatch(event: impl Into<String>, seq: u64, data: Value) -> Self {
        Self {
            op: OpCode::Dispatch,
            d: data,
            s: Some(seq),
            t: Some(event.into()),
        }
    }

    #[must_use]
    pub fn hello(heartbeat_interval: u64) -> Self {
        Self::new(
            OpCode::Hello,
            serde_json::to_value(HelloPayload { heartbeat_interval }).unwrap_or_default(),
        )
    }

    #[must_use]
    pub fn heartbeat_ack() -> Self {
        Self::new(OpCode::HeartbeatAck, Value::Null)
    }

    #[must_use]
    pub fn reconnect() -> Self {
        Self::new(OpCode::Reconnect, Value::Null)
    }

    #[must_use]
    pub fn invalid_session(resumable: bool) -> Self {
        Self::new(OpCode::InvalidSession, Value::Bool(resumable))
    }

    // === Parsing ===

    /// Decode `d` as `T`
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.d)
    }

    pub fn as_hello(&self) -> Option<HelloPayload> {
        if self.op != OpCode::Hello {
            return None;
        }
        self.payload().ok()
    }

    pub fn as_identify(&self) -> Option<IdentifyPayload> {
        if self.op != OpCode::Identify {
            return None;
        }
        self.payload().ok()
    }

    pub fn as_resume(&self) -> Option<ResumePayload> {
        if self.op != OpCode::Resume {
            return None;
        }
        self.payload().ok()
    }

    /// Sequence carried by a heartbeat (op 1)
    pub fn as_heartbeat_seq(&self) -> Option<Option<u64>> {
        if self.op != OpCode::Heartbeat {
            return None;
        }
        Some(self.d.as_u64())
    }

    // === Utilities ===

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl std::fmt::Display for GatewayMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.t {
            Some(t) => {
                write!(f, "GatewayMessage(op={}, t={}", self.op, t)?;
                if let Some(s) = self.s {
                    write!(f, ", s={s}")?;
                }
                write!(f, ")")
            }
            None => write!(f, "GatewayMessage(op={})", self.op),
        }
    }
}
