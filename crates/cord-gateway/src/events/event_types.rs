//! Dispatch events
//!
//! Named events delivered with op 0.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;

/// Event names this library knows about
///
/// Anything else is kept as [`GatewayEventType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GatewayEventType {
    /// Sent after a successful Identify
    Ready,
    /// Sent after a successful Resume
    Resumed,
    GuildCreate,
    GuildUpdate,
    GuildDelete,
    ChannelCreate,
    ChannelUpdate,
    ChannelDelete,
    MessageCreate,
    MessageUpdate,
    MessageDelete,
    GuildMemberAdd,
    GuildMemberUpdate,
    GuildMemberRemove,
    PresenceUpdate,
    TypingStart,
    UserUpdate,
    Other(String),
}

impl GatewayEventType {
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "READY" => Self::Ready,
            "RESUMED" => Self::Resumed,
            "GUILD_CREATE" => Self::GuildCreate,
            "GUILD_UPDATE" => Self::GuildUpdate,
            "GUILD_DELETE" => Self::GuildDelete,
            "CHANNEL_CREATE" => Self::ChannelCreate,
            "CHANNEL_UPDATE" => Self::ChannelUpdate,
            "CHANNEL_DELETE" => Self::ChannelDelete,
            "MESSAGE_CREATE" => Self::MessageCreate,
            "MESSAGE_UPDATE" => Self::MessageUpdate,
            "MESSAGE_DELETE" => Self::MessageDelete,
            "GUILD_MEMBER_ADD" => Self::GuildMemberAdd,
            "GUILD_MEMBER_UPDATE" => Self::GuildMemberUpdate,
            "GUILD_MEMBER_REMOVE" => Self::GuildMemberRemove,
            "PRESENCE_UPDATE" => Self::PresenceUpdate,
            "TYPING_START" => Self::TypingStart,
            "USER_UPDATE" => Self::UserUpdate,
            other => Self::Other(other.to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ready => "READY",
            Self::Resumed => "RESUMED",
            Self::GuildCreate => "GUILD_CREATE",
            Self::GuildUpdate => "GUILD_UPDATE",
            Self::GuildDelete => "GUILD_DELETE",
            Self::ChannelCreate => "CHANNEL_CREATE",
            Self::ChannelUpdate => "CHANNEL_UPDATE",
            Self::ChannelDelete => "CHANNEL_DELETE",
            Self::MessageCreate => "MESSAGE_CREATE",
            Self::MessageUpdate => "MESSAGE_UPDATE",
            Self::MessageDelete => "MESSAGE_DELETE",
            Self::GuildMemberAdd => "GUILD_MEMBER_ADD",
            Self::GuildMemberUpdate => "GUILD_MEMBER_UPDATE",
            Self::GuildMemberRemove => "GUILD_MEMBER_REMOVE",
            Self::PresenceUpdate => "PRESENCE_UPDATE",
            Self::TypingStart => "TYPING_START",
            Self::UserUpdate => "USER_UPDATE",
            Self::Other(name) => name,
        }
    }

    /// Session lifecycle events handled by the shard itself
    #[must_use]
    pub fn is_session_event(&self) -> bool {
        matches!(self, Self::Ready | Self::Resumed)
    }
}

impl fmt::Display for GatewayEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One op 0 message as handed to an [`EventHandler`](super::EventHandler)
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchEvent {
    /// Raw `t` field
    pub name: String,
    pub seq: Option<u64>,
    pub data: Value,
}

impl DispatchEvent {
    #[must_use]
    pub fn new(name: impl Into<String>, seq: Option<u64>, data: Value) -> Self {
        Self {
            name: name.into(),
            seq,
            data,
        }
    }

    #[must_use]
    pub fn kind(&self) -> GatewayEventType {
        GatewayEventType::from_name(&self.name)
    }

    /// Decode the event data as `T`
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}
