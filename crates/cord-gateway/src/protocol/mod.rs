//! Gateway protocol definitions
//!
//! Op codes, the JSON envelope, payloads and close codes.

mod close_codes;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::CloseCode;
pub use messages::GatewayMessage;
pub use opcodes::OpCode;
pub use payloads::{
    GatewayInfo, HelloPayload, IdentifyPayload, IdentifyProperties, ReadyPayload, ResumePayload,
};

/// Query appended to gateway and REST URLs
#[must_use]
pub fn api_query(version: u8) -> String {
    format!("?v={version}&encoding=json")
}
