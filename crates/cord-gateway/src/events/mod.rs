//! Gateway events
//!
//! Dispatch events and the handler trait that receives them.

mod event_types;
mod handler;

pub use event_types::{DispatchEvent, GatewayEventType};
pub use handler::{EventHandler, LoggingHandler, SharedEventHandler};
