//! # cord-io
//!
//! Single-threaded I/O stack: a mio reactor with a timer queue, plain and TLS
//! client sockets, and the WebSocket and HTTP/1.1 clients built on them.

mod cursor;
mod error;
mod slots;
mod tls;

pub mod http;
pub mod reactor;
pub mod socket;
pub mod timer;
pub mod uri;
pub mod ws;

pub use error::{NetError, NetResult};
pub use reactor::{Reactor, ReactorConfig, StopHandle};
pub use slots::SocketId;
pub use socket::{CloseReason, SocketHandler};
pub use timer::{TimerHandle, TimerQueue};
pub use uri::Uri;
