//! Transport-level errors

use std::io;

use thiserror::Error;

use crate::slots::SocketId;

/// Errors raised by the reactor and socket layer
#[derive(Debug, Error)]
pub enum NetError {
    #[error("Invalid URI '{0}': {1}")]
    InvalidUri(String, String),

    #[error("Failed to resolve {host}:{port}")]
    Resolve { host: String, port: u16 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Invalid TLS server name: {0}")]
    ServerName(String),

    #[error("Socket {0} is gone")]
    SocketGone(SocketId),
}

impl NetError {
    /// Check whether the failure concerns a socket that was already closed
    pub fn is_socket_gone(&self) -> bool {
        matches!(self, Self::SocketGone(_))
    }
}

/// Result type for transport operations
pub type NetResult<T> = Result<T, NetError>;
