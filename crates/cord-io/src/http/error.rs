//! HTTP client errors

use std::time::Duration;

use thiserror::Error;

use crate::error::NetError;

/// Malformed response bytes
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid status line: {0}")]
    InvalidStatusLine(String),

    #[error("Invalid header line: {0}")]
    InvalidHeader(String),

    #[error("Invalid Content-Length: {0}")]
    InvalidContentLength(String),

    #[error("Invalid chunk size line: {0}")]
    InvalidChunkSize(String),

    #[error("Line of {0} bytes exceeds limit")]
    LineTooLong(usize),
}

/// Failure of a single request
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Connection failed: {0}")]
    Connect(#[from] NetError),

    #[error("HTTP status {status}")]
    Status { status: u16, body: Vec<u8> },

    #[error("Rate limited; retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Malformed response: {0}")]
    Parse(#[from] ParseError),

    #[error("Connection closed before a response arrived")]
    ConnectionClosed,
}

impl HttpError {
    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

pub type HttpResult<T> = Result<T, HttpError>;
