//! Handler error types

use thiserror::Error;

use crate::protocol::{CloseCode, OpCode};

#[derive(Debug, Error)]
pub enum HandlerError {
    /// Envelope is not valid JSON or names an unknown op
    #[error("Undecodable message: {0}")]
    Decode(#[from] serde_json::Error),

    /// Known op whose `d` does not have the expected shape
    #[error("Invalid {op} payload: {reason}")]
    InvalidPayload { op: OpCode, reason: String },
}

impl HandlerError {
    pub(crate) fn invalid(op: OpCode, reason: impl ToString) -> Self {
        Self::InvalidPayload {
            op,
            reason: reason.to_string(),
        }
    }

    /// Status to close with when the error ends the connection
    #[must_use]
    pub fn to_close_code(&self) -> CloseCode {
        match self {
            Self::Decode(_) => CloseCode::DecodeError,
            Self::InvalidPayload { .. } => CloseCode::UnknownError,
        }
    }

    /// Drop the message and keep the connection
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

pub type HandlerResult<T> = Result<T, HandlerError>;
