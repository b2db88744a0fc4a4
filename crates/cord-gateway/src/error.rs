//! Gateway client errors

use thiserror::Error;

use crate::client::ApiError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Network error: {0}")]
    Net(#[from] cord_io::NetError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// The API refused the token
    #[error("Unauthorized: {0}")]
    Unauthorized(ApiError),
}

pub type GatewayResult<T> = Result<T, GatewayError>;
