//! HTTP/1.1 client
//!
//! Requests are serialized by [`HttpRequest`], answered through a streaming
//! [`ResponseParser`], and multiplexed over cached per-host connections by
//! [`HttpClient`].

mod client;
mod error;
mod request;
mod response;

pub use client::{HttpClient, HttpConfig, ResponseCallback};
pub use error::{HttpError, HttpResult, ParseError};
pub use request::{Headers, HttpRequest, Method};
pub use response::{HttpResponse, ResponseParser};
