//! REST API controller
//!
//! Wraps [`HttpClient`] with the bot's authorization, the library user agent
//! and JSON bodies.

use std::fmt;

use cord_io::http::{HttpClient, HttpError, HttpRequest, Method};
use cord_io::{NetError, Reactor, Uri};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::protocol::api_query;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Net(#[from] NetError),
}

impl ApiError {
    /// HTTP status of a non-2xx response
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http(e) => e.status(),
            _ => None,
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Completion callback receiving the decoded JSON body
pub type ApiCallback = Box<dyn FnOnce(&mut Reactor, ApiResult<Value>)>;

/// `User-Agent` sent with every request
pub fn user_agent() -> String {
    format!(
        "DiscordBot ({}, {})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )
}

#[derive(Clone)]
pub struct ApiClient {
    http: HttpClient,
    base: String,
    token: String,
    version: u8,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base", &self.base)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(base: impl Into<String>, token: impl Into<String>, version: u8) -> Self {
        Self {
            http: HttpClient::new(),
            base: base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            version,
        }
    }

    /// Underlying connection cache
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Full URL for `endpoint`
    pub fn url(&self, endpoint: &str) -> String {
        format!("{}{}{}", self.base, endpoint, api_query(self.version))
    }

    /// Issue a request; an empty response body arrives as `Value::Null`
    pub fn request<F>(
        &self,
        reactor: &mut Reactor,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
        callback: F,
    ) -> ApiResult<()>
    where
        F: FnOnce(&mut Reactor, ApiResult<Value>) + 'static,
    {
        let request = self.build(method, endpoint, body)?;
        debug!(method = %method, endpoint, "API request");

        self.http.request(reactor, request, move |reactor, result| {
            let decoded = result
                .map_err(ApiError::from)
                .and_then(|response| parse_body(&response.body));
            callback(reactor, decoded);
        })?;
        Ok(())
    }

    pub fn get<F>(&self, reactor: &mut Reactor, endpoint: &str, callback: F) -> ApiResult<()>
    where
        F: FnOnce(&mut Reactor, ApiResult<Value>) + 'static,
    {
        self.request(reactor, Method::Get, endpoint, None, callback)
    }

    pub fn post<F>(&self, reactor: &mut Reactor, endpoint: &str, body: &Value, callback: F) -> ApiResult<()>
    where
        F: FnOnce(&mut Reactor, ApiResult<Value>) + 'static,
    {
        self.request(reactor, Method::Post, endpoint, Some(body), callback)
    }

    pub fn put<F>(&self, reactor: &mut Reactor, endpoint: &str, body: &Value, callback: F) -> ApiResult<()>
    where
        F: FnOnce(&mut Reactor, ApiResult<Value>) + 'static,
    {
        self.request(reactor, Method::Put, endpoint, Some(body), callback)
    }

    pub fn patch<F>(&self, reactor: &mut Reactor, endpoint: &str, body: &Value, callback: F) -> ApiResult<()>
    where
        F: FnOnce(&mut Reactor, ApiResult<Value>) + 'static,
    {
        self.request(reactor, Method::Patch, endpoint, Some(body), callback)
    }

    pub fn delete<F>(&self, reactor: &mut Reactor, endpoint: &str, callback: F) -> ApiResult<()>
    where
        F: FnOnce(&mut Reactor, ApiResult<Value>) + 'static,
    {
        self.request(reactor, Method::Delete, endpoint, None, callback)
    }

    fn build(&self, method: Method, endpoint: &str, body: Option<&Value>) -> ApiResult<HttpRequest> {
        let uri = Uri::parse(&self.url(endpoint))?;
        let mut request = HttpRequest::new(method, uri)
            .with_header("Authorization", format!("Bot {}", self.token))
            .with_header("User-Agent", user_agent());
        if let Some(body) = body {
            request = request
                .with_header("Content-Type", "application/json")
                .with_body(serde_json::to_vec(body)?);
        }
        Ok(request)
    }
}

fn parse_body(body: &[u8]) -> ApiResult<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(body)?)
}
