//! Parsed connection target

use std::fmt;
use std::str::FromStr;

use url::{Host, Url};

use crate::error::{NetError, NetResult};

/// Connection target extracted from a URL
///
/// `path` is never empty and `query` carries its leading `?` when present.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Uri {
    scheme: String,
    host: String,
    port: u16,
    path: String,
    query: String,
    tls: bool,
}

impl Uri {
    /// Parse an absolute URL such as `wss://gateway.example/?v=6`
    pub fn parse(input: &str) -> NetResult<Self> {
        let url = Url::parse(input.trim())
            .map_err(|e| NetError::InvalidUri(input.to_string(), e.to_string()))?;

        let scheme = url.scheme().to_ascii_lowercase();
        let tls = matches!(scheme.as_str(), "https" | "wss");

        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => {
                return Err(NetError::InvalidUri(
                    input.to_string(),
                    "missing host".to_string(),
                ))
            }
        };

        let port = url.port().unwrap_or(if tls { 443 } else { 80 });
        let path = match url.path() {
            "" => "/".to_string(),
            path => path.to_string(),
        };
        let query = url
            .query()
            .filter(|q| !q.is_empty())
            .map(|q| format!("?{q}"))
            .unwrap_or_default();

        Ok(Self {
            scheme,
            host,
            port,
            path,
            query,
            tls,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// Path plus query, as written on a request line
    pub fn request_target(&self) -> String {
        format!("{}{}", self.path, self.query)
    }

    /// `host:port`, as written in a `Host` header
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Connection cache key, `scheme://host:port`
    pub fn route_key(&self) -> String {
        format!("{}://{}", self.scheme, self.authority())
    }
}

impl FromStr for Uri {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.route_key(), self.request_target())
    }
}
