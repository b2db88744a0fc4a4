//! Bot client
//!
//! Discovers the gateway through the REST API, then creates and starts the
//! shards.

mod rest;

pub use rest::{user_agent, ApiCallback, ApiClient, ApiError, ApiResult};

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use cord_io::Reactor;
use tracing::{error, info, warn};

use crate::config::ClientConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::events::SharedEventHandler;
use crate::protocol::{api_query, GatewayInfo};
use crate::shard::Shard;

const GATEWAY_ENDPOINT: &str = "/gateway/bot";

struct ClientInner {
    config: ClientConfig,
    api: ApiClient,
    shards: Vec<Shard>,
    events: SharedEventHandler,
    failure: Option<GatewayError>,
}

#[derive(Clone)]
pub struct Client {
    inner: Rc<RefCell<ClientInner>>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Client")
            .field("api", &inner.api)
            .field("shards", &inner.shards)
            .finish()
    }
}

impl Client {
    pub fn new(config: ClientConfig, events: SharedEventHandler) -> Self {
        let api = ApiClient::new(&config.api_base, &config.token, config.api_version);
        Self {
            inner: Rc::new(RefCell::new(ClientInner {
                config,
                api,
                shards: Vec::new(),
                events,
                failure: None,
            })),
        }
    }

    pub fn api(&self) -> ApiClient {
        self.inner.borrow().api.clone()
    }

    pub fn shards(&self) -> Vec<Shard> {
        self.inner.borrow().shards.clone()
    }

    /// Ask `/gateway/bot` where to connect, then start the shards
    ///
    /// Discovery failures are retried after `login_retry`; a rejected token
    /// stops the reactor.
    pub fn login(&self, reactor: &mut Reactor) -> GatewayResult<()> {
        let client = self.clone();
        self.api().get(reactor, GATEWAY_ENDPOINT, move |reactor, result| {
            let info = result.and_then(|body| Ok(serde_json::from_value::<GatewayInfo>(body)?));
            match info {
                Ok(info) => client.start_shards(reactor, &info),
                Err(e) if matches!(e.status(), Some(401 | 403)) => {
                    error!(error = %e, "Token rejected");
                    client.inner.borrow_mut().failure = Some(GatewayError::Unauthorized(e));
                    reactor.stop();
                }
                Err(e) => {
                    warn!(error = %e, "Gateway discovery failed");
                    client.retry_login(reactor);
                }
            }
        })?;
        Ok(())
    }

    fn retry_login(&self, reactor: &mut Reactor) {
        let delay = self.inner.borrow().config.login_retry;
        let client = self.clone();
        reactor.schedule(delay, move |reactor| {
            if let Err(e) = client.login(reactor) {
                warn!(error = %e, "Gateway discovery failed");
                client.retry_login(reactor);
            }
        });
    }

    /// Create shards `0..n` and connect each to `info.url`
    ///
    /// `n` is the configured count, or the count from `info` when unset.
    pub fn start_shards(&self, reactor: &mut Reactor, info: &GatewayInfo) {
        let shards = {
            let mut inner = self.inner.borrow_mut();
            if !inner.shards.is_empty() {
                warn!(count = inner.shards.len(), "Shards already running");
                return;
            }

            let count = inner.config.shards.unwrap_or(info.shards).max(1);
            let url = format!("{}{}", info.url, api_query(inner.config.api_version));
            info!(count, url = %url, "Starting shards");

            let shards: Vec<Shard> = (0..count)
                .map(|id| {
                    Shard::new(
                        id,
                        count,
                        url.clone(),
                        inner.config.shard.clone(),
                        Rc::clone(&inner.events),
                    )
                })
                .collect();
            inner.shards.clone_from(&shards);
            shards
        };

        for shard in shards {
            shard.start(reactor);
        }
    }

    /// Log in and drive the reactor until it is stopped
    pub fn run(&self, reactor: &mut Reactor) -> GatewayResult<()> {
        self.login(reactor)?;
        reactor.run()?;
        match self.inner.borrow_mut().failure.take() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    /// Stop every shard and drop cached HTTP connections
    pub fn shutdown(&self, reactor: &mut Reactor) {
        let (shards, api) = {
            let inner = self.inner.borrow();
            (inner.shards.clone(), inner.api.clone())
        };
        for shard in shards {
            shard.stop(reactor);
        }
        api.http().close_all(reactor);
    }
}
