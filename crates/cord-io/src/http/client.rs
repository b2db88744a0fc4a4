//! HTTP/1.1 client with per-host connection reuse
//!
//! Each `scheme://host:port` gets at most one live connection (a route).
//! Requests to a host with a route are queued on it and answered in order;
//! the route is created as soon as the connection is spawned so concurrent
//! requests never open a second connection.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, trace, warn};

use super::error::{HttpError, HttpResult};
use super::request::{HttpRequest, Method};
use super::response::{HttpResponse, ResponseParser};
use crate::reactor::Reactor;
use crate::slots::SocketId;
use crate::socket::{CloseReason, SocketHandler};
use crate::uri::Uri;

/// Completion callback; runs exactly once per request
pub type ResponseCallback = Box<dyn FnOnce(&mut Reactor, HttpResult<HttpResponse>)>;

const MAX_REPLAYS: u8 = 1;
const STATUS_TOO_MANY_REQUESTS: u16 = 429;

#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Delay before the 429 retry when the response names none
    pub default_retry_after: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            default_retry_after: Duration::from_secs(1),
        }
    }
}

struct PendingRequest {
    request: HttpRequest,
    callback: ResponseCallback,
    sent: bool,
    rate_limited: bool,
    replays: u8,
}

struct HostRoute {
    socket: SocketId,
    connected: bool,
    pending: VecDeque<PendingRequest>,
    parser: ResponseParser,
}

struct ClientState {
    routes: HashMap<String, HostRoute>,
    config: HttpConfig,
}

impl ClientState {
    fn route_mut(&mut self, key: &str, socket: SocketId) -> Option<&mut HostRoute> {
        self.routes
            .get_mut(key)
            .filter(|route| route.socket == socket)
    }
}

#[derive(Default)]
struct Absorbed {
    completed: Vec<(PendingRequest, HttpResponse)>,
    failed: Vec<(PendingRequest, HttpError)>,
    orphans: Vec<PendingRequest>,
    teardown: bool,
}

/// Shared handle to the connection cache
#[derive(Clone)]
pub struct HttpClient {
    inner: Rc<RefCell<ClientState>>,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.borrow();
        f.debug_struct("HttpClient")
            .field("routes", &state.routes.keys().collect::<Vec<_>>())
            .field("config", &state.config)
            .finish()
    }
}

impl HttpClient {
    pub fn new() -> Self {
        Self::with_config(HttpConfig::default())
    }

    pub fn with_config(config: HttpConfig) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ClientState {
                routes: HashMap::new(),
                config,
            })),
        }
    }

    /// Send `request`; `callback` receives the response once it is complete
    ///
    /// 2xx responses arrive as `Ok`, anything else as an error. A failure to
    /// open a connection is returned here and the callback is dropped unrun.
    pub fn request<F>(&self, reactor: &mut Reactor, request: HttpRequest, callback: F) -> HttpResult<()>
    where
        F: FnOnce(&mut Reactor, HttpResult<HttpResponse>) + 'static,
    {
        let pending = PendingRequest {
            request,
            callback: Box::new(callback),
            sent: false,
            rate_limited: false,
            replays: 0,
        };
        self.submit(reactor, pending).map_err(|(error, _)| error)
    }

    /// Number of hosts with a cached connection
    pub fn cached_routes(&self) -> usize {
        self.inner.borrow().routes.len()
    }

    pub fn is_cached(&self, uri: &Uri) -> bool {
        self.inner.borrow().routes.contains_key(&uri.route_key())
    }

    /// Socket currently serving the host of `uri`
    pub fn route_socket(&self, uri: &Uri) -> Option<SocketId> {
        self.inner
            .borrow()
            .routes
            .get(&uri.route_key())
            .map(|route| route.socket)
    }

    /// Close every cached connection
    pub fn close_all(&self, reactor: &mut Reactor) {
        let sockets: Vec<SocketId> = self
            .inner
            .borrow()
            .routes
            .values()
            .map(|route| route.socket)
            .collect();
        for socket in sockets {
            reactor.close(socket, CloseReason::Requested(0));
        }
    }

    fn submit(
        &self,
        reactor: &mut Reactor,
        mut pending: PendingRequest,
    ) -> Result<(), (HttpError, PendingRequest)> {
        let key = pending.request.uri.route_key();
        for orphan in self.evict_stale(reactor, &key) {
            self.replay(reactor, orphan);
        }

        let mut state = self.inner.borrow_mut();
        if let Some(route) = state.routes.get_mut(&key) {
            if route.connected {
                match reactor.write(route.socket, pending.request.serialize()) {
                    Ok(()) => pending.sent = true,
                    // the close notification replays it
                    Err(e) => debug!(host = %key, error = %e, "Write to cached route failed"),
                }
            }
            trace!(host = %key, queued = route.pending.len() + 1, "Request queued on cached route");
            route.pending.push_back(pending);
            return Ok(());
        }

        let handler = RouteHandler {
            client: Rc::downgrade(&self.inner),
            key: key.clone(),
        };
        match reactor.spawn(&pending.request.uri, Box::new(handler)) {
            Ok(socket) => {
                debug!(host = %key, socket = %socket, "Opening route");
                state.routes.insert(
                    key,
                    HostRoute {
                        socket,
                        connected: false,
                        pending: VecDeque::from([pending]),
                        parser: ResponseParser::new(),
                    },
                );
                Ok(())
            }
            Err(e) => {
                warn!(host = %key, error = %e, "Failed to open route");
                Err((HttpError::Connect(e), pending))
            }
        }
    }

    /// Drop a route whose socket is already gone, returning its queue
    fn evict_stale(&self, reactor: &Reactor, key: &str) -> Vec<PendingRequest> {
        let mut state = self.inner.borrow_mut();
        let stale = state
            .routes
            .get(key)
            .is_some_and(|route| !reactor.is_alive(route.socket));
        if !stale {
            return Vec::new();
        }
        state
            .routes
            .remove(key)
            .map(|route| route.pending.into_iter().collect())
            .unwrap_or_default()
    }

    fn resubmit(&self, reactor: &mut Reactor, pending: PendingRequest) {
        if let Err((error, pending)) = self.submit(reactor, pending) {
            (pending.callback)(reactor, Err(error));
        }
    }

    /// Send a request again after its connection was lost
    fn replay(&self, reactor: &mut Reactor, mut pending: PendingRequest) {
        let unsafe_to_repeat = pending.sent && !pending.request.method.is_idempotent();
        if pending.replays >= MAX_REPLAYS || unsafe_to_repeat {
            (pending.callback)(reactor, Err(HttpError::ConnectionClosed));
            return;
        }
        debug!(uri = %pending.request.uri, "Replaying request on a fresh connection");
        pending.replays += 1;
        pending.sent = false;
        self.resubmit(reactor, pending);
    }

    fn on_connected(&self, reactor: &mut Reactor, key: &str, socket: SocketId) {
        let mut state = self.inner.borrow_mut();
        let Some(route) = state.route_mut(key, socket) else {
            return;
        };
        route.connected = true;

        for pending in route.pending.iter_mut().filter(|pending| !pending.sent) {
            if let Err(e) = reactor.write(socket, pending.request.serialize()) {
                warn!(host = %key, error = %e, "Failed to write queued request");
                break;
            }
            pending.sent = true;
        }
    }

    fn absorb(&self, key: &str, socket: SocketId, data: &[u8]) -> Absorbed {
        let mut absorbed = Absorbed::default();
        let mut state = self.inner.borrow_mut();
        let Some(route) = state.route_mut(key, socket) else {
            return absorbed;
        };

        let mut offset = 0;
        while offset < data.len() {
            let head = route
                .pending
                .front()
                .is_some_and(|pending| pending.request.method == Method::Head);
            route.parser.set_head_request(head);
            match route.parser.feed(&data[offset..]) {
                Ok(used) => offset += used,
                Err(e) => {
                    warn!(host = %key, error = %e, "Malformed response");
                    if let Some(pending) = route.pending.pop_front() {
                        absorbed.failed.push((pending, e.into()));
                    }
                    absorbed.teardown = true;
                    break;
                }
            }

            let Some(response) = route.parser.take() else {
                break;
            };
            let keep_alive = response.keep_alive();
            match route.pending.pop_front() {
                Some(pending) => absorbed.completed.push((pending, response)),
                None => warn!(host = %key, status = response.status, "Unsolicited response"),
            }
            if !keep_alive {
                absorbed.teardown = true;
                break;
            }
        }

        if absorbed.teardown {
            if let Some(route) = state.routes.remove(key) {
                absorbed.orphans.extend(route.pending);
            }
        }
        absorbed
    }

    fn release(&self, key: &str, socket: SocketId, reason: &CloseReason) -> Absorbed {
        let mut absorbed = Absorbed::default();
        let mut state = self.inner.borrow_mut();
        if state.route_mut(key, socket).is_none() {
            return absorbed;
        }
        let Some(mut route) = state.routes.remove(key) else {
            return absorbed;
        };
        debug!(host = %key, socket = %socket, reason = %reason, "Route closed");

        if route.parser.finish_eof() {
            if let (Some(response), Some(pending)) = (route.parser.take(), route.pending.pop_front()) {
                absorbed.completed.push((pending, response));
            }
        }
        absorbed.orphans.extend(route.pending);
        absorbed
    }

    fn deliver(&self, reactor: &mut Reactor, absorbed: Absorbed) {
        for (pending, response) in absorbed.completed {
            self.complete(reactor, pending, response);
        }
        for (pending, error) in absorbed.failed {
            (pending.callback)(reactor, Err(error));
        }
        for orphan in absorbed.orphans {
            self.replay(reactor, orphan);
        }
    }

    fn complete(&self, reactor: &mut Reactor, mut pending: PendingRequest, response: HttpResponse) {
        if response.status == STATUS_TOO_MANY_REQUESTS {
            let fallback = self.inner.borrow().config.default_retry_after;
            let retry_after = retry_after(&response, fallback);
            if pending.rate_limited {
                (pending.callback)(reactor, Err(HttpError::RateLimited { retry_after }));
                return;
            }

            warn!(
                uri = %pending.request.uri,
                retry_after_ms = retry_after.as_millis() as u64,
                "Rate limited; retrying once"
            );
            pending.rate_limited = true;
            pending.sent = false;
            let client = self.clone();
            reactor.schedule(retry_after, move |reactor| client.resubmit(reactor, pending));
            return;
        }

        let result = if response.is_success() {
            Ok(response)
        } else {
            Err(HttpError::Status {
                status: response.status,
                body: response.body,
            })
        };
        (pending.callback)(reactor, result);
    }
}

/// Delay requested by a 429: `retry_after` (ms) in the JSON body, else the
/// `Retry-After` header (seconds), else `fallback`
fn retry_after(response: &HttpResponse, fallback: Duration) -> Duration {
    let from_body = response
        .json::<Value>()
        .ok()
        .and_then(|body| body.get("retry_after").and_then(Value::as_f64))
        .filter(|ms| ms.is_finite() && *ms >= 0.0)
        .map(|ms| Duration::from_millis(ms.ceil() as u64));

    from_body
        .or_else(|| {
            response
                .header("Retry-After")
                .and_then(|value| value.trim().parse::<f64>().ok())
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(Duration::from_secs_f64)
        })
        .unwrap_or(fallback)
}

struct RouteHandler {
    client: Weak<RefCell<ClientState>>,
    key: String,
}

impl RouteHandler {
    fn client(&self) -> Option<HttpClient> {
        self.client.upgrade().map(|inner| HttpClient { inner })
    }
}

impl SocketHandler for RouteHandler {
    fn on_connect(&mut self, reactor: &mut Reactor, socket: SocketId) {
        match self.client() {
            Some(client) => client.on_connected(reactor, &self.key, socket),
            None => reactor.close(socket, CloseReason::Requested(0)),
        }
    }

    fn on_read(&mut self, reactor: &mut Reactor, socket: SocketId, data: &[u8]) {
        let Some(client) = self.client() else {
            reactor.close(socket, CloseReason::Requested(0));
            return;
        };

        let absorbed = client.absorb(&self.key, socket, data);
        if absorbed.teardown {
            reactor.close(socket, CloseReason::Requested(0));
        }
        client.deliver(reactor, absorbed);
    }

    fn on_close(&mut self, reactor: &mut Reactor, socket: SocketId, reason: &CloseReason) {
        if let Some(client) = self.client() {
            let absorbed = client.release(&self.key, socket, reason);
            client.deliver(reactor, absorbed);
        }
    }
}
