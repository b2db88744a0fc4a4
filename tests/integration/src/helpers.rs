//! Test helpers for integration tests
//!
//! Loopback mock servers run on a background tokio runtime while the reactor
//! under test is driven on the test thread.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::Result;
use cord_io::{Reactor, ReactorConfig};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as TungsteniteError, Message};
use tokio_tungstenite::WebSocketStream;

/// Install a test subscriber once; later calls are no-ops
pub fn init_logging() {
    let _ = cord_common::try_init_tracing();
}

/// Reactor with a short poll timeout
pub fn test_reactor() -> Reactor {
    Reactor::new(ReactorConfig {
        poll_timeout: Duration::from_millis(5),
        ..ReactorConfig::default()
    })
    .expect("reactor")
}

/// Turn the reactor until `done` holds or `timeout` passes
pub fn drive_until(reactor: &mut Reactor, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        reactor.turn(Duration::from_millis(5)).expect("reactor turn");
    }
    done()
}

/// Turn the reactor for a fixed time
pub fn drive_for(reactor: &mut Reactor, duration: Duration) {
    drive_until(reactor, duration, || false);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn runtime() -> Result<Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?)
}

// ============================================================================
// HTTP
// ============================================================================

/// A request as seen by [`MockHttpServer`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Index of the connection it arrived on
    pub connection: usize,
    pub received_at: Instant,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Canned response
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Drop the connection instead of answering
    pub drop: bool,
}

impl MockResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            drop: false,
        }
    }

    /// Read the request, then close the connection without a response
    pub fn dropped() -> Self {
        Self {
            drop: true,
            ..Self::new(0, "")
        }
    }

    pub fn json(status: u16, value: &Value) -> Self {
        Self::new(status, value.to_string()).with_header("Content-Type", "application/json")
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Ask the client to drop the connection after this response
    pub fn closing(self) -> Self {
        self.with_header("Connection", "close")
    }

    fn closes(&self) -> bool {
        self.headers
            .iter()
            .any(|(k, v)| k.eq_ignore_ascii_case("connection") && v.eq_ignore_ascii_case("close"))
    }

    /// Wire form; a HEAD answer keeps the body's `Content-Length` but not the body
    fn to_bytes(&self, head_request: bool) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, reason(self.status));
        for (name, value) in &self.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str(&format!("Content-Length: {}\r\n\r\n", self.body.len()));
        let mut bytes = head.into_bytes();
        if !head_request {
            bytes.extend_from_slice(&self.body);
        }
        bytes
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        401 => "Unauthorized",
        404 => "Not Found",
        429 => "Too Many Requests",
        _ => "Status",
    }
}

type Responder = dyn Fn(&RecordedRequest, usize) -> MockResponse + Send + Sync;

struct HttpShared {
    connections: AtomicUsize,
    requests: Mutex<Vec<RecordedRequest>>,
    responder: Box<Responder>,
}

/// Keep-alive HTTP/1.1 server answering with a closure
///
/// The closure receives each request and its index across all connections.
pub struct MockHttpServer {
    addr: SocketAddr,
    shared: Arc<HttpShared>,
    _runtime: Runtime,
}

impl MockHttpServer {
    pub fn start<F>(responder: F) -> Result<Self>
    where
        F: Fn(&RecordedRequest, usize) -> MockResponse + Send + Sync + 'static,
    {
        let runtime = runtime()?;
        let listener = runtime.block_on(TcpListener::bind("127.0.0.1:0"))?;
        let addr = listener.local_addr()?;
        let shared = Arc::new(HttpShared {
            connections: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        });

        let accept_shared = Arc::clone(&shared);
        runtime.spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let connection = accept_shared.connections.fetch_add(1, Ordering::SeqCst);
                let shared = Arc::clone(&accept_shared);
                tokio::spawn(async move {
                    serve_http(stream, connection, shared).await.ok();
                });
            }
        });

        Ok(Self {
            addr,
            shared,
            _runtime: runtime,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.shared.requests).clone()
    }
}

async fn serve_http(stream: TcpStream, connection: usize, shared: Arc<HttpShared>) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    loop {
        let mut request_line = String::new();
        if reader.read_line(&mut request_line).await? == 0 {
            return Ok(());
        }
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default().to_string();
        let target = parts.next().unwrap_or_default().to_string();

        let mut headers = Vec::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_string(), value.trim().to_string()));
            }
        }

        let length = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.parse::<usize>().ok())
            .unwrap_or(0);
        let mut body = vec![0; length];
        reader.read_exact(&mut body).await?;

        let request = RecordedRequest {
            method,
            target,
            headers,
            body,
            connection,
            received_at: Instant::now(),
        };
        let index = {
            let mut requests = lock(&shared.requests);
            requests.push(request.clone());
            requests.len() - 1
        };

        let response = (shared.responder)(&request, index);
        if response.drop {
            return Ok(());
        }
        write
            .write_all(&response.to_bytes(request.method == "HEAD"))
            .await?;
        if response.closes() {
            write.shutdown().await?;
            return Ok(());
        }
    }
}

// ============================================================================
// Gateway
// ============================================================================

/// What the mock gateway does in reaction to an event
#[derive(Debug, Clone)]
pub enum GatewayAction {
    /// Send a JSON text frame
    Send(Value),
    /// Send a CLOSE frame with this code and stop serving
    Close(u16),
    /// Send a PING frame with this payload
    Ping(Vec<u8>),
    /// Drop the TCP connection without a CLOSE frame
    Drop,
}

type ConnectScript = dyn Fn(usize) -> Vec<GatewayAction> + Send + Sync;
type MessageScript = dyn Fn(usize, &Value) -> Vec<GatewayAction> + Send + Sync;

struct GatewayShared {
    connections: AtomicUsize,
    received: Mutex<Vec<(usize, Value)>>,
    pongs: Mutex<Vec<(usize, Vec<u8>)>>,
    /// Server-initiated closes and whether the client answered them
    close_handshakes: Mutex<Vec<(usize, bool)>>,
    on_connect: Box<ConnectScript>,
    on_message: Box<MessageScript>,
}

/// WebSocket gateway driven by two scripts
///
/// `on_connect` runs after each upgrade with the connection index;
/// `on_message` runs for every JSON frame the client sends.
pub struct MockGateway {
    addr: SocketAddr,
    shared: Arc<GatewayShared>,
    _runtime: Runtime,
}

impl MockGateway {
    pub fn start<C, M>(on_connect: C, on_message: M) -> Result<Self>
    where
        C: Fn(usize) -> Vec<GatewayAction> + Send + Sync + 'static,
        M: Fn(usize, &Value) -> Vec<GatewayAction> + Send + Sync + 'static,
    {
        let runtime = runtime()?;
        let listener = runtime.block_on(TcpListener::bind("127.0.0.1:0"))?;
        let addr = listener.local_addr()?;
        let shared = Arc::new(GatewayShared {
            connections: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
            pongs: Mutex::new(Vec::new()),
            close_handshakes: Mutex::new(Vec::new()),
            on_connect: Box::new(on_connect),
            on_message: Box::new(on_message),
        });

        let accept_shared = Arc::clone(&shared);
        runtime.spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let shared = Arc::clone(&accept_shared);
                tokio::spawn(async move {
                    serve_gateway(stream, shared).await.ok();
                });
            }
        });

        Ok(Self {
            addr,
            shared,
            _runtime: runtime,
        })
    }

    /// `ws://` URL without query
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Upgraded connections so far
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Every frame received, tagged with its connection index
    pub fn received(&self) -> Vec<(usize, Value)> {
        lock(&self.shared.received).clone()
    }

    /// Frames received on one connection
    pub fn received_on(&self, connection: usize) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter(|(index, _)| *index == connection)
            .map(|(_, value)| value)
            .collect()
    }

    /// PONG payloads received, tagged with their connection index
    pub fn pongs(&self) -> Vec<(usize, Vec<u8>)> {
        lock(&self.shared.pongs).clone()
    }

    /// For each `Close` action: the connection and whether the client
    /// completed the closing handshake
    pub fn close_handshakes(&self) -> Vec<(usize, bool)> {
        lock(&self.shared.close_handshakes).clone()
    }

    /// Frames with the given op across all connections
    pub fn received_op(&self, op: u64) -> Vec<(usize, Value)> {
        self.received()
            .into_iter()
            .filter(|(_, value)| value["op"].as_u64() == Some(op))
            .collect()
    }
}

async fn serve_gateway(stream: TcpStream, shared: Arc<GatewayShared>) -> Result<()> {
    let mut ws = tokio_tungstenite::accept_async(stream).await?;
    let connection = shared.connections.fetch_add(1, Ordering::SeqCst);

    for action in (shared.on_connect)(connection) {
        if !apply(&mut ws, &shared, connection, action).await {
            return Ok(());
        }
    }

    while let Some(message) = ws.next().await {
        let text = match message? {
            Message::Text(text) => text,
            Message::Pong(payload) => {
                lock(&shared.pongs).push((connection, payload));
                continue;
            }
            Message::Close(_) => return Ok(()),
            _ => continue,
        };
        let Ok(value) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        lock(&shared.received).push((connection, value.clone()));

        for action in (shared.on_message)(connection, &value) {
            if !apply(&mut ws, &shared, connection, action).await {
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Carry out one action; false once the connection is finished
async fn apply(
    ws: &mut WebSocketStream<TcpStream>,
    shared: &GatewayShared,
    connection: usize,
    action: GatewayAction,
) -> bool {
    match action {
        GatewayAction::Send(value) => ws.send(Message::Text(value.to_string())).await.is_ok(),
        GatewayAction::Ping(payload) => ws.send(Message::Ping(payload)).await.is_ok(),
        GatewayAction::Close(code) => {
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: "".into(),
            };
            let _ = ws.close(Some(frame)).await;
            let answered = tokio::time::timeout(Duration::from_millis(500), closing_handshake(ws))
                .await
                .unwrap_or(false);
            lock(&shared.close_handshakes).push((connection, answered));
            false
        }
        GatewayAction::Drop => false,
    }
}

/// Wait for the client's CLOSE reply; false if the stream broke instead
async fn closing_handshake(ws: &mut WebSocketStream<TcpStream>) -> bool {
    loop {
        match ws.next().await {
            Some(Ok(Message::Close(_))) | None => return true,
            Some(Ok(_)) => {}
            Some(Err(TungsteniteError::ConnectionClosed)) => return true,
            Some(Err(_)) => return false,
        }
    }
}
