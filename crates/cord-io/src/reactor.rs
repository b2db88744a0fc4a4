//! Single-threaded event loop
//!
//! The reactor owns the mio poller, the timer queue and every socket. One
//! tick polls readiness, runs due timers, then services each ready socket:
//! connect completion and TLS handshake, outbound flush, then reads. Close
//! notifications are queued and delivered between callbacks, never from
//! inside one.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cord_common::ReactorSettings;
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token, Waker};
use rustls::ClientConfig;
use tracing::{debug, info, trace, warn};

use crate::error::{NetError, NetResult};
use crate::slots::{SlotTable, SocketId};
use crate::socket::{CloseReason, Socket, SocketHandler};
use crate::timer::{TimerHandle, TimerQueue};
use crate::tls::{self, Handshake, Transport};
use crate::uri::Uri;

const WAKER: Token = Token(usize::MAX);

/// Reactor tuning
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Upper bound on a single poll wait
    pub poll_timeout: Duration,
    /// Readiness events fetched per poll
    pub max_events: usize,
    /// Scratch buffer size for socket reads
    pub read_chunk: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(10),
            max_events: 128,
            read_chunk: 64 * 1024,
        }
    }
}

impl From<&ReactorSettings> for ReactorConfig {
    fn from(settings: &ReactorSettings) -> Self {
        Self {
            poll_timeout: Duration::from_millis(settings.poll_timeout_ms),
            max_events: settings.max_events.max(1),
            read_chunk: settings.read_chunk.max(1024),
        }
    }
}

/// Thread-safe handle that stops a running reactor
#[derive(Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "Failed to wake reactor");
        }
    }
}

impl fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopHandle")
            .field("stopped", &self.flag.load(Ordering::SeqCst))
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
struct Readiness {
    token: Token,
    readable: bool,
    error: bool,
}

struct ClosedSocket {
    id: SocketId,
    handler: Option<Box<dyn SocketHandler>>,
    reason: CloseReason,
}

enum ConnectProgress {
    Connected,
    Pending,
    Failed(CloseReason),
}

/// The event loop
pub struct Reactor {
    poll: Poll,
    events: Events,
    ready: Vec<Readiness>,
    config: ReactorConfig,
    sockets: SlotTable<Socket>,
    timers: TimerQueue<Reactor>,
    closed: VecDeque<ClosedSocket>,
    scratch: Vec<u8>,
    tls: Option<Arc<ClientConfig>>,
    stop_flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
    running: bool,
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("config", &self.config)
            .field("sockets", &self.sockets.len())
            .field("timers", &self.timers.len())
            .field("running", &self.running)
            .finish()
    }
}

impl Reactor {
    pub fn new(config: ReactorConfig) -> NetResult<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        Ok(Self {
            events: Events::with_capacity(config.max_events),
            ready: Vec::with_capacity(config.max_events),
            scratch: vec![0; config.read_chunk],
            poll,
            config,
            sockets: SlotTable::new(),
            timers: TimerQueue::new(),
            closed: VecDeque::new(),
            tls: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            waker,
            running: false,
        })
    }

    /// Use a custom TLS configuration for `https`/`wss` sockets
    pub fn set_tls_config(&mut self, config: Arc<ClientConfig>) {
        self.tls = Some(config);
    }

    pub fn config(&self) -> &ReactorConfig {
        &self.config
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.stop_flag),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Stop after the current tick
    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Run `callback` on the reactor thread once `delay` has elapsed
    pub fn schedule<F>(&mut self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce(&mut Reactor) + 'static,
    {
        self.timers.schedule(delay, callback)
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Open a client connection to `uri`, wrapped in TLS when the scheme asks for it
    ///
    /// Resolution happens here, once; the connect itself completes on a later tick.
    pub fn spawn(&mut self, uri: &Uri, handler: Box<dyn SocketHandler>) -> NetResult<SocketId> {
        let addr = resolve(uri)?;
        let stream = TcpStream::connect(addr)?;
        if let Err(e) = stream.set_nodelay(true) {
            trace!(error = %e, "TCP_NODELAY not applied");
        }

        let transport = if uri.is_tls() {
            Transport::tls(stream, self.tls_config()?, uri.host())?
        } else {
            Transport::plain(stream)
        };

        let registry = self.poll.registry();
        let id = self.sockets.insert_with(|id| {
            let mut socket = Socket::new(transport, handler);
            registry.register(
                socket.transport.stream_mut(),
                Token(id.slot()),
                socket.interest,
            )?;
            Ok::<_, io::Error>(socket)
        })?;

        debug!(socket = %id, host = uri.host(), port = uri.port(), tls = uri.is_tls(), "Socket spawned");
        Ok(id)
    }

    /// Queue bytes for sending; never blocks
    pub fn write(&mut self, id: SocketId, bytes: impl Into<Vec<u8>>) -> NetResult<()> {
        let socket = self.sockets.get_mut(id).ok_or(NetError::SocketGone(id))?;
        socket.enqueue(bytes.into());
        if !socket.connected {
            // flushed once the connect completes
            return Ok(());
        }

        // re-arm even when unchanged: edge-triggered writability may already have fired
        if let Err(e) = self.reregister(id, Interest::READABLE | Interest::WRITABLE, true) {
            self.close(id, CloseReason::from_io(&e, true));
            return Err(e.into());
        }
        Ok(())
    }

    /// Release a socket; idempotent
    ///
    /// Pending bytes get one best-effort flush, TLS sends close_notify, and
    /// the handler's `on_close` runs once from the dispatch loop.
    pub fn close(&mut self, id: SocketId, reason: CloseReason) {
        let Some(mut socket) = self.sockets.remove(id) else {
            return;
        };

        if socket.connected {
            if let Err(e) = socket.flush() {
                trace!(socket = %id, error = %e, "Final flush failed");
            }
        }
        socket.transport.shutdown();
        if let Err(e) = self.poll.registry().deregister(socket.transport.stream_mut()) {
            trace!(socket = %id, error = %e, "Deregister failed");
        }

        if reason.is_clean() {
            debug!(socket = %id, "Socket closed");
        } else {
            debug!(socket = %id, reason = %reason, "Socket closed");
        }

        self.closed.push_back(ClosedSocket {
            id,
            handler: socket.handler.take(),
            reason,
        });
    }

    /// Close every socket with a clean reason and deliver the notifications
    pub fn close_all(&mut self) {
        for id in self.sockets.ids() {
            self.close(id, CloseReason::Requested(0));
        }
        self.deliver_closed();
    }

    pub fn is_alive(&self, id: SocketId) -> bool {
        self.sockets.get(id).is_some()
    }

    pub fn is_connected(&self, id: SocketId) -> bool {
        self.sockets.get(id).is_some_and(|socket| socket.connected)
    }

    /// Bytes queued but not yet handed to the transport
    pub fn pending_bytes(&self, id: SocketId) -> usize {
        self.sockets.get(id).map_or(0, Socket::pending_bytes)
    }

    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    /// Drive the loop until [`Reactor::stop`] or a [`StopHandle`] ends it
    pub fn run(&mut self) -> NetResult<()> {
        self.running = true;
        info!(
            sockets = self.sockets.len(),
            timers = self.timers.len(),
            "Reactor running"
        );

        while self.running {
            if self.stop_flag.swap(false, Ordering::SeqCst) {
                break;
            }
            self.turn(self.config.poll_timeout)?;
        }

        self.running = false;
        self.deliver_closed();
        info!("Reactor stopped");
        Ok(())
    }

    /// Run a single tick, waiting at most `max_wait` for readiness
    pub fn turn(&mut self, max_wait: Duration) -> NetResult<()> {
        let now = Instant::now();
        let mut timeout = self
            .timers
            .next_deadline(now)
            .map_or(max_wait, |until| until.min(max_wait));
        if !self.closed.is_empty() {
            timeout = Duration::ZERO;
        }

        if let Err(e) = self.poll.poll(&mut self.events, Some(timeout)) {
            if e.kind() != io::ErrorKind::Interrupted {
                return Err(e.into());
            }
        }

        self.ready.clear();
        for event in &self.events {
            self.ready.push(Readiness {
                token: event.token(),
                readable: event.is_readable() || event.is_read_closed(),
                error: event.is_error(),
            });
        }

        self.run_timers();

        let ready = std::mem::take(&mut self.ready);
        for readiness in &ready {
            if readiness.token != WAKER {
                self.handle_ready(*readiness);
            }
            self.deliver_closed();
        }
        self.ready = ready;

        self.deliver_closed();
        Ok(())
    }

    fn run_timers(&mut self) {
        let due = self.timers.sweep(Instant::now());
        for task in due {
            task.run(self);
            self.deliver_closed();
        }
    }

    fn handle_ready(&mut self, readiness: Readiness) {
        let Some(id) = self.sockets.id_at(readiness.token.0) else {
            return;
        };
        let Some(connected) = self.sockets.get(id).map(|socket| socket.connected) else {
            return;
        };

        if !connected {
            match self.advance_connect(id) {
                ConnectProgress::Connected => {
                    debug!(socket = %id, "Socket connected");
                    self.dispatch(id, |handler, reactor| handler.on_connect(reactor, id));
                }
                ConnectProgress::Pending => return,
                ConnectProgress::Failed(reason) => {
                    self.close(id, reason);
                    return;
                }
            }
        } else if readiness.error {
            let failure = self
                .sockets
                .get(id)
                .and_then(|socket| match socket.transport.stream().take_error() {
                    Ok(Some(e)) | Err(e) => Some(e),
                    Ok(None) => None,
                });
            if let Some(e) = failure {
                self.close(id, CloseReason::from_io(&e, true));
                return;
            }
        }

        self.flush_socket(id);
        if readiness.readable || !connected {
            self.read_socket(id);
        }
    }

    fn advance_connect(&mut self, id: SocketId) -> ConnectProgress {
        let Some(socket) = self.sockets.get_mut(id) else {
            return ConnectProgress::Pending;
        };

        if !socket.established {
            match socket.transport.stream().take_error() {
                Ok(Some(e)) | Err(e) => return ConnectProgress::Failed(CloseReason::ConnectFailed(e.kind())),
                Ok(None) => {}
            }
            match socket.transport.stream().peer_addr() {
                Ok(_) => socket.established = true,
                Err(e) if e.kind() == io::ErrorKind::NotConnected => return ConnectProgress::Pending,
                Err(e) => return ConnectProgress::Failed(CloseReason::ConnectFailed(e.kind())),
            }
        }

        match socket.transport.handshake() {
            Ok(Handshake::Done) => {
                socket.connected = true;
                ConnectProgress::Connected
            }
            Ok(Handshake::Pending(interest)) => {
                match self.reregister(id, Interest::READABLE | interest, false) {
                    Ok(()) => ConnectProgress::Pending,
                    Err(e) => ConnectProgress::Failed(CloseReason::from_io(&e, false)),
                }
            }
            Err(e) => ConnectProgress::Failed(CloseReason::from_io(&e, false)),
        }
    }

    fn flush_socket(&mut self, id: SocketId) {
        let Some(socket) = self.sockets.get_mut(id) else {
            return;
        };
        if !socket.connected {
            return;
        }
        if let Err(e) = socket.flush() {
            self.close(id, CloseReason::from_io(&e, true));
            return;
        }

        let interest = socket.desired_interest();
        if let Err(e) = self.reregister(id, interest, false) {
            self.close(id, CloseReason::from_io(&e, true));
        }
    }

    fn read_socket(&mut self, id: SocketId) {
        let Some(socket) = self.sockets.get_mut(id) else {
            return;
        };
        if !socket.connected {
            return;
        }
        let batch = socket.drain_reads(&mut self.scratch);
        let tls_output = socket.transport.wants_write();

        if !batch.data.is_empty() {
            trace!(socket = %id, bytes = batch.data.len(), "Read");
            self.dispatch(id, |handler, reactor| {
                handler.on_read(reactor, id, &batch.data);
            });
        }

        match batch.end {
            Some(reason) => self.close(id, reason),
            None if tls_output => self.flush_socket(id),
            None => {}
        }
    }

    fn reregister(&mut self, id: SocketId, interest: Interest, force: bool) -> io::Result<()> {
        let Some(socket) = self.sockets.get_mut(id) else {
            return Ok(());
        };
        if !force && socket.interest == interest {
            return Ok(());
        }
        self.poll
            .registry()
            .reregister(socket.transport.stream_mut(), Token(id.slot()), interest)?;
        socket.interest = interest;
        Ok(())
    }

    /// Call into a socket's handler with the handler lent out of its slot
    fn dispatch<F>(&mut self, id: SocketId, call: F)
    where
        F: FnOnce(&mut dyn SocketHandler, &mut Reactor),
    {
        let Some(mut handler) = self
            .sockets
            .get_mut(id)
            .and_then(|socket| socket.handler.take())
        else {
            return;
        };

        call(handler.as_mut(), self);

        if let Some(socket) = self.sockets.get_mut(id) {
            socket.handler = Some(handler);
        } else if let Some(closed) = self
            .closed
            .iter_mut()
            .find(|closed| closed.id == id && closed.handler.is_none())
        {
            // closed from inside its own callback
            closed.handler = Some(handler);
        }
    }

    fn deliver_closed(&mut self) {
        while let Some(ClosedSocket {
            id,
            handler,
            reason,
        }) = self.closed.pop_front()
        {
            if let Some(mut handler) = handler {
                handler.on_close(self, id, &reason);
            }
        }
    }

    fn tls_config(&mut self) -> NetResult<Arc<ClientConfig>> {
        if let Some(config) = &self.tls {
            return Ok(Arc::clone(config));
        }
        let config = tls::default_client_config()?;
        self.tls = Some(Arc::clone(&config));
        Ok(config)
    }
}

fn resolve(uri: &Uri) -> NetResult<SocketAddr> {
    let unresolved = || NetError::Resolve {
        host: uri.host().to_string(),
        port: uri.port(),
    };
    (uri.host(), uri.port())
        .to_socket_addrs()
        .map_err(|_| unresolved())?
        .next()
        .ok_or_else(unresolved)
}
