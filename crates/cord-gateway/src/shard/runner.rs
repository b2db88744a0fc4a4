//! Shard runner
//!
//! Binds a [`ShardSession`] to a WebSocket on the reactor: opens and reopens
//! the connection, drives the heartbeat timer and carries out the session's
//! commands.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use cord_io::timer::TimerHandle;
use cord_io::ws::{Message, WebSocket, WsHandler, STATUS_ABNORMAL, STATUS_NORMAL};
use cord_io::Reactor;
use tracing::{debug, info, trace, warn};

use super::{AfterClose, ShardCommand, ShardSession, ShardState};
use crate::config::ShardConfig;
use crate::events::SharedEventHandler;
use crate::protocol::GatewayMessage;

struct ShardInner {
    session: ShardSession,
    url: String,
    ws: Option<WebSocket>,
    /// Bumped for every connection attempt; older sockets and timers are ignored
    epoch: u64,
    heartbeat: Option<TimerHandle>,
    events: SharedEventHandler,
}

/// One gateway connection and the session it carries
#[derive(Clone)]
pub struct Shard {
    inner: Rc<RefCell<ShardInner>>,
}

impl fmt::Debug for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Shard")
            .field("id", &inner.session.shard_id())
            .field("state", &inner.session.state())
            .field("epoch", &inner.epoch)
            .finish()
    }
}

impl Shard {
    /// `url` is the full gateway URL including the version query
    pub fn new(
        shard_id: u32,
        shard_count: u32,
        url: impl Into<String>,
        config: ShardConfig,
        events: SharedEventHandler,
    ) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ShardInner {
                session: ShardSession::new(shard_id, shard_count, config),
                url: url.into(),
                ws: None,
                epoch: 0,
                heartbeat: None,
                events,
            })),
        }
    }

    pub fn id(&self) -> u32 {
        self.inner.borrow().session.shard_id()
    }

    pub fn state(&self) -> ShardState {
        self.inner.borrow().session.state()
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.borrow().session.session_id().map(str::to_string)
    }

    pub fn seq(&self) -> Option<u64> {
        self.inner.borrow().session.seq()
    }

    /// Snapshot of the session state
    pub fn session(&self) -> ShardSession {
        self.inner.borrow().session.clone()
    }

    /// Open the first connection
    pub fn start(&self, reactor: &mut Reactor) {
        self.connect(reactor);
    }

    /// Close the connection and never reconnect
    pub fn stop(&self, reactor: &mut Reactor) {
        let ws = {
            let mut inner = self.inner.borrow_mut();
            inner.session.stop();
            inner.epoch += 1;
            if let Some(heartbeat) = inner.heartbeat.take() {
                heartbeat.cancel();
            }
            inner.ws.take()
        };
        info!(shard_id = self.id(), "Stopping shard");
        if let Some(ws) = ws {
            ws.close(reactor, STATUS_NORMAL, "shutting down");
        }
        self.notify_state(reactor, ShardState::Stopped);
    }

    /// Send an envelope on the current connection
    pub fn send(&self, reactor: &mut Reactor, message: &GatewayMessage) {
        let Some(ws) = self.inner.borrow().ws.clone() else {
            debug!(shard_id = self.id(), op = %message.op, "No connection; message dropped");
            return;
        };

        match message.to_json() {
            Ok(json) => {
                trace!(shard_id = self.id(), op = %message.op, "Sending");
                if let Err(e) = ws.send_text(reactor, &json) {
                    warn!(shard_id = self.id(), op = %message.op, error = %e, "Send failed");
                }
            }
            Err(e) => warn!(shard_id = self.id(), error = %e, "Failed to encode message"),
        }
    }

    fn connect(&self, reactor: &mut Reactor) {
        let (url, epoch) = {
            let mut inner = self.inner.borrow_mut();
            if inner.session.state() == ShardState::Stopped {
                return;
            }
            inner.session.connecting();
            inner.epoch += 1;
            (inner.url.clone(), inner.epoch)
        };
        let shard_id = self.id();
        info!(shard_id, url = %url, "Connecting to gateway");
        self.notify_state(reactor, ShardState::Connecting);

        let socket = ShardSocket {
            shard: Rc::downgrade(&self.inner),
            epoch,
        };
        match WebSocket::connect(reactor, &url, Box::new(socket)) {
            Ok(ws) => self.inner.borrow_mut().ws = Some(ws),
            Err(e) => {
                warn!(shard_id, error = %e, "Gateway connection failed");
                self.closed(reactor, epoch, STATUS_ABNORMAL, &e.to_string());
            }
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.inner.borrow().epoch == epoch
    }

    fn opened(&self, reactor: &mut Reactor, epoch: u64) {
        if !self.is_current(epoch) {
            return;
        }
        self.inner.borrow_mut().session.opened();
        debug!(shard_id = self.id(), "Gateway connection open");
        self.notify_state(reactor, ShardState::AwaitingHello);
    }

    fn received(&self, reactor: &mut Reactor, epoch: u64, message: Message) {
        if !self.is_current(epoch) {
            return;
        }
        let Some(text) = message.as_text() else {
            debug!(shard_id = self.id(), opcode = ?message.opcode, "Ignoring non-text message");
            return;
        };

        let (before, commands) = {
            let mut inner = self.inner.borrow_mut();
            let before = inner.session.state();
            (before, inner.session.receive(text))
        };
        self.execute(reactor, epoch, commands);

        let after = self.state();
        if after != before {
            self.notify_state(reactor, after);
        }
    }

    fn closed(&self, reactor: &mut Reactor, epoch: u64, status: u16, reason: &str) {
        let (shard_id, outcome) = {
            let mut inner = self.inner.borrow_mut();
            if inner.epoch != epoch {
                return;
            }
            inner.ws = None;
            if let Some(heartbeat) = inner.heartbeat.take() {
                heartbeat.cancel();
            }
            (inner.session.shard_id(), inner.session.closed(status))
        };
        info!(shard_id, status, reason, "Gateway connection closed");
        self.notify_state(reactor, self.state());

        match outcome {
            AfterClose::Stop => {}
            AfterClose::Reconnect(delay) => {
                debug!(shard_id, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
                let shard = self.clone();
                reactor.schedule(delay, move |reactor| {
                    if shard.is_current(epoch) {
                        shard.connect(reactor);
                    }
                });
            }
        }
    }

    fn execute(&self, reactor: &mut Reactor, epoch: u64, commands: Vec<ShardCommand>) {
        for command in commands {
            if !self.is_current(epoch) {
                return;
            }
            match command {
                ShardCommand::Send(message) => self.send(reactor, &message),
                ShardCommand::StartHeartbeat(interval) => {
                    self.schedule_heartbeat(reactor, epoch, interval);
                }
                ShardCommand::Dispatch(event) => {
                    let (shard_id, events) = {
                        let inner = self.inner.borrow();
                        (inner.session.shard_id(), Rc::clone(&inner.events))
                    };
                    events.borrow_mut().on_dispatch(reactor, shard_id, &event);
                }
                ShardCommand::Close { code, reason } => self.close_socket(reactor, code, &reason),
                ShardCommand::CloseAfter { delay, code } => {
                    let shard = self.clone();
                    reactor.schedule(delay, move |reactor| {
                        if shard.is_current(epoch) {
                            shard.close_socket(reactor, code, "session invalidated");
                        }
                    });
                }
            }
        }
    }

    fn close_socket(&self, reactor: &mut Reactor, code: u16, reason: &str) {
        let ws = self.inner.borrow().ws.clone();
        if let Some(ws) = ws {
            debug!(shard_id = self.id(), code, reason, "Closing gateway connection");
            ws.close(reactor, code, reason);
        }
    }

    fn schedule_heartbeat(&self, reactor: &mut Reactor, epoch: u64, interval: Duration) {
        let shard = self.clone();
        let handle = reactor.schedule(interval, move |reactor| {
            shard.heartbeat_tick(reactor, epoch, interval);
        });
        if let Some(previous) = self.inner.borrow_mut().heartbeat.replace(handle) {
            previous.cancel();
        }
    }

    fn heartbeat_tick(&self, reactor: &mut Reactor, epoch: u64, interval: Duration) {
        if !self.is_current(epoch) {
            return;
        }
        let commands = self.inner.borrow_mut().session.heartbeat_due();
        self.execute(reactor, epoch, commands);

        let still_open = {
            let inner = self.inner.borrow();
            inner.epoch == epoch && inner.ws.as_ref().is_some_and(WebSocket::is_open)
        };
        if still_open {
            self.schedule_heartbeat(reactor, epoch, interval);
        }
    }

    fn notify_state(&self, reactor: &mut Reactor, state: ShardState) {
        let (shard_id, events) = {
            let inner = self.inner.borrow();
            (inner.session.shard_id(), Rc::clone(&inner.events))
        };
        match events.try_borrow_mut() {
            Ok(mut handler) => handler.on_shard_state(reactor, shard_id, state),
            // state changed from inside one of the handler's own callbacks
            Err(_) => debug!(shard_id, state = %state, "Event handler busy; state change not reported"),
        };
    }
}

/// WebSocket callbacks for one connection attempt of a shard
struct ShardSocket {
    shard: Weak<RefCell<ShardInner>>,
    epoch: u64,
}

impl ShardSocket {
    fn shard(&self) -> Option<Shard> {
        self.shard.upgrade().map(|inner| Shard { inner })
    }
}

impl WsHandler for ShardSocket {
    fn on_open(&mut self, reactor: &mut Reactor, _ws: &WebSocket) {
        if let Some(shard) = self.shard() {
            shard.opened(reactor, self.epoch);
        }
    }

    fn on_message(&mut self, reactor: &mut Reactor, _ws: &WebSocket, message: Message) {
        if let Some(shard) = self.shard() {
            shard.received(reactor, self.epoch, message);
        }
    }

    fn on_close(&mut self, reactor: &mut Reactor, status: u16, reason: &str) {
        if let Some(shard) = self.shard() {
            shard.closed(reactor, self.epoch, status, reason);
        }
    }
}
