//! WebSocket client connection
//!
//! [`WebSocket::connect`] spawns a socket whose handler performs the opening
//! handshake, decodes frames and reassembles messages before handing them to
//! a [`WsHandler`]. The returned [`WebSocket`] is a cheap handle for sending
//! and closing.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use super::assembler::{Message, MessageAssembler};
use super::frame::{self, Frame, OpCode};
use super::handshake::{self, HandshakeOutcome};
use super::{STATUS_ABNORMAL, STATUS_PROTOCOL_ERROR};
use crate::error::{NetError, NetResult};
use crate::reactor::Reactor;
use crate::slots::SocketId;
use crate::socket::{CloseReason, SocketHandler};
use crate::uri::Uri;

/// Receiver of WebSocket events
pub trait WsHandler {
    /// Handshake accepted
    fn on_open(&mut self, _reactor: &mut Reactor, _ws: &WebSocket) {}

    /// A complete data message arrived
    fn on_message(&mut self, reactor: &mut Reactor, ws: &WebSocket, message: Message);

    /// Connection ended; called exactly once
    fn on_close(&mut self, reactor: &mut Reactor, status: u16, reason: &str);
}

#[derive(Debug, Default)]
struct WsShared {
    socket: Cell<Option<SocketId>>,
    open: Cell<bool>,
    local_close: RefCell<Option<(u16, String)>>,
}

/// Handle to a WebSocket connection
#[derive(Clone)]
pub struct WebSocket {
    shared: Rc<WsShared>,
}

impl fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocket")
            .field("socket", &self.shared.socket.get())
            .field("open", &self.shared.open.get())
            .finish()
    }
}

impl WebSocket {
    /// Parse `url` and start connecting
    pub fn connect(
        reactor: &mut Reactor,
        url: &str,
        handler: Box<dyn WsHandler>,
    ) -> NetResult<Self> {
        let uri = Uri::parse(url)?;
        Self::connect_uri(reactor, &uri, handler)
    }

    pub fn connect_uri(
        reactor: &mut Reactor,
        uri: &Uri,
        handler: Box<dyn WsHandler>,
    ) -> NetResult<Self> {
        let shared = Rc::new(WsShared::default());
        let connection = WsConnection {
            shared: Rc::clone(&shared),
            uri: uri.clone(),
            key: handshake::generate_key(),
            phase: Phase::Handshaking,
            inbound: Vec::new(),
            assembler: MessageAssembler::new(),
            remote_close: None,
            failure: None,
            handler,
        };

        let socket = reactor.spawn(uri, Box::new(connection))?;
        shared.socket.set(Some(socket));
        debug!(socket = %socket, url = %uri, "WebSocket connecting");
        Ok(Self { shared })
    }

    pub fn socket_id(&self) -> Option<SocketId> {
        self.shared.socket.get()
    }

    /// Handshake done and not yet closed
    pub fn is_open(&self) -> bool {
        self.shared.open.get()
    }

    /// Send one final, masked frame
    pub fn send(&self, reactor: &mut Reactor, payload: &[u8], opcode: OpCode) -> NetResult<()> {
        let socket = self.live_socket()?;
        let bytes = frame::encode(opcode, payload, Some(rand::random()));
        reactor.write(socket, bytes)
    }

    pub fn send_text(&self, reactor: &mut Reactor, text: &str) -> NetResult<()> {
        self.send(reactor, text.as_bytes(), OpCode::Text)
    }

    /// Send a CLOSE frame and release the connection
    ///
    /// The handler's `on_close` reports `status` and `reason`.
    pub fn close(&self, reactor: &mut Reactor, status: u16, reason: &str) {
        let Some(socket) = self.shared.socket.get() else {
            return;
        };
        if !reactor.is_alive(socket) {
            return;
        }

        self.shared
            .local_close
            .replace(Some((status, reason.to_string())));
        if self.shared.open.replace(false) {
            let payload = frame::close_payload(status, reason);
            if let Err(e) = self.send(reactor, &payload, OpCode::Close) {
                trace!(error = %e, "Close frame not sent");
            }
        }
        reactor.close(socket, CloseReason::Requested(0));
    }

    fn live_socket(&self) -> NetResult<SocketId> {
        self.shared.socket.get().ok_or_else(|| {
            NetError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "WebSocket has no socket",
            ))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Handshaking,
    Open,
}

struct WsConnection {
    shared: Rc<WsShared>,
    uri: Uri,
    key: String,
    phase: Phase,
    inbound: Vec<u8>,
    assembler: MessageAssembler,
    remote_close: Option<(u16, String)>,
    failure: Option<(u16, String)>,
    handler: Box<dyn WsHandler>,
}

impl WsConnection {
    fn handle(&self) -> WebSocket {
        WebSocket {
            shared: Rc::clone(&self.shared),
        }
    }

    fn fail(&mut self, reactor: &mut Reactor, socket: SocketId, status: u16, reason: &str) {
        warn!(socket = %socket, status, reason, "WebSocket protocol failure");
        self.failure = Some((status, reason.to_string()));
        self.shared.open.set(false);
        reactor.close(socket, CloseReason::Protocol(status));
    }

    /// Consume the handshake response; true once frames may follow
    fn finish_handshake(&mut self, reactor: &mut Reactor, socket: SocketId) -> bool {
        match handshake::check_response(&self.inbound) {
            HandshakeOutcome::Incomplete => false,
            HandshakeOutcome::Rejected { status_line } => {
                debug!(socket = %socket, status_line = %status_line, "Upgrade refused");
                self.fail(reactor, socket, STATUS_PROTOCOL_ERROR, "handshake failed");
                false
            }
            HandshakeOutcome::Accepted { consumed } => {
                self.inbound.drain(..consumed);
                self.phase = Phase::Open;
                self.shared.open.set(true);
                debug!(socket = %socket, "WebSocket open");

                let ws = self.handle();
                self.handler.on_open(reactor, &ws);
                reactor.is_alive(socket)
            }
        }
    }

    fn process_frames(&mut self, reactor: &mut Reactor, socket: SocketId) {
        let mut offset = 0;
        while reactor.is_alive(socket) {
            match frame::decode(&self.inbound[offset..]) {
                Ok(None) => break,
                Ok(Some((frame, used))) => {
                    offset += used;
                    self.handle_frame(reactor, socket, frame);
                }
                Err(e) => {
                    self.fail(reactor, socket, e.close_status(), &e.to_string());
                    break;
                }
            }
        }
        self.inbound.drain(..offset);
    }

    fn handle_frame(&mut self, reactor: &mut Reactor, socket: SocketId, frame: Frame) {
        match frame.opcode {
            OpCode::Close => {
                let (status, reason) = frame::parse_close_payload(&frame.payload);
                debug!(socket = %socket, status, reason = %reason, "Close frame received");
                self.remote_close = Some((status, reason));
                if self.shared.open.replace(false) {
                    let echo = frame::encode(OpCode::Close, &frame.payload, Some(rand::random()));
                    if let Err(e) = reactor.write(socket, echo) {
                        warn!(socket = %socket, error = %e, "Close echo not sent");
                    }
                }
                reactor.close(socket, CloseReason::Requested(0));
            }
            OpCode::Ping => {
                let pong = frame::encode(OpCode::Pong, &frame.payload, Some(rand::random()));
                if let Err(e) = reactor.write(socket, pong) {
                    warn!(socket = %socket, error = %e, "Pong not sent");
                }
            }
            OpCode::Pong => {}
            _ => match self.assembler.push(frame) {
                Ok(Some(message)) => {
                    let ws = self.handle();
                    self.handler.on_message(reactor, &ws, message);
                }
                Ok(None) => {}
                Err(e) => self.fail(reactor, socket, e.close_status(), &e.to_string()),
            },
        }
    }
}

impl SocketHandler for WsConnection {
    fn on_connect(&mut self, reactor: &mut Reactor, socket: SocketId) {
        let request = handshake::request(&self.uri, &self.key);
        if let Err(e) = reactor.write(socket, request.into_bytes()) {
            warn!(socket = %socket, error = %e, "Failed to send upgrade request");
        }
    }

    fn on_read(&mut self, reactor: &mut Reactor, socket: SocketId, data: &[u8]) {
        self.inbound.extend_from_slice(data);
        if self.phase == Phase::Handshaking && !self.finish_handshake(reactor, socket) {
            return;
        }
        self.process_frames(reactor, socket);
    }

    fn on_close(&mut self, reactor: &mut Reactor, _socket: SocketId, reason: &CloseReason) {
        self.shared.open.set(false);
        self.assembler.clear();

        let (status, text) = self
            .shared
            .local_close
            .take()
            .or_else(|| self.remote_close.take())
            .or_else(|| self.failure.take())
            .unwrap_or_else(|| (STATUS_ABNORMAL, reason.to_string()));

        debug!(status, reason = %text, "WebSocket closed");
        self.handler.on_close(reactor, status, &text);
    }
}
