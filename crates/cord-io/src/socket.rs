//! Reactor-owned client sockets
//!
//! A socket pairs a [`Transport`] with an outbound byte queue and the
//! [`SocketHandler`] that receives its events. Sockets are only reachable
//! through the reactor by [`SocketId`].

use std::collections::VecDeque;
use std::fmt;
use std::io;

use mio::Interest;

use crate::reactor::Reactor;
use crate::slots::SocketId;
use crate::tls::{as_tls_error, Transport};

/// Why a socket was released
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed locally; 0 is a clean close
    Requested(i32),
    /// Closed locally because the bytes on the wire broke a protocol rule
    Protocol(u16),
    /// The peer finished the stream
    PeerClosed,
    /// The TCP connection never completed
    ConnectFailed(io::ErrorKind),
    /// Read or write failed after connecting
    Transport(io::ErrorKind),
    /// TLS handshake or record failure
    Tls(String),
}

impl CloseReason {
    /// Numeric code; 0 only for a clean local close
    pub fn code(&self) -> i32 {
        match self {
            Self::Requested(code) => *code,
            Self::Protocol(status) => i32::from(*status),
            Self::PeerClosed => 1,
            Self::ConnectFailed(_) => 2,
            Self::Transport(_) => 3,
            Self::Tls(_) => 4,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.code() == 0
    }

    pub(crate) fn from_io(error: &io::Error, connected: bool) -> Self {
        if let Some(tls) = as_tls_error(error) {
            Self::Tls(tls.to_string())
        } else if connected {
            Self::Transport(error.kind())
        } else {
            Self::ConnectFailed(error.kind())
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested(0) => write!(f, "closed"),
            Self::Requested(code) => write!(f, "closed with code {code}"),
            Self::Protocol(status) => write!(f, "protocol error ({status})"),
            Self::PeerClosed => write!(f, "peer closed the connection"),
            Self::ConnectFailed(kind) => write!(f, "connect failed: {kind}"),
            Self::Transport(kind) => write!(f, "transport error: {kind}"),
            Self::Tls(message) => write!(f, "TLS failure: {message}"),
        }
    }
}

/// Receiver of socket events
///
/// The reactor takes the handler out of its socket for the duration of each
/// call, so a handler may freely call back into the reactor, including
/// closing its own socket.
pub trait SocketHandler {
    /// Connection (and TLS handshake, when applicable) completed
    fn on_connect(&mut self, _reactor: &mut Reactor, _socket: SocketId) {}

    /// Bytes arrived; never called with an empty slice
    fn on_read(&mut self, reactor: &mut Reactor, socket: SocketId, data: &[u8]);

    /// Socket released; called exactly once, after all reads
    fn on_close(&mut self, _reactor: &mut Reactor, _socket: SocketId, _reason: &CloseReason) {}
}

pub(crate) struct Socket {
    pub(crate) transport: Transport,
    pub(crate) handler: Option<Box<dyn SocketHandler>>,
    /// TCP connect confirmed
    pub(crate) established: bool,
    /// TCP connected and TLS handshake finished
    pub(crate) connected: bool,
    pub(crate) interest: Interest,
    outbound: VecDeque<Vec<u8>>,
}

/// Outcome of draining the read side
pub(crate) struct ReadBatch {
    pub(crate) data: Vec<u8>,
    pub(crate) end: Option<CloseReason>,
}

impl Socket {
    pub(crate) fn new(transport: Transport, handler: Box<dyn SocketHandler>) -> Self {
        Self {
            transport,
            handler: Some(handler),
            established: false,
            connected: false,
            interest: Interest::READABLE | Interest::WRITABLE,
            outbound: VecDeque::new(),
        }
    }

    pub(crate) fn enqueue(&mut self, bytes: Vec<u8>) {
        if !bytes.is_empty() {
            self.outbound.push_back(bytes);
        }
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.outbound.is_empty() || self.transport.wants_write()
    }

    pub(crate) fn pending_bytes(&self) -> usize {
        self.outbound.iter().map(Vec::len).sum()
    }

    /// Readiness wanted once connected
    pub(crate) fn desired_interest(&self) -> Interest {
        if self.has_pending() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        }
    }

    /// Write queued bytes until drained or the socket would block
    pub(crate) fn flush(&mut self) -> io::Result<()> {
        while let Some(front) = self.outbound.front_mut() {
            match self.transport.write(front) {
                Ok(0) => {
                    if !self.transport.is_tls() {
                        return Err(io::ErrorKind::WriteZero.into());
                    }
                    // session buffer full: make room or wait for writability
                    self.transport.flush()?;
                    if self.transport.wants_write() {
                        break;
                    }
                }
                Ok(n) if n >= front.len() => {
                    self.outbound.pop_front();
                }
                Ok(n) => {
                    front.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        self.transport.flush()
    }

    /// Read until would-block, end of stream or error
    pub(crate) fn drain_reads(&mut self, scratch: &mut [u8]) -> ReadBatch {
        let mut data = Vec::new();
        let end = loop {
            match self.transport.read(scratch) {
                Ok(0) => break Some(CloseReason::PeerClosed),
                Ok(n) => data.extend_from_slice(&scratch[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break None,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => break Some(CloseReason::from_io(&e, true)),
            }
        };
        ReadBatch { data, end }
    }
}
