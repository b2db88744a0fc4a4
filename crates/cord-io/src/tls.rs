//! Plain and TLS byte transports
//!
//! [`Transport`] gives both kinds of stream the same non-blocking read/write
//! surface. The TLS variant drives a rustls client session over the mio
//! stream; the reactor calls [`Transport::handshake`] on every readiness
//! event until it reports [`Handshake::Done`].

use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::sync::Arc;

use mio::net::TcpStream;
use mio::Interest;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore};

use crate::error::{NetError, NetResult};

/// Client TLS configuration trusting the bundled web PKI roots
pub fn default_client_config() -> NetResult<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config =
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();

    Ok(Arc::new(config))
}

/// Wrap a rustls failure so it can travel through `io::Result`
pub(crate) fn tls_io_error(error: rustls::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, error)
}

/// Recover the rustls failure from an error built by [`tls_io_error`]
pub(crate) fn as_tls_error(error: &io::Error) -> Option<&rustls::Error> {
    error.get_ref()?.downcast_ref::<rustls::Error>()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Handshake {
    Done,
    /// Blocked; wait for the given readiness
    Pending(Interest),
}

pub(crate) enum Transport {
    Plain(TcpStream),
    Tls {
        stream: TcpStream,
        session: Box<ClientConnection>,
    },
}

impl Transport {
    pub(crate) fn plain(stream: TcpStream) -> Self {
        Self::Plain(stream)
    }

    pub(crate) fn tls(stream: TcpStream, config: Arc<ClientConfig>, host: &str) -> NetResult<Self> {
        let name = ServerName::try_from(host.to_owned())
            .map_err(|_| NetError::ServerName(host.to_owned()))?;
        let session = ClientConnection::new(config, name)?;
        Ok(Self::Tls {
            stream,
            session: Box::new(session),
        })
    }

    pub(crate) fn is_tls(&self) -> bool {
        matches!(self, Self::Tls { .. })
    }

    pub(crate) fn stream(&self) -> &TcpStream {
        match self {
            Self::Plain(stream) | Self::Tls { stream, .. } => stream,
        }
    }

    pub(crate) fn stream_mut(&mut self) -> &mut TcpStream {
        match self {
            Self::Plain(stream) | Self::Tls { stream, .. } => stream,
        }
    }

    /// Advance the TLS handshake as far as the socket allows
    pub(crate) fn handshake(&mut self) -> io::Result<Handshake> {
        let Self::Tls { stream, session } = self else {
            return Ok(Handshake::Done);
        };

        loop {
            while session.wants_write() {
                match session.write_tls(stream) {
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        return Ok(Handshake::Pending(Interest::WRITABLE));
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(e),
                }
            }

            if !session.is_handshaking() {
                return Ok(Handshake::Done);
            }

            match session.read_tls(stream) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "peer closed during TLS handshake",
                    ));
                }
                Ok(_) => {
                    if let Err(e) = session.process_new_packets() {
                        // let the alert out before failing
                        let _ = session.write_tls(stream);
                        return Err(tls_io_error(e));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(Handshake::Pending(Interest::READABLE));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Read decrypted bytes; `Ok(0)` means the peer finished the stream
    pub(crate) fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.read(buf),
            Self::Tls { stream, session } => loop {
                match session.reader().read(buf) {
                    Ok(n) => return Ok(n),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) => return Err(e),
                }

                if session.read_tls(stream)? == 0 {
                    return Ok(0);
                }
                if let Err(e) = session.process_new_packets() {
                    let _ = session.write_tls(stream);
                    return Err(tls_io_error(e));
                }
            },
        }
    }

    /// Write as much of `buf` as the transport accepts right now
    pub(crate) fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.write(buf),
            Self::Tls { stream, session } => {
                let n = session.writer().write(buf)?;
                push_records(stream, session)?;
                Ok(n)
            }
        }
    }

    /// Push buffered TLS records to the socket, stopping on would-block
    pub(crate) fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(_) => Ok(()),
            Self::Tls { stream, session } => push_records(stream, session),
        }
    }

    /// Whether encrypted bytes are waiting for the socket
    pub(crate) fn wants_write(&self) -> bool {
        match self {
            Self::Plain(_) => false,
            Self::Tls { session, .. } => session.wants_write(),
        }
    }

    /// Send close_notify when applicable, then shut the stream down
    pub(crate) fn shutdown(&mut self) {
        if let Self::Tls { stream, session } = self {
            session.send_close_notify();
            let _ = push_records(stream, session);
        }
        let _ = self.stream().shutdown(Shutdown::Both);
    }
}

fn push_records(stream: &mut TcpStream, session: &mut ClientConnection) -> io::Result<()> {
    while session.wants_write() {
        match session.write_tls(stream) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
