//! Blocking client connection to the downstream gateway.

use crate::{Response, Transport, TransportError, TransportResult};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, StreamOwned};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Size of the acknowledgment buffer read after every write.
pub const ACK_BUFFER_SIZE: usize = 256;

/// Default acknowledgment read timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Predicate deciding whether an acknowledgment counts as success.
pub type Acceptance = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// Text encoding used on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Encoding {
    /// 7-bit ASCII; other characters are sent as `?`.
    #[default]
    Ascii,
    Utf8,
}

impl Encoding {
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            Encoding::Utf8 => text.as_bytes().to_vec(),
            Encoding::Ascii => text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
        }
    }
}

/// Per-connection settings.
#[derive(Clone)]
pub struct ConnectionOptions {
    pub encoding: Encoding,
    pub read_timeout: Duration,
    pub acceptance: Acceptance,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            encoding: Encoding::Ascii,
            read_timeout: DEFAULT_READ_TIMEOUT,
            acceptance: Arc::new(|bytes: &[u8]| !bytes.is_empty()),
        }
    }
}

impl std::fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("encoding", &self.encoding)
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

enum Stream {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(s) => s.read(buf),
            Stream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(s) => s.write(buf),
            Stream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Plain(s) => s.flush(),
            Stream::Tls(s) => s.flush(),
        }
    }
}

/// One plaintext or TLS connection.
///
/// All reads and writes on an instance are serialized by its own lock, so several logical
/// writers may share one `Connection` without interleaving. Distinct instances never contend.
pub struct Connection {
    peer: String,
    stream: Mutex<Stream>,
    options: ConnectionOptions,
}

impl Connection {
    /// Opens a plaintext connection to `addr` (`host:port`).
    pub fn connect(addr: &str, options: ConnectionOptions) -> TransportResult<Self> {
        let tcp = TcpStream::connect(addr)?;
        Self::from_tcp(tcp, options)
    }

    /// Wraps an already connected socket.
    pub fn from_tcp(tcp: TcpStream, options: ConnectionOptions) -> TransportResult<Self> {
        tcp.set_read_timeout(Some(options.read_timeout))?;
        tcp.set_nodelay(true)?;
        let peer = tcp
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "<unknown>".into());
        tracing::info!(%peer, "connected to gateway");
        Ok(Self {
            peer,
            stream: Mutex::new(Stream::Plain(tcp)),
            options,
        })
    }

    /// Opens a TLS connection, validating the certificate against `host`.
    ///
    /// The handshake completes before this returns.
    pub fn connect_tls(
        host: &str,
        port: u16,
        config: Arc<ClientConfig>,
        options: ConnectionOptions,
    ) -> TransportResult<Self> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| TransportError::Tls(format!("invalid server name '{host}': {e}")))?;
        let mut tcp = TcpStream::connect((host, port))?;
        tcp.set_read_timeout(Some(options.read_timeout))?;
        tcp.set_nodelay(true)?;

        let mut conn = ClientConnection::new(config, server_name)
            .map_err(|e| TransportError::Tls(e.to_string()))?;
        while conn.is_handshaking() {
            conn.complete_io(&mut tcp).map_err(|e| {
                tracing::error!(host, error = %e, "TLS handshake failed");
                TransportError::Tls(format!("handshake with {host}:{port} failed: {e}"))
            })?;
        }

        let peer = format!("{host}:{port}");
        tracing::info!(%peer, "connected to gateway over TLS");
        Ok(Self {
            peer,
            stream: Mutex::new(Stream::Tls(Box::new(StreamOwned::new(conn, tcp)))),
            options,
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Writes raw bytes, then reads one acknowledgment of up to [`ACK_BUFFER_SIZE`] bytes.
    pub fn write_bytes(&self, payload: &[u8]) -> TransportResult<Response> {
        let mut stream = self.stream.lock().map_err(|_| TransportError::Poisoned)?;

        stream.write_all(payload).map_err(|e| {
            tracing::error!(peer = %self.peer, error = %e, "gateway write failed");
            TransportError::Io(e)
        })?;
        stream.flush()?;

        let mut buf = [0u8; ACK_BUFFER_SIZE];
        let n = match stream.read(&mut buf) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                tracing::error!(peer = %self.peer, "acknowledgment timed out");
                return Err(TransportError::Timeout(self.peer.clone()));
            }
            Err(e) => {
                tracing::error!(peer = %self.peer, error = %e, "acknowledgment read failed");
                return Err(TransportError::Io(e));
            }
        };
        drop(stream);

        let bytes = buf[..n].to_vec();
        let accepted = (self.options.acceptance)(&bytes);
        tracing::debug!(peer = %self.peer, written = payload.len(), read = n, accepted, "write round complete");
        Ok(Response { bytes, accepted })
    }
}

impl Transport for Connection {
    fn write(&self, payload: &str) -> TransportResult<Response> {
        let bytes = self.options.encoding.encode(payload);
        self.write_bytes(&bytes)
    }
}
