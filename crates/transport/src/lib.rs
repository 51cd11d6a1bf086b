//! # rxbridge transport
//!
//! Socket plumbing shared by the inbound and outbound sides of the engine:
//! - [`Connection`]: a blocking plaintext or TLS client that writes one payload and waits for
//!   one acknowledgment read, holding a per-instance lock for the whole round
//! - [`Listener`]: an async accept loop that serves one connection at a time and hands each
//!   reassembled inbound payload to a registered callback
//!
//! No retries happen at this layer; a failed round surfaces as a [`TransportError`].

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{Acceptance, Connection, ConnectionOptions, Encoding, ACK_BUFFER_SIZE};
pub use listener::{ByteCallback, Framing, Listener, TextCallback};

/// Errors returned by the transport crate.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out waiting for acknowledgment from {0}")]
    Timeout(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("connection lock poisoned")]
    Poisoned,
}

/// Type alias for Results that can fail with a [`TransportError`].
pub type TransportResult<T> = Result<T, TransportError>;

/// The acknowledgment read after a write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    /// Up to [`ACK_BUFFER_SIZE`] bytes returned by the peer.
    pub bytes: Vec<u8>,
    /// Result of the connection's acceptance predicate over `bytes`.
    pub accepted: bool,
}

/// A blocking write-then-await-acknowledgment channel.
///
/// Implemented by [`Connection`]; tests and tooling substitute their own implementations.
pub trait Transport: Send + Sync {
    /// Writes `payload` and returns the acknowledgment read that follows it.
    fn write(&self, payload: &str) -> TransportResult<Response>;
}
