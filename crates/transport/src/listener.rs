//! Async listen loop for inbound messages.
//!
//! The loop accepts one connection at a time. Every complete inbound payload is passed to the
//! registered callback on a blocking thread; the callback's return value is written back, and
//! only once the connection closes is the next one accepted. There is no server-side
//! connection concurrency.

use crate::{TransportError, TransportResult};
use hl7::mllp::MllpDecoder;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

/// Callback invoked with each reassembled inbound payload as text.
pub type TextCallback = Arc<dyn Fn(String) -> String + Send + Sync>;

/// Callback invoked with each reassembled inbound payload as bytes.
pub type ByteCallback = Arc<dyn Fn(Vec<u8>) -> Vec<u8> + Send + Sync>;

/// How inbound payloads are delimited on a connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Framing {
    /// `0x0B ... 0x1C 0x0D` frames; many messages per connection.
    #[default]
    Mllp,
    /// One payload per connection, terminated by the peer closing or going idle.
    Raw,
}

#[derive(Clone)]
enum Handler {
    Text(TextCallback),
    Bytes(ByteCallback),
}

impl Handler {
    async fn invoke(&self, payload: Vec<u8>) -> TransportResult<Vec<u8>> {
        let handler = self.clone();
        tokio::task::spawn_blocking(move || match handler {
            Handler::Text(cb) => cb(String::from_utf8_lossy(&payload).into_owned()).into_bytes(),
            Handler::Bytes(cb) => cb(payload),
        })
        .await
        .map_err(|e| TransportError::Io(std::io::Error::other(e)))
    }
}

/// Inbound listener, plaintext or TLS.
pub struct Listener {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    framing: Framing,
    idle_timeout: Duration,
}

impl Listener {
    /// Binds `addr`. With `tls` set every accepted socket completes a server handshake first.
    pub async fn bind(
        addr: &str,
        tls: Option<Arc<ServerConfig>>,
        framing: Framing,
    ) -> TransportResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, tls = tls.is_some(), ?framing, "listening");
        Ok(Self {
            listener,
            tls: tls.map(TlsAcceptor::from),
            framing,
            idle_timeout: Duration::from_secs(30),
        })
    }

    /// Overrides how long a connection may stay silent before it is closed.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn local_addr(&self) -> TransportResult<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves until `shutdown` flips to `true`, passing payloads as text.
    pub async fn serve_text(
        self,
        callback: TextCallback,
        shutdown: watch::Receiver<bool>,
    ) -> TransportResult<()> {
        self.serve(Handler::Text(callback), shutdown).await
    }

    /// Serves until `shutdown` flips to `true`, passing payloads as bytes.
    pub async fn serve_bytes(
        self,
        callback: ByteCallback,
        shutdown: watch::Receiver<bool>,
    ) -> TransportResult<()> {
        self.serve(Handler::Bytes(callback), shutdown).await
    }

    async fn serve(
        self,
        handler: Handler,
        mut shutdown: watch::Receiver<bool>,
    ) -> TransportResult<()> {
        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                _ = shutdown.changed() => {
                    tracing::info!("listener shutting down");
                    return Ok(());
                }
            };

            let (tcp, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                    continue;
                }
            };
            tracing::info!(%peer, "accepted connection");

            let result = match &self.tls {
                Some(acceptor) => match acceptor.accept(tcp).await {
                    Ok(stream) => self.handle(stream, &handler).await,
                    Err(e) => {
                        tracing::error!(%peer, error = %e, "TLS handshake failed");
                        continue;
                    }
                },
                None => self.handle(tcp, &handler).await,
            };

            match result {
                Ok(count) => tracing::info!(%peer, payloads = count, "connection closed"),
                Err(e) => tracing::error!(%peer, error = %e, "connection failed"),
            }
        }
    }

    async fn handle<S>(&self, mut stream: S, handler: &Handler) -> TransportResult<usize>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut decoder = MllpDecoder::new();
        let mut raw = Vec::new();
        let mut buf = vec![0u8; 4096];
        let mut handled = 0usize;

        loop {
            let read = tokio::time::timeout(self.idle_timeout, stream.read(&mut buf)).await;
            let n = match read {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(TransportError::Io(e)),
                Err(_) => {
                    tracing::warn!("connection idle; closing");
                    0
                }
            };

            if n == 0 {
                let pending = match self.framing {
                    Framing::Mllp => decoder.take_pending(),
                    Framing::Raw => std::mem::take(&mut raw),
                };
                if pending.iter().any(|b| !b.is_ascii_whitespace()) {
                    let reply = handler.invoke(pending).await?;
                    // The peer may already be gone; nothing more to do either way.
                    if let Err(e) = stream.write_all(&reply).await {
                        tracing::debug!(error = %e, "could not deliver final reply");
                    }
                    handled += 1;
                }
                if let Err(e) = stream.shutdown().await {
                    tracing::debug!(error = %e, "could not shut down connection");
                }
                return Ok(handled);
            }

            match self.framing {
                Framing::Raw => raw.extend_from_slice(&buf[..n]),
                Framing::Mllp => {
                    for payload in decoder.push(&buf[..n]) {
                        let reply = handler.invoke(payload).await?;
                        stream.write_all(&reply).await?;
                        stream.flush().await?;
                        handled += 1;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    async fn start(framing: Framing, callback: TextCallback) -> (String, watch::Sender<bool>, tokio::task::JoinHandle<TransportResult<()>>) {
        let listener = Listener::bind("127.0.0.1:0", None, framing)
            .await
            .expect("bind")
            .with_idle_timeout(Duration::from_millis(500));
        let addr = listener.local_addr().expect("addr").to_string();
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(listener.serve_text(callback, rx));
        (addr, tx, task)
    }

    #[tokio::test]
    async fn mllp_frames_are_answered_in_order() {
        let (addr, tx, task) = start(
            Framing::Mllp,
            Arc::new(|text: String| hl7::mllp::frame_text(&text.to_uppercase())),
        )
        .await;

        let mut client = TcpStream::connect(&addr).await.expect("connect");
        let mut out = hl7::mllp::frame("msh|one");
        out.extend(hl7::mllp::frame("msh|two"));
        client.write_all(&out).await.expect("write");

        let mut decoder = MllpDecoder::new();
        let mut replies = Vec::new();
        let mut buf = [0u8; 256];
        while replies.len() < 2 {
            let n = client.read(&mut buf).await.expect("read");
            assert!(n > 0, "listener closed early");
            replies.extend(decoder.push(&buf[..n]));
        }
        assert_eq!(replies, vec![b"MSH|ONE".to_vec(), b"MSH|TWO".to_vec()]);

        drop(client);
        tx.send(true).expect("signal");
        task.await.expect("join").expect("serve");
    }

    #[tokio::test]
    async fn raw_payload_is_delivered_when_peer_finishes_writing() {
        let (addr, tx, task) = start(
            Framing::Raw,
            Arc::new(|text: String| format!("len={}", text.len())),
        )
        .await;

        let mut client = TcpStream::connect(&addr).await.expect("connect");
        client.write_all(b"hello world").await.expect("write");
        client.shutdown().await.expect("half close");

        let mut reply = String::new();
        client.read_to_string(&mut reply).await.expect("read");
        assert_eq!(reply, "len=11");

        tx.send(true).expect("signal");
        task.await.expect("join").expect("serve");
    }

    #[tokio::test]
    async fn connections_are_served_one_after_another() {
        let (addr, tx, task) = start(Framing::Mllp, Arc::new(|text: String| hl7::mllp::frame_text(&text))).await;

        for word in ["first", "second"] {
            let mut client = TcpStream::connect(&addr).await.expect("connect");
            client.write_all(&hl7::mllp::frame(word)).await.expect("write");
            let mut buf = [0u8; 64];
            let n = client.read(&mut buf).await.expect("read");
            assert_eq!(hl7::mllp::unframe(&buf[..n]), word.as_bytes());
        }

        tx.send(true).expect("signal");
        task.await.expect("join").expect("serve");
    }
}
