//! Dual-protocol connection multiplexer.
//!
//! # Responsibilities
//! - Accept connections from one physical listener
//! - Terminate TLS (when enabled) before anything else looks at the bytes
//! - Classify each connection by its leading bytes
//! - Hand classified connections to the matching virtual listener
//!
//! Classification reads exactly [`LOOKAHEAD`] bytes and allocates nothing
//! else, so it adds negligible latency per connection. A connection that
//! matches neither protocol is closed without being handed to either
//! consumer. The consumed look-ahead bytes are replayed to the protocol
//! server through [`MuxStream`].

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;

use crate::error::ServeError;
use crate::rpc;

/// How many leading bytes classification inspects.
pub const LOOKAHEAD: usize = 4;

/// How long a new connection gets to produce its first bytes.
const CLASSIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Pending classified connections per virtual listener.
const BACKLOG: usize = 64;

/// Outcome of inspecting a connection's leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Rpc,
    Http,
    Unrecognized,
}

/// Classify a connection by its first [`LOOKAHEAD`] bytes: the RPC
/// handshake magic, or an HTTP/1 request-line method.
pub fn classify(prefix: &[u8]) -> Protocol {
    const HTTP_METHODS: [&[u8]; 9] = [
        b"GET ", b"PUT ", b"POST", b"HEAD", b"DELE", b"OPTI", b"PATC", b"TRAC", b"CONN",
    ];
    if prefix == rpc::MAGIC.as_slice() {
        return Protocol::Rpc;
    }
    if HTTP_METHODS.contains(&prefix) {
        return Protocol::Http;
    }
    Protocol::Unrecognized
}

trait Io: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

/// A classified connection: plain TCP or decrypted TLS, with any consumed
/// look-ahead bytes replayed ahead of the remaining stream.
pub struct MuxStream {
    prefix: Vec<u8>,
    inner: Box<dyn Io>,
    peer: SocketAddr,
}

impl MuxStream {
    fn new(prefix: Vec<u8>, inner: Box<dyn Io>, peer: SocketAddr) -> Self {
        Self {
            prefix,
            inner,
            peer,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl AsyncRead for MuxStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.prefix.is_empty() {
            let n = this.prefix.len().min(buf.remaining());
            buf.put_slice(&this.prefix[..n]);
            this.prefix.drain(..n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for MuxStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// One side of a split listener: yields only connections classified for
/// its protocol. When the physical listener dies, `accept` returns
/// [`ServeError::ListenerClosed`], which front ends treat as terminal.
pub struct VirtualListener {
    rx: mpsc::Receiver<MuxStream>,
}

impl VirtualListener {
    pub async fn accept(&mut self) -> Result<MuxStream, ServeError> {
        self.rx.recv().await.ok_or(ServeError::ListenerClosed)
    }
}

/// Split one accepting socket into an RPC virtual listener and an HTTP
/// virtual listener. With `tls` set, every connection is handshaken first
/// so classification sees decrypted application data.
pub fn split(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
) -> (VirtualListener, VirtualListener) {
    let (rpc_tx, rpc_rx) = mpsc::channel(BACKLOG);
    let (http_tx, http_rx) = mpsc::channel(BACKLOG);

    tokio::spawn(async move {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    // Dropping the senders surfaces ListenerClosed on
                    // both virtual listeners.
                    tracing::error!(error = %err, "accept failed, stopping classification");
                    break;
                }
            };
            let tls = tls.clone();
            let rpc_tx = rpc_tx.clone();
            let http_tx = http_tx.clone();
            tokio::spawn(async move {
                if let Some(stream) = prepare(stream, peer, tls).await {
                    let target = match classify(&stream.prefix) {
                        Protocol::Rpc => &rpc_tx,
                        Protocol::Http => &http_tx,
                        Protocol::Unrecognized => {
                            tracing::debug!(peer = %peer, "unrecognized protocol, closing");
                            return;
                        }
                    };
                    let _ = target.send(stream).await;
                }
            });
        }
    });

    (
        VirtualListener { rx: rpc_rx },
        VirtualListener { rx: http_rx },
    )
}

/// Forward every connection from `listener` unclassified, for standalone
/// (non-multiplexed) deployments. TLS still terminates per connection.
pub fn passthrough(listener: TcpListener, tls: Option<TlsAcceptor>) -> VirtualListener {
    let (tx, rx) = mpsc::channel(BACKLOG);

    tokio::spawn(async move {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::error!(error = %err, "accept failed, stopping listener");
                    break;
                }
            };
            let tls = tls.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let io: Box<dyn Io> = match terminate_tls(stream, peer, tls).await {
                    Some(io) => io,
                    None => return,
                };
                let _ = tx.send(MuxStream::new(Vec::new(), io, peer)).await;
            });
        }
    });

    VirtualListener { rx }
}

#[cfg(test)]
pub(crate) fn closed_for_tests() -> VirtualListener {
    let (_tx, rx) = mpsc::channel(1);
    VirtualListener { rx }
}

/// TLS-terminate and read the classification look-ahead. `None` means the
/// connection was dropped (failed handshake, early close, or stalled).
async fn prepare(
    stream: TcpStream,
    peer: SocketAddr,
    tls: Option<TlsAcceptor>,
) -> Option<MuxStream> {
    let mut io = terminate_tls(stream, peer, tls).await?;
    let mut prefix = [0u8; LOOKAHEAD];
    match tokio::time::timeout(CLASSIFY_TIMEOUT, io.read_exact(&mut prefix)).await {
        Ok(Ok(_)) => Some(MuxStream::new(prefix.to_vec(), io, peer)),
        Ok(Err(err)) => {
            tracing::debug!(peer = %peer, error = %err, "connection closed before classification");
            None
        }
        Err(_) => {
            tracing::debug!(peer = %peer, "connection stalled before classification");
            None
        }
    }
}

async fn terminate_tls(
    stream: TcpStream,
    peer: SocketAddr,
    tls: Option<TlsAcceptor>,
) -> Option<Box<dyn Io>> {
    match tls {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls_stream) => Some(Box::new(tls_stream)),
            Err(err) => {
                tracing::debug!(peer = %peer, error = %err, "tls handshake failed");
                None
            }
        },
        None => Some(Box::new(stream)),
    }
}
