//! Error taxonomy for the queue engine and servers.
//!
//! Timeout expiry and caller cancellation are deliberately *not* errors:
//! `Queue::pop` reports both as `Ok(None)`. Everything here is a real
//! failure that the caller (or an external supervisor) must handle; the
//! engine itself never retries.

use thiserror::Error;

/// Failure talking to the backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not establish or keep a store connection.
    #[error("store connection failed: {0}")]
    Connection(String),

    /// A store command was rejected or the reply was malformed.
    #[error("store command failed: {0}")]
    Command(String),

    /// The wake subscription ended while a pop was still waiting.
    #[error("wake subscription closed")]
    SubscriptionClosed,
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_io_error() || err.is_connection_dropped() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

/// Malformed bytes on the wire or in the store.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("truncated payload")]
    Truncated,

    #[error("trailing bytes after payload")]
    TrailingBytes,

    #[error("invalid utf-8 in {0}")]
    Utf8(&'static str),

    #[error("frame of {0} bytes exceeds limit of {1}")]
    FrameTooLarge(u64, u64),

    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),

    #[error("bad handshake magic")]
    BadMagic,
}

/// Errors surfaced by queue engine calls.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The engine was built with unusable settings. Fails fast at
    /// construction, never partially operates.
    #[error("queue misconfigured: {0}")]
    Configuration(&'static str),

    /// The caller passed an argument outside the operation's contract.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Stored bytes failed to decode back into a record.
    #[error("serialization failed: {0}")]
    Serialization(#[from] CodecError),
}

/// Client-side RPC failures.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The server reported a failure; the message is the remote error
    /// propagated unchanged.
    #[error("remote error: {0}")]
    Remote(String),
}

/// Fatal server composition failures. None of these are retried in
/// process; they surface so the owning process can restart the service.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("tls setup failed: {0}")]
    Tls(String),

    /// The physical listener (or the mux feeding this front end) is gone.
    #[error("listener closed")]
    ListenerClosed,

    #[error("server task failed: {0}")]
    Task(String),
}
