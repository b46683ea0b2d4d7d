//! hookqueue: a durable per-key webhook relay queue.
//!
//! Webhooks land over HTTP, are snapshotted into [`Record`]s, and are
//! pushed onto named FIFO queues in a backing store. Consumers drain
//! them over a small binary RPC protocol with blocking pop and
//! non-destructive peek. Both protocols share one listening socket
//! through a first-bytes multiplexer, with optional TLS in front.

pub mod config;
pub mod error;
pub mod hooks;
pub mod net;
pub mod queue;
pub mod record;
pub mod rpc;
pub mod server;
pub mod store;

pub use config::AppConfig;
pub use queue::Queue;
pub use record::{Header, Record};
pub use server::{Server, Shutdown};
pub use store::{MemoryStore, QueueStore, RedisStore};
