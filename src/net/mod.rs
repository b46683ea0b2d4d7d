//! Network layer: the dual-protocol connection multiplexer and TLS setup.

pub mod mux;
pub mod tls;

pub use mux::{classify, passthrough, split, MuxStream, Protocol, VirtualListener};
pub use tls::load_acceptor;
