//! ethrpc-http — HTTP transport for ethrpc.
//!
//! One [`HttpTransport`] serves every node URL in the pool; the node is
//! chosen per call by the dispatcher.

pub mod client;

pub use client::{HttpConfig, HttpTransport};
