//! ethrpc-ipc — JSON-RPC over a local node's IPC socket.
//!
//! When a dispatcher is given an [`IpcTransport`] every request goes to
//! the configured socket path, with no failover.

pub mod client;

pub use client::{frame_len, IpcTransport};
