//! ethrpc-core — node pool, dispatcher and response decoding for
//! Ethereum JSON-RPC.
//!
//! # Overview
//!
//! The core crate defines:
//!
//! - [`RpcTransport`] — the "send bytes to a node" trait every transport implements
//! - [`Marshaller`] / [`Command`] — request envelopes with out-of-band return types
//! - [`NodePool`] — hosted/local node sets, warm-up rotation, latency-weighted selection
//! - [`Dispatcher`] — broadcast with sequential failover and excision
//! - [`response`] — decoding into [`Reply`] and [`RpcError`]
//! - [`numeric`] — hex, two's complement and fixed-point helpers

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod methods;
pub mod numeric;
pub mod pool;
pub mod request;
pub mod response;
pub mod returns;
pub mod transport;

pub use config::{DebugOptions, RpcConfig, DEFAULT_HOSTED_NODES};
pub use dispatcher::Dispatcher;
pub use error::{RpcError, TransportError};
pub use pool::{weighted_index, LatencyStats, NodePool};
pub use request::{Command, JsonRpcError, JsonRpcRequest, Marshaller, RpcCall, RpcId, RpcPrefix};
pub use response::{Reply, RpcResponse};
pub use returns::ReturnType;
pub use transport::RpcTransport;
