//! The `RpcTransport` trait — "send bytes to a node, get bytes back".

use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;

/// Moves one serialized JSON-RPC payload to one node and returns the raw
/// response body.
///
/// `node` is a URL for HTTP transports and a socket path for IPC. The
/// transport does no JSON-RPC interpretation; decoding belongs to the
/// dispatcher.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` for use across Tokio tasks.
///
/// # Object Safety
/// The trait is object-safe and can be stored as `Arc<dyn RpcTransport>`.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// Non-blocking round trip.
    async fn post(
        &self,
        node: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError>;

    /// Blocking round trip. Must not be called from inside an async task.
    fn post_blocking(
        &self,
        node: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError>;

    /// Short transport name used in log fields (`"http"`, `"ipc"`).
    fn kind(&self) -> &str;
}
