//! Unix-socket JSON-RPC transport.
//!
//! Each round trip opens a connection, writes the payload and reads until
//! one complete JSON value has arrived. Nodes do not delimit responses on
//! the IPC socket, so framing is done by parsing.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use ethrpc_core::error::TransportError;
use ethrpc_core::transport::RpcTransport;

const READ_CHUNK: usize = 8 * 1024;

/// Length of the first complete JSON value in `buf`, if one has arrived.
///
/// Returns `Ok(None)` while more bytes are needed and an error when the
/// bytes can never form valid JSON.
pub fn frame_len(buf: &[u8]) -> Result<Option<usize>, TransportError> {
    let mut stream = serde_json::Deserializer::from_slice(buf).into_iter::<Value>();
    match stream.next() {
        Some(Ok(_)) => Ok(Some(stream.byte_offset())),
        Some(Err(e)) if e.is_eof() => Ok(None),
        Some(Err(e)) => Err(TransportError::Serialization(e)),
        None => Ok(None),
    }
}

/// JSON-RPC over a Unix domain socket; `node` is the socket path.
#[derive(Debug, Default, Clone)]
pub struct IpcTransport;

impl IpcTransport {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
async fn round_trip(path: &str, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixStream;

    let mut sock = UnixStream::connect(path)
        .await
        .map_err(|e| TransportError::Ipc(format!("{path}: {e}")))?;
    sock.write_all(payload).await?;

    let mut buf = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = sock.read(&mut chunk).await?;
        if n == 0 {
            return Err(TransportError::Ipc(format!(
                "{path}: connection closed after {} bytes",
                buf.len()
            )));
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(len) = frame_len(&buf)? {
            buf.truncate(len);
            return Ok(buf);
        }
    }
}

#[cfg(unix)]
fn round_trip_blocking(path: &str, payload: &[u8], timeout: Duration) -> Result<Vec<u8>, TransportError> {
    use std::io::{ErrorKind, Read, Write};
    use std::os::unix::net::UnixStream;

    let mut sock = UnixStream::connect(path).map_err(|e| TransportError::Ipc(format!("{path}: {e}")))?;
    sock.set_read_timeout(Some(timeout))?;
    sock.set_write_timeout(Some(timeout))?;
    sock.write_all(payload)?;

    let mut buf = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = match sock.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Err(TransportError::Timeout {
                    ms: timeout.as_millis() as u64,
                });
            }
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            return Err(TransportError::Ipc(format!(
                "{path}: connection closed after {} bytes",
                buf.len()
            )));
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(len) = frame_len(&buf)? {
            buf.truncate(len);
            return Ok(buf);
        }
    }
}

#[cfg(not(unix))]
async fn round_trip(path: &str, _payload: &[u8]) -> Result<Vec<u8>, TransportError> {
    Err(TransportError::Ipc(format!("{path}: IPC sockets are not supported on this platform")))
}

#[cfg(not(unix))]
fn round_trip_blocking(path: &str, _payload: &[u8], _timeout: Duration) -> Result<Vec<u8>, TransportError> {
    Err(TransportError::Ipc(format!("{path}: IPC sockets are not supported on this platform")))
}

#[async_trait]
impl RpcTransport for IpcTransport {
    async fn post(
        &self,
        node: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        tracing::debug!(path = %node, bytes = payload.len(), "ipc request");
        tokio::time::timeout(timeout, round_trip(node, &payload))
            .await
            .map_err(|_| TransportError::Timeout {
                ms: timeout.as_millis() as u64,
            })?
    }

    fn post_blocking(
        &self,
        node: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        tracing::debug!(path = %node, bytes = payload.len(), "ipc request (blocking)");
        round_trip_blocking(node, &payload, timeout)
    }

    fn kind(&self) -> &str {
        "ipc"
    }
}
