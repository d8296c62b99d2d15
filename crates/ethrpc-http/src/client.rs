//! HTTP JSON-RPC transport backed by `reqwest`.
//!
//! The async path shares one `reqwest::Client`. The blocking path owns a
//! `reqwest::blocking::Client` that is built on first use, so a transport
//! created inside a Tokio runtime never spins up the blocking client's
//! inner runtime unless a blocking call is actually made.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

use ethrpc_core::error::TransportError;
use ethrpc_core::transport::RpcTransport;

/// Configuration for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// TCP connect timeout; the per-request timeout comes from the dispatcher.
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            user_agent: concat!("ethrpc/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// JSON-RPC over HTTP POST.
pub struct HttpTransport {
    config: HttpConfig,
    http: reqwest::Client,
    blocking: OnceLock<reqwest::blocking::Client>,
}

impl HttpTransport {
    pub fn new(config: HttpConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .default_headers(json_headers())
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(Self {
            config,
            http,
            blocking: OnceLock::new(),
        })
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Result<Self, TransportError> {
        Self::new(HttpConfig::default())
    }

    fn blocking_client(&self) -> Result<&reqwest::blocking::Client, TransportError> {
        if let Some(client) = self.blocking.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .user_agent(self.config.user_agent.clone())
            .default_headers(json_headers())
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(self.blocking.get_or_init(|| client))
    }
}

fn json_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers
}

fn map_reqwest(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout {
            ms: timeout.as_millis() as u64,
        }
    } else {
        TransportError::Http(err.to_string())
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn post(
        &self,
        node: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let resp = self
            .http
            .post(node)
            .timeout(timeout)
            .body(payload)
            .send()
            .await
            .map_err(|e| map_reqwest(e, timeout))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            tracing::debug!(node = %node, status, "non-success HTTP status");
            return Err(TransportError::Http(format!("HTTP {status}: {body}")));
        }

        let body = resp.bytes().await.map_err(|e| map_reqwest(e, timeout))?;
        Ok(body.to_vec())
    }

    fn post_blocking(
        &self,
        node: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let resp = self
            .blocking_client()?
            .post(node)
            .timeout(timeout)
            .body(payload)
            .send()
            .map_err(|e| map_reqwest(e, timeout))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().unwrap_or_default();
            tracing::debug!(node = %node, status, "non-success HTTP status");
            return Err(TransportError::Http(format!("HTTP {status}: {body}")));
        }

        let body = resp.bytes().map_err(|e| map_reqwest(e, timeout))?;
        Ok(body.to_vec())
    }

    fn kind(&self) -> &str {
        "http"
    }
}
