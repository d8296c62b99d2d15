//! Runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Hosted nodes used when no list is supplied.
pub const DEFAULT_HOSTED_NODES: &[&str] = &[
    "https://eth1.augur.net",
    "https://eth3.augur.net",
    "https://eth4.augur.net",
    "https://eth5.augur.net",
];

/// Verbose-logging switches for individual subsystems.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugOptions {
    pub connect: bool,
    pub tx: bool,
    /// Log outgoing payloads and fail a batch on its first error element.
    pub broadcast: bool,
    pub nonce: bool,
    pub sync: bool,
}

/// Configuration for the dispatcher, node pool and lifecycle manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Hosted nodes, in initial try order.
    pub hosted_nodes: Vec<String>,
    /// Local node override; when set it is used exclusively.
    pub local_node: Option<String>,
    /// IPC socket path; when set every request goes over IPC only.
    pub ipc_path: Option<PathBuf>,
    /// Latency-weighted node selection.
    pub balancer: bool,
    /// Remove failing hosted nodes from the pool.
    pub excision: bool,
    /// Timeout per transport round trip.
    #[serde(with = "millis", rename = "request_timeout_ms")]
    pub request_timeout: Duration,
    /// Maximum confirmation polls per transaction.
    pub tx_poll_max: u32,
    /// Delay between confirmation polls.
    #[serde(with = "millis", rename = "tx_poll_interval_ms")]
    pub tx_poll_interval: Duration,
    /// Gas limit used when a transaction does not declare one.
    pub default_gas: String,
    pub debug: DebugOptions,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            hosted_nodes: DEFAULT_HOSTED_NODES.iter().map(|s| s.to_string()).collect(),
            local_node: None,
            ipc_path: None,
            balancer: true,
            excision: true,
            request_timeout: Duration::from_secs(30),
            tx_poll_max: 64,
            tx_poll_interval: Duration::from_secs(12),
            default_gas: "0x2fd618".into(),
            debug: DebugOptions::default(),
        }
    }
}

impl RpcConfig {
    /// Config with an explicit hosted node list and defaults elsewhere.
    pub fn with_hosted_nodes<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hosted_nodes: nodes.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Parse a JSON config document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = RpcConfig::default();
        assert_eq!(cfg.hosted_nodes.len(), DEFAULT_HOSTED_NODES.len());
        assert!(cfg.balancer);
        assert!(cfg.excision);
        assert!(cfg.local_node.is_none());
        assert_eq!(cfg.tx_poll_max, 64);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = RpcConfig::from_json(
            r#"{ "hosted_nodes": ["http://a", "http://b"], "tx_poll_interval_ms": 250, "debug": { "broadcast": true } }"#,
        )
        .unwrap();
        assert_eq!(cfg.hosted_nodes, vec!["http://a", "http://b"]);
        assert_eq!(cfg.tx_poll_interval, Duration::from_millis(250));
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert!(cfg.debug.broadcast);
        assert!(!cfg.debug.tx);
    }
}
