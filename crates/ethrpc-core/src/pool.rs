//! Node pool with latency-weighted selection, warm-up rotation and excision.

use std::collections::HashMap;

use crate::config::RpcConfig;
use crate::error::RpcError;

/// Samples the head node needs before latency weighting kicks in.
pub const WARMUP_SAMPLES: u64 = 5;

/// Incremental running mean of round-trip latency.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyStats {
    pub mean_ms: f64,
    pub samples: u64,
}

impl LatencyStats {
    /// Fold one sample into the running mean.
    pub fn record(&mut self, sample_ms: f64) {
        self.samples += 1;
        let n = self.samples as f64;
        self.mean_ms = ((n - 1.0) * self.mean_ms + sample_ms) / n;
    }
}

/// Pick an index from `weights` with a uniform `draw` in `[0, 1)`.
///
/// Builds the normalised cumulative distribution and binary-searches it.
/// Returns `None` when no weight is positive and finite.
pub fn weighted_index(weights: &[f64], draw: f64) -> Option<usize> {
    let total: f64 = weights.iter().filter(|w| w.is_finite() && **w > 0.0).sum();
    if weights.is_empty() || total <= 0.0 {
        return None;
    }
    let mut acc = 0.0;
    let cdf: Vec<f64> = weights
        .iter()
        .map(|w| {
            if w.is_finite() && *w > 0.0 {
                acc += w / total;
            }
            acc
        })
        .collect();

    let (mut lo, mut hi) = (0usize, cdf.len() - 1);
    while lo < hi {
        let mid = (lo + hi) / 2;
        if cdf[mid] > draw {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    Some(lo)
}

/// Candidate nodes and their latency statistics.
///
/// A configured local node is used exclusively and never excised; the
/// hosted list shrinks as failing nodes are excised.
#[derive(Debug, Clone)]
pub struct NodePool {
    default_hosted: Vec<String>,
    hosted: Vec<String>,
    local: Option<String>,
    balancer: bool,
    excision: bool,
    latency: HashMap<String, LatencyStats>,
    network: LatencyStats,
}

impl NodePool {
    pub fn new(config: &RpcConfig) -> Self {
        Self {
            default_hosted: config.hosted_nodes.clone(),
            hosted: config.hosted_nodes.clone(),
            local: config.local_node.clone(),
            balancer: config.balancer,
            excision: config.excision,
            latency: HashMap::new(),
            network: LatencyStats::default(),
        }
    }

    pub fn hosted(&self) -> &[String] {
        &self.hosted
    }

    pub fn local(&self) -> Option<&str> {
        self.local.as_deref()
    }

    /// `true` if at least one local or hosted node is available.
    pub fn has_nodes(&self) -> bool {
        self.local.is_some() || !self.hosted.is_empty()
    }

    /// `true` if `node` is the configured local node or still hosted.
    pub fn contains(&self, node: &str) -> bool {
        self.local.as_deref() == Some(node) || self.hosted.iter().any(|n| n == node)
    }

    pub fn is_local(&self, node: &str) -> bool {
        self.local.as_deref() == Some(node)
    }

    pub fn balancer(&self) -> bool {
        self.balancer
    }

    pub fn set_balancer(&mut self, on: bool) {
        self.balancer = on;
    }

    pub fn excision(&self) -> bool {
        self.excision
    }

    pub fn set_excision(&mut self, on: bool) {
        self.excision = on;
    }

    /// Route every request to `url` from now on.
    pub fn set_local_node(&mut self, url: impl Into<String>) {
        self.local = Some(url.into());
    }

    /// Drop the local override and go back to the hosted list.
    pub fn use_hosted_node(&mut self) {
        self.local = None;
    }

    /// Replace the hosted list (statistics are kept).
    pub fn set_hosted_nodes(&mut self, nodes: Vec<String>) {
        self.hosted = nodes;
    }

    /// Try-order for one logical request, using `draw` in `[0, 1)` for
    /// the weighted pick.
    ///
    /// While the head node is still warming up (fewer than
    /// [`WARMUP_SAMPLES`], or any node without a positive mean) the hosted
    /// list is rotated head-to-tail instead.
    pub fn select_nodes(&mut self, draw: f64) -> Vec<String> {
        if let Some(local) = &self.local {
            return vec![local.clone()];
        }
        if !self.balancer || self.hosted.len() <= 1 {
            return self.hosted.clone();
        }

        let anchor_samples = self.stats(&self.hosted[0]).samples;
        let untested = self.hosted.iter().any(|n| self.stats(n).mean_ms <= 0.0);
        if anchor_samples < WARMUP_SAMPLES || untested {
            self.hosted.rotate_left(1);
            tracing::debug!(head = %self.hosted[0], "warm-up rotation");
            return self.hosted.clone();
        }

        let weights: Vec<f64> = self
            .hosted
            .iter()
            .map(|n| 1.0 / self.stats(n).mean_ms)
            .collect();
        let mut order = Vec::with_capacity(self.hosted.len() + 1);
        if let Some(idx) = weighted_index(&weights, draw) {
            order.push(self.hosted[idx].clone());
        }
        order.extend(self.hosted.iter().cloned());
        order
    }

    /// Permanently remove a hosted node.
    ///
    /// A no-op while a local node is set. Emptying the hosted list is
    /// fatal and reported as `HOSTED_NODE_FAILURE`.
    pub fn excise_node(&mut self, node: &str) -> Result<(), RpcError> {
        if self.local.is_some() {
            return Ok(());
        }
        let before = self.hosted.len();
        self.hosted.retain(|n| n != node);
        if self.hosted.len() < before {
            tracing::warn!(node = %node, remaining = self.hosted.len(), "excised hosted node");
        }
        if self.hosted.is_empty() {
            tracing::error!("all hosted nodes excised");
            return Err(RpcError::HostedNodeFailure);
        }
        Ok(())
    }

    /// Record one successful round trip to `node`.
    pub fn update_mean_latency(&mut self, node: &str, observed_ms: f64) {
        self.latency.entry(node.to_string()).or_default().record(observed_ms);
        self.network.record(observed_ms);
    }

    pub fn latency(&self, node: &str) -> Option<LatencyStats> {
        self.latency.get(node).copied()
    }

    /// Network-wide running mean over every recorded sample.
    pub fn network_latency(&self) -> LatencyStats {
        self.network
    }

    /// Number of nodes with at least one recorded sample.
    pub fn sampled_nodes(&self) -> usize {
        self.latency.len()
    }

    fn stats(&self, node: &str) -> LatencyStats {
        self.latency(node).unwrap_or_default()
    }

    /// Restore the default hosted list and clear the local override.
    pub fn reset(&mut self) {
        self.hosted = self.default_hosted.clone();
        self.local = None;
    }

    /// Wipe latency statistics without touching the node lists.
    pub fn clear_stats(&mut self) {
        self.latency.clear();
        self.network = LatencyStats::default();
    }
}
