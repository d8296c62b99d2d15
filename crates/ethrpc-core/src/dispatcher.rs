//! Dispatcher: marshal, pick nodes, drive the transport, fail over.
//!
//! One logical request ([`Command`]) is tried against the node order
//! produced by the [`NodePool`], strictly in sequence with early exit.
//! Hosted nodes that fail at the transport level are excised and the next
//! node is tried; a failing local node is always fatal.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rand::Rng;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::config::{DebugOptions, RpcConfig};
use crate::error::{RpcError, TransportError};
use crate::pool::NodePool;
use crate::request::{Command, Marshaller, RpcCall, RpcPrefix};
use crate::response::{parse, Reply};
use crate::returns::ReturnType;
use crate::transport::RpcTransport;

/// Owns the node pool, the request-id counter and the transports.
///
/// Create one per process (or per independent node set) and share it
/// behind an `Arc`.
pub struct Dispatcher {
    config: RpcConfig,
    pool: Mutex<NodePool>,
    debug: Mutex<DebugOptions>,
    marshaller: Marshaller,
    transport: Arc<dyn RpcTransport>,
    ipc: Option<Arc<dyn RpcTransport>>,
}

impl Dispatcher {
    /// Build a dispatcher over `transport` (normally HTTP).
    pub fn new(config: RpcConfig, transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            pool: Mutex::new(NodePool::new(&config)),
            debug: Mutex::new(config.debug),
            marshaller: Marshaller::new(),
            transport,
            ipc: None,
            config,
        }
    }

    /// Route every request over `ipc` to `config.ipc_path`, with no failover.
    pub fn with_ipc(mut self, ipc: Arc<dyn RpcTransport>) -> Self {
        self.ipc = Some(ipc);
        self
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    pub fn request_timeout(&self) -> Duration {
        self.config.request_timeout
    }

    // ─── Pool management ────────────────────────────────────────────────────

    fn pool(&self) -> MutexGuard<'_, NodePool> {
        self.pool.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` with exclusive access to the node pool.
    pub fn with_pool<R>(&self, f: impl FnOnce(&mut NodePool) -> R) -> R {
        f(&mut self.pool())
    }

    /// Copy of the current pool state.
    pub fn pool_snapshot(&self) -> NodePool {
        self.pool().clone()
    }

    pub fn hosted_nodes(&self) -> Vec<String> {
        self.pool().hosted().to_vec()
    }

    pub fn set_hosted_nodes(&self, nodes: Vec<String>) {
        self.pool().set_hosted_nodes(nodes);
    }

    pub fn set_local_node(&self, url: impl Into<String>) {
        self.pool().set_local_node(url);
    }

    pub fn use_hosted_node(&self) {
        self.pool().use_hosted_node();
    }

    pub fn set_balancer(&self, on: bool) {
        self.pool().set_balancer(on);
    }

    pub fn set_excision(&self, on: bool) {
        self.pool().set_excision(on);
    }

    pub fn excise_node(&self, node: &str) -> Result<(), RpcError> {
        self.pool().excise_node(node)
    }

    /// Restore the default hosted list and drop the local override.
    pub fn reset(&self) {
        self.pool().reset();
    }

    /// Wipe latency statistics; node lists are untouched.
    pub fn clear(&self) {
        self.pool().clear_stats();
    }

    /// Try-order for the next request.
    pub fn select_nodes(&self) -> Result<Vec<String>, RpcError> {
        let draw: f64 = rand::thread_rng().gen();
        let mut pool = self.pool();
        if !pool.has_nodes() {
            return Err(RpcError::NetworkUnavailable);
        }
        Ok(pool.select_nodes(draw))
    }

    // ─── Debug options ──────────────────────────────────────────────────────

    pub fn debug(&self) -> DebugOptions {
        *self.debug.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_debug(&self, options: DebugOptions) {
        *self.debug.lock().unwrap_or_else(|p| p.into_inner()) = options;
    }

    pub fn reset_debug(&self) {
        self.set_debug(DebugOptions::default());
    }

    // ─── Marshalling ────────────────────────────────────────────────────────

    /// Build an envelope with the next request id.
    pub fn marshal(&self, command: &str, params: Value, prefix: RpcPrefix) -> RpcCall {
        self.marshaller.marshal(command, params, prefix)
    }

    // ─── Single-node round trips ────────────────────────────────────────────

    /// One round trip to `node`, decoded.
    pub async fn post(&self, node: &str, command: &Command) -> Result<Reply, RpcError> {
        let payload = self.encode(command)?;
        let raw = self
            .transport
            .post(node, payload, self.request_timeout())
            .await
            .map_err(|e| unreachable(node, &e))?;
        parse(&raw, &command.returns(), self.debug().broadcast)
    }

    /// Blocking form of [`Dispatcher::post`].
    pub fn post_blocking(&self, node: &str, command: &Command) -> Result<Reply, RpcError> {
        let payload = self.encode(command)?;
        let raw = self
            .transport
            .post_blocking(node, payload, self.request_timeout())
            .map_err(|e| unreachable(node, &e))?;
        parse(&raw, &command.returns(), self.debug().broadcast)
    }

    // ─── Broadcast ──────────────────────────────────────────────────────────

    /// Send one logical command, failing over across the node order.
    ///
    /// A node's reply is final when it is neither an error nor empty, or
    /// when the node is the last one in the order.
    pub async fn broadcast(&self, command: Command) -> Result<Reply, RpcError> {
        let returns = command.returns();
        let strict = self.debug().broadcast;
        let payload = self.encode(&command)?;
        let timeout = self.request_timeout();

        if let Some(ipc) = &self.ipc {
            let path = self.ipc_path();
            let raw = ipc
                .post(&path, payload, timeout)
                .await
                .map_err(|e| RpcError::LocalNodeFailure { detail: e.to_string() })?;
            return parse(&raw, &returns, strict);
        }

        let order = self.select_nodes()?;
        let last = order.len().saturating_sub(1);
        let mut outcome = Err(RpcError::NoResponse { raw: None });

        for (i, node) in order.iter().enumerate() {
            let Some(is_local) = self.still_available(node) else {
                continue;
            };
            if self.debug().connect {
                tracing::debug!(node = %node, method = command.label(), attempt = i + 1, "sending");
            }
            let started = Instant::now();
            match self.transport.post(node, payload.clone(), timeout).await {
                Ok(raw) => {
                    let parsed = parse(&raw, &returns, strict);
                    let accepted = matches!(&parsed, Ok(reply) if !reply.is_empty());
                    if accepted {
                        self.record_latency(node, started.elapsed());
                    }
                    if accepted || i == last {
                        return parsed;
                    }
                    tracing::debug!(node = %node, method = command.label(), "empty or error reply, trying next node");
                    outcome = parsed;
                }
                Err(e) => {
                    self.transport_failure(node, is_local, &e)?;
                    outcome = Err(unreachable(node, &e));
                }
            }
        }
        outcome
    }

    /// Blocking broadcast: first non-empty reply wins.
    ///
    /// An `error` envelope from a node is a definitive answer and is
    /// returned as is. If no node yields anything usable the last parse
    /// failure is returned, or `NO_RESPONSE` when every reply was empty.
    pub fn broadcast_blocking(&self, command: Command) -> Result<Reply, RpcError> {
        let returns = command.returns();
        let debug = self.debug();
        let payload = self.encode(&command)?;
        let timeout = self.request_timeout();
        if debug.sync {
            tracing::debug!(method = command.label(), "blocking broadcast");
        }

        if let Some(ipc) = &self.ipc {
            let path = self.ipc_path();
            let raw = ipc
                .post_blocking(&path, payload, timeout)
                .map_err(|e| RpcError::LocalNodeFailure { detail: e.to_string() })?;
            return parse(&raw, &returns, debug.broadcast);
        }

        let mut failure = None;
        for node in self.select_nodes()? {
            let Some(is_local) = self.still_available(&node) else {
                continue;
            };
            if debug.connect {
                tracing::debug!(node = %node, method = command.label(), "sending");
            }
            let started = Instant::now();
            match self.transport.post_blocking(&node, payload.clone(), timeout) {
                Ok(raw) => match parse(&raw, &returns, debug.broadcast) {
                    Ok(reply) if !reply.is_empty() => {
                        self.record_latency(&node, started.elapsed());
                        return Ok(reply);
                    }
                    Err(err @ RpcError::Rpc { .. }) => return Err(err),
                    Err(err) => {
                        tracing::debug!(node = %node, error = %err, "unparseable reply, trying next node");
                        failure = Some(err);
                    }
                    Ok(_) => {
                        tracing::debug!(node = %node, method = command.label(), "empty reply, trying next node");
                    }
                },
                Err(e) => self.transport_failure(&node, is_local, &e)?,
            }
        }
        Err(failure.unwrap_or(RpcError::NoResponse { raw: None }))
    }

    /// Run [`Dispatcher::broadcast`] on a task and hand the outcome to
    /// `callback` exactly once.
    pub fn broadcast_with<F>(self: &Arc<Self>, command: Command, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<Reply, RpcError>) + Send + 'static,
    {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = this.broadcast(command).await;
            callback(outcome);
        })
    }

    /// Broadcast a single call and unwrap its value.
    pub async fn call(&self, call: RpcCall) -> Result<Value, RpcError> {
        self.broadcast(Command::Single(call)).await.map(Reply::into_value)
    }

    pub fn call_blocking(&self, call: RpcCall) -> Result<Value, RpcError> {
        self.broadcast_blocking(Command::Single(call)).map(Reply::into_value)
    }

    /// Marshal and broadcast `command` with an optional return type.
    pub async fn request(
        &self,
        command: &str,
        params: Value,
        prefix: RpcPrefix,
        returns: Option<ReturnType>,
    ) -> Result<Value, RpcError> {
        let mut call = self.marshal(command, params, prefix);
        if returns.is_some() {
            call.returns = returns;
        }
        self.call(call).await
    }

    pub fn request_blocking(
        &self,
        command: &str,
        params: Value,
        prefix: RpcPrefix,
        returns: Option<ReturnType>,
    ) -> Result<Value, RpcError> {
        let mut call = self.marshal(command, params, prefix);
        if returns.is_some() {
            call.returns = returns;
        }
        self.call_blocking(call)
    }

    /// Broadcast a positional batch.
    pub async fn batch(&self, calls: Vec<RpcCall>) -> Result<Vec<Result<Value, RpcError>>, RpcError> {
        match self.broadcast(Command::Batch(calls)).await? {
            Reply::Batch(items) => Ok(items),
            Reply::Single(v) => Ok(vec![Ok(v)]),
        }
    }

    // ─── Internals ──────────────────────────────────────────────────────────

    fn encode(&self, command: &Command) -> Result<Vec<u8>, RpcError> {
        let payload = command.to_bytes().map_err(|e| RpcError::InvalidResponse {
            detail: format!("could not encode request: {e}"),
        })?;
        if self.debug().broadcast {
            tracing::debug!(payload = %String::from_utf8_lossy(&payload), "outgoing");
        }
        Ok(payload)
    }

    fn ipc_path(&self) -> String {
        self.config
            .ipc_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    }

    /// `Some(is_local)` if `node` is still in the pool, `None` if it was
    /// excised earlier in this broadcast.
    fn still_available(&self, node: &str) -> Option<bool> {
        let pool = self.pool();
        pool.contains(node).then(|| pool.is_local(node))
    }

    fn record_latency(&self, node: &str, elapsed: Duration) {
        let mut pool = self.pool();
        if pool.balancer() {
            let ms = elapsed.as_secs_f64() * 1000.0;
            pool.update_mean_latency(node, ms);
            tracing::debug!(node = %node, latency_ms = ms, "latency sample");
        }
    }

    /// Absorb a hosted-node failure (excising it when enabled) or turn a
    /// local-node failure into a fatal error.
    fn transport_failure(&self, node: &str, is_local: bool, err: &TransportError) -> Result<(), RpcError> {
        if is_local {
            tracing::error!(node = %node, error = %err, "local node failure");
            return Err(RpcError::LocalNodeFailure { detail: err.to_string() });
        }
        tracing::warn!(node = %node, error = %err, "hosted node failed");
        let mut pool = self.pool();
        if pool.excision() {
            pool.excise_node(node)?;
        }
        if self.debug().connect {
            tracing::debug!(node = %node, remaining = pool.hosted().len(), "failing over");
        }
        Ok(())
    }
}

fn unreachable(node: &str, err: &TransportError) -> RpcError {
    RpcError::NodeUnreachable {
        node: node.to_string(),
        detail: err.to_string(),
    }
}
