//! JSON-RPC 2.0 wire types and request marshalling.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::returns::ReturnType;

/// JSON-RPC request ID — string, number, or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    Null,
}

impl std::fmt::Display for RpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub id: RpcId,
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC 2.0 request.
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id: RpcId::Number(id),
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// RPC namespace prepended to a command name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RpcPrefix {
    #[default]
    Eth,
    Net,
    Web3,
    Db,
    Shh,
    /// The command is already a full method name.
    Raw,
}

impl RpcPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eth => "eth_",
            Self::Net => "net_",
            Self::Web3 => "web3_",
            Self::Db => "db_",
            Self::Shh => "shh_",
            Self::Raw => "",
        }
    }

    /// Parse a prefix string; `"null"` selects [`RpcPrefix::Raw`] and
    /// anything unrecognised falls back to `eth_`.
    pub fn parse(prefix: &str) -> Self {
        match prefix {
            "null" => Self::Raw,
            "net_" | "net" => Self::Net,
            "web3_" | "web3" => Self::Web3,
            "db_" | "db" => Self::Db,
            "shh_" | "shh" => Self::Shh,
            _ => Self::Eth,
        }
    }
}

/// One marshalled request plus its out-of-band return-type descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
    pub request: JsonRpcRequest,
    pub returns: Option<ReturnType>,
}

impl RpcCall {
    /// Wrap a request, moving any `returns` descriptor out of its first
    /// param object.
    pub fn from_request(mut request: JsonRpcRequest) -> Self {
        let returns = strip_returns(&mut request);
        Self { request, returns }
    }

    /// Override the return-type descriptor.
    pub fn with_returns(mut self, returns: ReturnType) -> Self {
        self.returns = Some(returns);
        self
    }

    pub fn method(&self) -> &str {
        &self.request.method
    }
}

/// Remove and return the `returns` field of the first param object.
pub fn strip_returns(request: &mut JsonRpcRequest) -> Option<ReturnType> {
    let first = request.params.first_mut()?.as_object_mut()?;
    let returns = first.remove("returns")?;
    returns.as_str().map(ReturnType::parse)
}

/// A logical RPC command: one request or a positional batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Single(RpcCall),
    Batch(Vec<RpcCall>),
}

impl Command {
    /// Return-type descriptors, one per request, in payload order.
    pub fn returns(&self) -> Vec<Option<ReturnType>> {
        match self {
            Self::Single(call) => vec![call.returns.clone()],
            Self::Batch(calls) => calls.iter().map(|c| c.returns.clone()).collect(),
        }
    }

    /// Method name used in log fields (`"batch"` for batches).
    pub fn label(&self) -> &str {
        match self {
            Self::Single(call) => call.method(),
            Self::Batch(_) => "batch",
        }
    }

    /// Serialized payload with descriptors already stripped.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Self::Single(call) => serde_json::to_vec(&call.request),
            Self::Batch(calls) => {
                let reqs: Vec<&JsonRpcRequest> = calls.iter().map(|c| &c.request).collect();
                serde_json::to_vec(&reqs)
            }
        }
    }

    /// Build a command from a pre-assembled envelope (object or array).
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        if value.is_array() {
            let reqs: Vec<JsonRpcRequest> = serde_json::from_value(value)?;
            Ok(Self::Batch(reqs.into_iter().map(RpcCall::from_request).collect()))
        } else {
            let req: JsonRpcRequest = serde_json::from_value(value)?;
            Ok(Self::Single(RpcCall::from_request(req)))
        }
    }
}

impl From<RpcCall> for Command {
    fn from(call: RpcCall) -> Self {
        Self::Single(call)
    }
}

impl From<Vec<RpcCall>> for Command {
    fn from(calls: Vec<RpcCall>) -> Self {
        Self::Batch(calls)
    }
}

/// Builds request envelopes with monotonically increasing ids.
#[derive(Debug)]
pub struct Marshaller {
    next_id: AtomicU64,
}

impl Default for Marshaller {
    fn default() -> Self {
        Self::new()
    }
}

impl Marshaller {
    /// Ids start at 1.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    /// Build an envelope for `command` in the `prefix` namespace.
    ///
    /// A null `params` becomes `[]`, an array passes through and any other
    /// value is wrapped in a one-element array.
    pub fn marshal(&self, command: &str, params: Value, prefix: RpcPrefix) -> RpcCall {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let method = format!("{}{}", prefix.as_str(), command);
        let params = match params {
            Value::Null => Vec::new(),
            Value::Array(items) => items,
            scalar => vec![scalar],
        };
        RpcCall::from_request(JsonRpcRequest::new(id, method, params))
    }

    /// The id the next `marshal` call will use.
    pub fn peek_id(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed)
    }
}
