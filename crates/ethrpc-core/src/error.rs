//! Error types: transport failures and the caller-facing RPC taxonomy.

use serde_json::{json, Value};
use thiserror::Error;

use crate::request::JsonRpcError;

/// Errors raised by a single transport round trip to one node.
///
/// These never reach the caller directly: the dispatcher either absorbs
/// them (excision + next node) or converts them into an [`RpcError`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, non-2xx status, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// IPC socket connect/read/write error.
    #[error("IPC error: {0}")]
    Ipc(String),

    /// Request timed out after the configured duration.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Local I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if the node itself is unreachable or unresponsive.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Ipc(_) | Self::Timeout { .. } | Self::Io(_)
        )
    }
}

/// Caller-facing error taxonomy.
///
/// Blocking APIs return these as `Err`; callback APIs hand the
/// [`RpcError::to_json`] shape `{error, message}` to the caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RpcError {
    /// Response body was not valid JSON.
    #[error("could not parse response: {detail}")]
    InvalidResponse { detail: String },

    /// Well-formed response without `result` or `error`.
    #[error("no response or bad input")]
    NoResponse { raw: Option<Value> },

    /// A single-node round trip failed at the transport level.
    #[error("node {node} unreachable: {detail}")]
    NodeUnreachable { node: String, detail: String },

    /// No local or hosted node is configured.
    #[error("unable to connect to an Ethereum node")]
    NetworkUnavailable,

    /// The configured local node could not be reached.
    #[error("local Ethereum node failure: {detail}")]
    LocalNodeFailure { detail: String },

    /// Every hosted node has been excised.
    #[error("hosted Ethereum node failure: all hosted nodes excised")]
    HostedNodeFailure,

    /// Generic transaction submission failure.
    #[error("transaction failed: {detail}")]
    TransactionFailed { detail: String },

    /// Verification call returned nothing.
    #[error("expected contract call to return value, received null")]
    NullCallReturn,

    /// The transaction hash is already being tracked.
    #[error("duplicate transaction {hash}")]
    DuplicateTransaction { hash: String },

    /// Poll budget exhausted without the transaction being mined.
    #[error("transaction {hash} not confirmed")]
    TransactionNotConfirmed { hash: String },

    /// The node has no record of the transaction.
    #[error("transaction {hash} not found")]
    TransactionNotFound { hash: String },

    /// Raw transaction rejected at signing time.
    #[error("transaction invalid: {detail}")]
    TransactionInvalid { detail: String },

    /// No signing account is available for a raw transaction.
    #[error("not logged in")]
    NotLoggedIn,

    /// JSON-RPC error object returned by a node.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Contract-level sentinel value resolved through an error-code table.
    #[error("{method}: {message} ({code})")]
    Contract {
        method: String,
        code: String,
        message: String,
    },
}

impl RpcError {
    /// Stable numeric code. Node errors report the node's own JSON-RPC
    /// code. Contract errors carry a string code and report `-1` here;
    /// use [`RpcError::to_json`] for their value.
    pub fn code(&self) -> i64 {
        match self {
            Self::InvalidResponse { .. } => 406,
            Self::NodeUnreachable { .. } => 407,
            Self::NoResponse { .. } => 408,
            Self::NetworkUnavailable => 409,
            Self::LocalNodeFailure { .. } => 410,
            Self::HostedNodeFailure => 411,
            Self::TransactionFailed { .. } => 500,
            Self::NullCallReturn => 501,
            Self::DuplicateTransaction { .. } => 502,
            Self::TransactionNotConfirmed { .. } => 503,
            Self::TransactionNotFound { .. } => 504,
            Self::TransactionInvalid { .. } => 505,
            Self::NotLoggedIn => 506,
            Self::Rpc { code, .. } => *code,
            Self::Contract { .. } => -1,
        }
    }

    /// Upper-snake-case error name.
    pub fn name(&self) -> &str {
        match self {
            Self::InvalidResponse { .. } => "INVALID_RESPONSE",
            Self::NoResponse { .. } => "NO_RESPONSE",
            Self::NodeUnreachable { .. } => "NODE_UNREACHABLE",
            Self::NetworkUnavailable => "ETHEREUM_NOT_FOUND",
            Self::LocalNodeFailure { .. } => "LOCAL_NODE_FAILURE",
            Self::HostedNodeFailure => "HOSTED_NODE_FAILURE",
            Self::TransactionFailed { .. } => "TRANSACTION_FAILED",
            Self::NullCallReturn => "NULL_CALL_RETURN",
            Self::DuplicateTransaction { .. } => "DUPLICATE_TRANSACTION",
            Self::TransactionNotConfirmed { .. } => "TRANSACTION_NOT_CONFIRMED",
            Self::TransactionNotFound { .. } => "TRANSACTION_NOT_FOUND",
            Self::TransactionInvalid { .. } => "TRANSACTION_INVALID",
            Self::NotLoggedIn => "NOT_LOGGED_IN",
            Self::Rpc { .. } => "RPC_ERROR",
            Self::Contract { .. } => "CONTRACT_ERROR",
        }
    }

    /// Human-readable message (the `message` field of the wire shape).
    pub fn message(&self) -> String {
        match self {
            Self::Rpc { message, .. } | Self::Contract { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// `{error, message}` object delivered to callback-mode callers.
    pub fn to_json(&self) -> Value {
        let error = match self {
            Self::Contract { code, .. } => Value::String(code.clone()),
            other => Value::from(other.code()),
        };
        let mut obj = json!({ "error": error, "message": self.message() });
        if let Self::NoResponse { raw: Some(raw) } = self {
            obj["raw"] = raw.clone();
        }
        obj
    }

    /// Returns `true` for conditions that end every further attempt on
    /// the node set (the pool itself is unusable).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NetworkUnavailable | Self::LocalNodeFailure { .. } | Self::HostedNodeFailure
        )
    }
}

impl From<JsonRpcError> for RpcError {
    fn from(err: JsonRpcError) -> Self {
        Self::Rpc {
            code: err.code,
            message: err.message,
        }
    }
}
