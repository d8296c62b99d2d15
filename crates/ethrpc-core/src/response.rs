//! Response decoding: raw bytes → tagged [`RpcResponse`] → coerced [`Reply`].

use serde_json::Value;

use crate::error::RpcError;
use crate::request::JsonRpcError;
use crate::returns::{apply_returns, is_empty_result, ReturnType};

/// A JSON-RPC payload decoded once at the transport boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcResponse {
    Result(Value),
    BatchResult(Vec<RpcResponse>),
    Error(RpcError),
}

impl RpcResponse {
    /// Classify raw response bytes.
    ///
    /// Malformed JSON yields `INVALID_RESPONSE`; an object or empty array
    /// without `result`/`error` yields `NO_RESPONSE` carrying the payload.
    pub fn decode(raw: &[u8]) -> Result<Self, RpcError> {
        let value: Value = serde_json::from_slice(raw).map_err(|e| RpcError::InvalidResponse {
            detail: e.to_string(),
        })?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, RpcError> {
        let is_envelope = value
            .as_object()
            .is_some_and(|obj| obj.contains_key("error") || obj.contains_key("result"));
        match value {
            Value::Array(items) if !items.is_empty() => Ok(Self::BatchResult(
                items.into_iter().map(Self::from_element).collect(),
            )),
            _ if is_envelope => Ok(Self::from_element(value)),
            other => Err(RpcError::NoResponse { raw: Some(other) }),
        }
    }

    fn from_element(value: Value) -> Self {
        let Value::Object(mut obj) = value else {
            return Self::Error(RpcError::NoResponse { raw: Some(value) });
        };
        if let Some(err) = obj.remove("error").filter(|e| !e.is_null()) {
            return Self::Error(normalize_error(err));
        }
        match obj.remove("result") {
            Some(result) => Self::Result(result),
            None => Self::Error(RpcError::NoResponse {
                raw: Some(Value::Object(obj)),
            }),
        }
    }
}

fn normalize_error(err: Value) -> RpcError {
    match serde_json::from_value::<JsonRpcError>(err.clone()) {
        Ok(e) => e.into(),
        Err(_) => RpcError::Rpc {
            code: err.get("code").and_then(Value::as_i64).unwrap_or(-1),
            message: err
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string()),
        },
    }
}

/// A decoded, coerced reply for one command.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Single(Value),
    /// Positional batch results; each element succeeds or fails alone.
    Batch(Vec<Result<Value, RpcError>>),
}

impl Reply {
    /// `true` when the reply carries nothing usable (`null`, `"0x"`, empty batch).
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Single(v) => is_empty_result(v),
            Self::Batch(items) => items.is_empty(),
        }
    }

    /// Unwrap a single-value reply; a batch becomes an array whose failed
    /// elements are `{error, message}` objects.
    pub fn into_value(self) -> Value {
        match self {
            Self::Single(v) => v,
            Self::Batch(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| item.unwrap_or_else(|e| e.to_json()))
                    .collect(),
            ),
        }
    }
}

/// Decode raw bytes and apply per-position return-type coercions.
///
/// In `strict` mode the first failed batch element fails the whole batch.
pub fn parse(raw: &[u8], returns: &[Option<ReturnType>], strict: bool) -> Result<Reply, RpcError> {
    match RpcResponse::decode(raw)? {
        RpcResponse::Error(err) => Err(err),
        RpcResponse::Result(result) => {
            let descriptor = returns.first().and_then(Option::as_ref);
            Ok(Reply::Single(apply_returns(descriptor, result)))
        }
        RpcResponse::BatchResult(items) => {
            let mut results = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                let descriptor = returns.get(i).and_then(Option::as_ref);
                match item {
                    RpcResponse::Result(result) => results.push(Ok(apply_returns(descriptor, result))),
                    RpcResponse::Error(err) => {
                        tracing::debug!(index = i, error = %err, "batch element failed");
                        if strict {
                            return Err(err);
                        }
                        results.push(Err(err));
                    }
                    RpcResponse::BatchResult(_) => results.push(Err(RpcError::NoResponse { raw: None })),
                }
            }
            Ok(Reply::Batch(results))
        }
    }
}
