//! Transaction intents, node transaction objects and the ABI encoder seam.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use ethrpc_core::error::RpcError;
use ethrpc_core::returns::ReturnType;

/// What the caller wants sent (or called): target, method and encoding
/// hints, plus optional literal call data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TxIntent {
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Contract method name; also the key into method-scoped error codes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub params: Value,
    /// Return-type descriptor (`"number"`, `"hash[]"`, `"null"` …).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<String>,
    /// Pre-encoded call data; when absent the [`AbiEncoder`] supplies it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Set by `transact`: this is a state-changing send.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub send: bool,
}

impl TxIntent {
    pub fn new(to: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            ..Default::default()
        }
    }

    pub fn returns_type(&self) -> Option<ReturnType> {
        self.returns.as_deref().map(ReturnType::parse)
    }

    /// Name used for relay events and logs.
    pub fn kind(&self) -> &str {
        self.label
            .as_deref()
            .or(self.method.as_deref())
            .unwrap_or("transaction")
    }

    /// JSON-RPC call object (`eth_call` / `eth_sendTransaction`).
    pub fn call_object(&self, data: Option<&str>, gas: Option<&str>) -> Value {
        let mut obj = Map::new();
        if let Some(from) = &self.from {
            obj.insert("from".into(), Value::String(from.clone()));
        }
        obj.insert("to".into(), Value::String(self.to.clone()));
        if let Some(data) = data {
            obj.insert("data".into(), Value::String(data.to_string()));
        }
        if let Some(value) = &self.value {
            obj.insert("value".into(), Value::String(value.clone()));
        }
        if let Some(gas) = gas.or(self.gas.as_deref()) {
            obj.insert("gas".into(), Value::String(gas.to_string()));
        }
        if let Some(price) = &self.gas_price {
            obj.insert("gasPrice".into(), Value::String(price.clone()));
        }
        Value::Object(obj)
    }
}

/// A transaction as reported by `eth_getTransactionByHash`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransactionInfo {
    pub hash: String,
    pub nonce: Option<String>,
    pub block_hash: Option<String>,
    pub block_number: Option<String>,
    pub transaction_index: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub value: Option<String>,
    pub gas: Option<String>,
    pub gas_price: Option<String>,
    pub input: Option<String>,
    /// Decoded return value of the call, attached once confirmed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_return: Option<Value>,
}

impl TransactionInfo {
    pub fn from_value(value: Value) -> Result<Self, RpcError> {
        serde_json::from_value(value).map_err(|e| RpcError::InvalidResponse {
            detail: format!("malformed transaction object: {e}"),
        })
    }

    /// Included in a block: the block hash is present and non-zero.
    pub fn is_mined(&self) -> bool {
        match self.block_hash.as_deref() {
            Some(h) => {
                let digits = ethrpc_core::numeric::strip_0x(h);
                !digits.is_empty() && digits.chars().any(|c| c != '0')
            }
            None => false,
        }
    }

    /// Call object that replays this transaction with `eth_call`.
    pub fn replay_call(&self) -> Value {
        let mut obj = Map::new();
        for (key, field) in [
            ("from", &self.from),
            ("to", &self.to),
            ("value", &self.value),
            ("data", &self.input),
        ] {
            if let Some(v) = field {
                obj.insert(key.into(), Value::String(v.clone()));
            }
        }
        Value::Object(obj)
    }
}

/// Produces call data for an intent that carries no literal `data`.
pub trait AbiEncoder: Send + Sync + 'static {
    fn encode(&self, intent: &TxIntent) -> Result<String, RpcError>;
}

/// Encoder for callers that always pre-encode: uses `intent.data` and
/// rejects anything else.
#[derive(Debug, Default, Clone, Copy)]
pub struct PreEncoded;

impl AbiEncoder for PreEncoded {
    fn encode(&self, intent: &TxIntent) -> Result<String, RpcError> {
        intent.data.clone().ok_or_else(|| RpcError::TransactionFailed {
            detail: format!("no call data for {}", intent.kind()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn intent_deserializes_camel_case() {
        let intent: TxIntent = serde_json::from_value(json!({
            "to": "0xd403f1657106c138843ea831bd99cbd2a4b8d648",
            "from": "0xaff9cb4dcb19d13b84761c040c91d21dc6c991ec",
            "method": "reputationFaucet",
            "signature": "i",
            "params": "0xf69b5",
            "returns": "number",
            "gasPrice": "0xba43b7400"
        }))
        .unwrap();
        assert_eq!(intent.returns_type(), Some(ReturnType::Number));
        assert_eq!(intent.gas_price.as_deref(), Some("0xba43b7400"));
        assert_eq!(intent.kind(), "reputationFaucet");
        assert!(!intent.send);
    }

    #[test]
    fn call_object_omits_absent_fields() {
        let mut intent = TxIntent::new("0xabc");
        intent.value = Some("0x1".into());
        let obj = intent.call_object(None, Some("0xcf08"));
        assert_eq!(obj, json!({ "to": "0xabc", "value": "0x1", "gas": "0xcf08" }));
    }

    #[test]
    fn mined_requires_nonzero_block_hash() {
        let mut info = TransactionInfo::default();
        assert!(!info.is_mined());
        info.block_hash = Some("0x0000000000000000000000000000000000000000000000000000000000000000".into());
        assert!(!info.is_mined());
        info.block_hash = Some("0x043d7f980beb3c59b3335d90c4b14794f4577a71ff591c80858fac8a2f99dc39".into());
        assert!(info.is_mined());
    }

    #[test]
    fn replay_uses_recorded_input() {
        let info = TransactionInfo::from_value(json!({
            "hash": "0x01",
            "from": "0xaa",
            "to": "0xbb",
            "value": "0x0",
            "input": "0x988445fe",
            "blockHash": null
        }))
        .unwrap();
        assert_eq!(
            info.replay_call(),
            json!({ "from": "0xaa", "to": "0xbb", "value": "0x0", "data": "0x988445fe" })
        );
    }

    #[test]
    fn pre_encoded_requires_data() {
        let intent = TxIntent::new("0xabc");
        assert_eq!(PreEncoded.encode(&intent).unwrap_err().code(), 500);
    }
}
