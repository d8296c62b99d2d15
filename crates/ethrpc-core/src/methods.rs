//! Typed JSON-RPC method wrappers over [`Dispatcher`].

use serde_json::{json, Value};

use crate::dispatcher::Dispatcher;
use crate::error::RpcError;
use crate::numeric;
use crate::request::RpcPrefix;
use crate::returns::ReturnType;

/// Block tag used when a caller does not name one.
pub const DEFAULT_BLOCK: &str = "latest";

impl Dispatcher {
    // ─── net_ / web3_ ───────────────────────────────────────────────────────

    /// `net_version`: the network id as a decimal string.
    pub async fn version(&self) -> Result<String, RpcError> {
        let v = self.request("version", Value::Null, RpcPrefix::Net, None).await?;
        Ok(as_text(v))
    }

    pub fn version_blocking(&self) -> Result<String, RpcError> {
        let v = self.request_blocking("version", Value::Null, RpcPrefix::Net, None)?;
        Ok(as_text(v))
    }

    pub async fn listening(&self) -> Result<bool, RpcError> {
        let v = self.request("listening", Value::Null, RpcPrefix::Net, None).await?;
        Ok(v.as_bool().unwrap_or(false))
    }

    pub async fn peer_count(&self) -> Result<u64, RpcError> {
        let v = self.request("peerCount", Value::Null, RpcPrefix::Net, None).await?;
        quantity(&v)
    }

    pub async fn client_version(&self) -> Result<String, RpcError> {
        let v = self.request("clientVersion", Value::Null, RpcPrefix::Web3, None).await?;
        Ok(as_text(v))
    }

    pub fn client_version_blocking(&self) -> Result<String, RpcError> {
        let v = self.request_blocking("clientVersion", Value::Null, RpcPrefix::Web3, None)?;
        Ok(as_text(v))
    }

    /// `web3_sha3` of `data`, hex-encoding plain text first.
    pub async fn sha3(&self, data: &str) -> Result<String, RpcError> {
        let input = if numeric::is_hex(data) {
            data.to_string()
        } else {
            format!("0x{}", hex::encode(data.as_bytes()))
        };
        let v = self.request("sha3", json!(input), RpcPrefix::Web3, None).await?;
        Ok(as_text(v))
    }

    // ─── eth_ reads ─────────────────────────────────────────────────────────

    pub async fn coinbase(&self) -> Result<String, RpcError> {
        let v = self.request("coinbase", Value::Null, RpcPrefix::Eth, None).await?;
        Ok(as_text(v))
    }

    /// `eth_gasPrice` as a hex quantity.
    pub async fn gas_price(&self) -> Result<String, RpcError> {
        let v = self.request("gasPrice", Value::Null, RpcPrefix::Eth, None).await?;
        Ok(as_text(v))
    }

    pub fn gas_price_blocking(&self) -> Result<String, RpcError> {
        let v = self.request_blocking("gasPrice", Value::Null, RpcPrefix::Eth, None)?;
        Ok(as_text(v))
    }

    pub async fn block_number(&self) -> Result<u64, RpcError> {
        let v = self.request("blockNumber", Value::Null, RpcPrefix::Eth, None).await?;
        quantity(&v)
    }

    pub fn block_number_blocking(&self) -> Result<u64, RpcError> {
        let v = self.request_blocking("blockNumber", Value::Null, RpcPrefix::Eth, None)?;
        quantity(&v)
    }

    /// Balance of `address` in wei, as a decimal string.
    pub async fn balance(&self, address: &str, block: Option<&str>) -> Result<String, RpcError> {
        let params = json!([address, block.unwrap_or(DEFAULT_BLOCK)]);
        let v = self
            .request("getBalance", params, RpcPrefix::Eth, Some(ReturnType::Number))
            .await?;
        Ok(as_text(v))
    }

    pub fn balance_blocking(&self, address: &str, block: Option<&str>) -> Result<String, RpcError> {
        let params = json!([address, block.unwrap_or(DEFAULT_BLOCK)]);
        let v = self.request_blocking("getBalance", params, RpcPrefix::Eth, Some(ReturnType::Number))?;
        Ok(as_text(v))
    }

    /// `eth_getTransactionCount` for `address` at `block`.
    pub async fn tx_count(&self, address: &str, block: Option<&str>) -> Result<u64, RpcError> {
        let params = json!([address, block.unwrap_or(DEFAULT_BLOCK)]);
        let v = self.request("getTransactionCount", params, RpcPrefix::Eth, None).await?;
        quantity(&v)
    }

    pub fn tx_count_blocking(&self, address: &str, block: Option<&str>) -> Result<u64, RpcError> {
        let params = json!([address, block.unwrap_or(DEFAULT_BLOCK)]);
        let v = self.request_blocking("getTransactionCount", params, RpcPrefix::Eth, None)?;
        quantity(&v)
    }

    /// `eth_getTransactionByHash`; `None` when the node does not know it.
    pub async fn get_transaction(&self, hash: &str) -> Result<Option<Value>, RpcError> {
        let v = self
            .request("getTransactionByHash", json!(hash), RpcPrefix::Eth, None)
            .await?;
        Ok(non_null(v))
    }

    pub fn get_transaction_blocking(&self, hash: &str) -> Result<Option<Value>, RpcError> {
        let v = self.request_blocking("getTransactionByHash", json!(hash), RpcPrefix::Eth, None)?;
        Ok(non_null(v))
    }

    pub async fn get_block(&self, number: u64, full_txs: bool) -> Result<Option<Value>, RpcError> {
        let params = json!([numeric::to_quantity(number), full_txs]);
        let v = self.request("getBlockByNumber", params, RpcPrefix::Eth, None).await?;
        Ok(non_null(v))
    }

    pub async fn get_block_by_hash(&self, hash: &str, full_txs: bool) -> Result<Option<Value>, RpcError> {
        let params = json!([hash, full_txs]);
        let v = self.request("getBlockByHash", params, RpcPrefix::Eth, None).await?;
        Ok(non_null(v))
    }

    /// `eth_call` with an already-encoded call object, coerced by `returns`.
    pub async fn eth_call(&self, call: Value, returns: Option<ReturnType>) -> Result<Value, RpcError> {
        self.request("call", json!([call, DEFAULT_BLOCK]), RpcPrefix::Eth, returns)
            .await
    }

    pub fn eth_call_blocking(&self, call: Value, returns: Option<ReturnType>) -> Result<Value, RpcError> {
        self.request_blocking("call", json!([call, DEFAULT_BLOCK]), RpcPrefix::Eth, returns)
    }

    // ─── eth_ writes ────────────────────────────────────────────────────────

    /// `eth_sendTransaction`; returns the transaction hash.
    pub async fn send_transaction(&self, tx: Value) -> Result<String, RpcError> {
        let v = self.request("sendTransaction", json!([tx]), RpcPrefix::Eth, None).await?;
        Ok(as_text(v))
    }

    /// `eth_sendRawTransaction` of signed bytes; returns the transaction hash.
    pub async fn send_raw_transaction(&self, signed: &str) -> Result<String, RpcError> {
        let v = self
            .request("sendRawTransaction", json!(numeric::prefix_hex(signed)), RpcPrefix::Eth, None)
            .await?;
        Ok(as_text(v))
    }

    /// Any method by its literal name.
    pub async fn raw(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.request(method, params, RpcPrefix::Raw, None).await
    }

    pub fn raw_blocking(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.request_blocking(method, params, RpcPrefix::Raw, None)
    }
}

fn as_text(v: Value) -> String {
    match v {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn non_null(v: Value) -> Option<Value> {
    (!v.is_null()).then_some(v)
}

fn quantity(v: &Value) -> Result<u64, RpcError> {
    let parsed = match v {
        Value::String(s) => numeric::parse_quantity(s),
        Value::Number(n) => n.as_u64(),
        _ => None,
    };
    parsed.ok_or_else(|| RpcError::InvalidResponse {
        detail: format!("expected a quantity, got {v}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::config::RpcConfig;
    use crate::error::TransportError;
    use crate::transport::RpcTransport;

    /// Answers every request with a fixed result and records the payloads.
    struct EchoTransport {
        result: Value,
        seen: Mutex<Vec<Value>>,
    }

    impl EchoTransport {
        fn answer(&self, payload: Vec<u8>) -> Result<Vec<u8>, TransportError> {
            let req: Value = serde_json::from_slice(&payload)?;
            let id = req["id"].clone();
            self.seen.lock().unwrap().push(req);
            Ok(serde_json::to_vec(&json!({ "id": id, "jsonrpc": "2.0", "result": self.result })).unwrap())
        }
    }

    #[async_trait]
    impl RpcTransport for EchoTransport {
        async fn post(&self, _node: &str, payload: Vec<u8>, _t: Duration) -> Result<Vec<u8>, TransportError> {
            self.answer(payload)
        }

        fn post_blocking(&self, _node: &str, payload: Vec<u8>, _t: Duration) -> Result<Vec<u8>, TransportError> {
            self.answer(payload)
        }

        fn kind(&self) -> &str {
            "echo"
        }
    }

    fn setup(result: Value) -> (Dispatcher, Arc<EchoTransport>) {
        let t = Arc::new(EchoTransport {
            result,
            seen: Mutex::new(Vec::new()),
        });
        let mut cfg = RpcConfig::with_hosted_nodes(["http://node"]);
        cfg.balancer = false;
        (Dispatcher::new(cfg, t.clone()), t)
    }

    #[tokio::test]
    async fn version_uses_net_namespace() {
        let (d, t) = setup(json!("3"));
        assert_eq!(d.version().await.unwrap(), "3");
        let seen = t.seen.lock().unwrap();
        assert_eq!(seen[0]["method"], "net_version");
        assert_eq!(seen[0]["params"], json!([]));
    }

    #[tokio::test]
    async fn block_number_decodes_quantity() {
        let (d, _) = setup(json!("0x1b4"));
        assert_eq!(d.block_number().await.unwrap(), 436);
    }

    #[test]
    fn balance_defaults_to_latest_and_decodes_number() {
        let (d, t) = setup(json!("0x0de0b6b3a7640000"));
        assert_eq!(d.balance_blocking("0xabc", None).unwrap(), "1000000000000000000");
        assert_eq!(t.seen.lock().unwrap()[0]["params"], json!(["0xabc", "latest"]));
    }

    #[tokio::test]
    async fn unknown_transaction_is_none() {
        let (d, _) = setup(Value::Null);
        assert!(d.get_transaction("0x01").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sha3_hex_encodes_text() {
        let (d, t) = setup(json!("0x47173285a8d7341e5e972fc677286384f802f8ef42a5ec5f03bbfa254cb01fad"));
        d.sha3("hello world").await.unwrap();
        assert_eq!(t.seen.lock().unwrap()[0]["params"], json!(["0x68656c6c6f20776f726c64"]));
    }

    #[tokio::test]
    async fn raw_keeps_literal_method() {
        let (d, t) = setup(json!(true));
        assert_eq!(d.raw("debug_ping", Value::Null).await.unwrap(), json!(true));
        assert_eq!(t.seen.lock().unwrap()[0]["method"], "debug_ping");
    }

    #[tokio::test]
    async fn ids_increase_across_calls() {
        let (d, t) = setup(json!("1"));
        d.version().await.unwrap();
        d.coinbase().await.unwrap();
        let seen = t.seen.lock().unwrap();
        assert_eq!(seen[0]["id"], 1);
        assert_eq!(seen[1]["id"], 2);
    }
}
