//! Transaction lifecycle against a scripted in-process node.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use ethrpc_core::error::{RpcError, TransportError};
use ethrpc_core::transport::RpcTransport;
use ethrpc_core::{Dispatcher, ReturnType, RpcConfig};
use ethrpc_tx::{PackagedTx, RawTxSigner, TxIntent, TxManager, TxNotification, TxStatus};

// ─── Helpers ──────────────────────────────────────────────────────────────────

type Script = dyn Fn(&str, &Value, usize) -> Value + Send + Sync;

/// Answers by method name; the script also sees how many times that
/// method has been called before.
struct ScriptedNode {
    script: Box<Script>,
    counts: Mutex<HashMap<String, usize>>,
}

impl ScriptedNode {
    fn new(script: impl Fn(&str, &Value, usize) -> Value + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            counts: Mutex::new(HashMap::new()),
        })
    }

    fn count(&self, method: &str) -> usize {
        self.counts.lock().unwrap().get(method).copied().unwrap_or(0)
    }

    fn answer(&self, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
        let req: Value = serde_json::from_slice(payload)?;
        let method = req["method"].as_str().unwrap_or_default().to_string();
        let n = {
            let mut counts = self.counts.lock().unwrap();
            let n = counts.entry(method.clone()).or_insert(0);
            *n += 1;
            *n - 1
        };
        let result = (self.script)(&method, &req["params"], n);
        Ok(serde_json::to_vec(&json!({ "id": req["id"], "jsonrpc": "2.0", "result": result }))?)
    }
}

#[async_trait]
impl RpcTransport for ScriptedNode {
    async fn post(&self, _node: &str, payload: Vec<u8>, _t: Duration) -> Result<Vec<u8>, TransportError> {
        self.answer(&payload)
    }

    fn post_blocking(&self, _node: &str, payload: Vec<u8>, _t: Duration) -> Result<Vec<u8>, TransportError> {
        self.answer(&payload)
    }

    fn kind(&self) -> &str {
        "scripted"
    }
}

const HASH: &str = "0xb47930faa3946f0e2ea64d3dbf479a4ac3b12e6eb59d7a6be402baa3f53f993d";
const BLOCK_HASH: &str = "0x043d7f980beb3c59b3335d90c4b14794f4577a71ff591c80858fac8a2f99dc39";
const FAUCET: &str = "0xd403f1657106c138843ea831bd99cbd2a4b8d648";
const COINBASE: &str = "0xaff9cb4dcb19d13b84761c040c91d21dc6c991ec";

fn pending_tx(hash: &str) -> Value {
    json!({
        "hash": hash,
        "nonce": "0xf22",
        "blockHash": null,
        "blockNumber": null,
        "from": COINBASE,
        "to": FAUCET,
        "value": "0x0",
        "gas": "0x2fd618",
        "gasPrice": "0xba43b7400",
        "input": "0x988445fe00000000000000000000000000000000000000000000000000000000000f69b5"
    })
}

fn mined_tx(hash: &str) -> Value {
    let mut tx = pending_tx(hash);
    tx["blockHash"] = json!(BLOCK_HASH);
    tx["blockNumber"] = json!("0x2f336");
    tx
}

fn manager(node: Arc<ScriptedNode>, poll_max: u32, poll_interval: Duration) -> TxManager {
    let mut cfg = RpcConfig::with_hosted_nodes(["http://scripted"]);
    cfg.balancer = false;
    cfg.tx_poll_max = poll_max;
    cfg.tx_poll_interval = poll_interval;
    TxManager::pre_encoded(Arc::new(Dispatcher::new(cfg, node)))
}

fn faucet_intent(returns: &str) -> TxIntent {
    TxIntent {
        from: Some(COINBASE.into()),
        method: Some("reputationFaucet".into()),
        signature: Some("i".into()),
        params: json!("0xf69b5"),
        returns: Some(returns.into()),
        data: Some("0x988445fe00000000000000000000000000000000000000000000000000000000000f69b5".into()),
        ..TxIntent::new(FAUCET)
    }
}

async fn next(rx: &mut mpsc::UnboundedReceiver<TxNotification>) -> TxNotification {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for notification")
        .expect("handler dropped")
}

// ─── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn transact_confirms_with_call_return() {
    let node = ScriptedNode::new(|method, _params, n| match method {
        "eth_sendTransaction" => json!(HASH),
        "eth_call" => json!("0x0000000000000000000000000000000000000000000000000000000000000001"),
        // verification lookup and first poll see it pending
        "eth_getTransactionByHash" if n < 2 => pending_tx(HASH),
        "eth_getTransactionByHash" => mined_tx(HASH),
        _ => Value::Null,
    });
    let mgr = manager(node.clone(), 64, Duration::from_millis(10));
    let (tx, mut rx) = mpsc::unbounded_channel::<TxNotification>();

    let hash = mgr.transact(faucet_intent("number"), Arc::new(tx)).await.unwrap();
    assert_eq!(hash, HASH);

    match next(&mut rx).await {
        TxNotification::Sent(sent) => {
            assert_eq!(sent.hash, HASH);
            assert_eq!(sent.call_return, Some(json!("1")));
        }
        other => panic!("expected sent, got {other:?}"),
    }
    match next(&mut rx).await {
        TxNotification::Success(info) => {
            assert_eq!(info.block_hash.as_deref(), Some(BLOCK_HASH));
            assert_eq!(info.call_return, Some(json!("1")));
        }
        other => panic!("expected success, got {other:?}"),
    }
    let record = mgr.record(HASH).unwrap();
    assert_eq!(record.status, TxStatus::Confirmed);
    assert_eq!(record.poll_count, 2);
    assert!(record.intent.send);
    assert_eq!(mgr.pending_polls(), 0);
    assert_eq!(node.count("eth_sendTransaction"), 1);
}

#[tokio::test]
async fn poll_budget_exhaustion_is_unconfirmed() {
    let node = ScriptedNode::new(|method, _params, _n| match method {
        "eth_getTransactionByHash" => pending_tx(HASH),
        _ => Value::Null,
    });
    let mgr = manager(node.clone(), 2, Duration::from_millis(5));
    let (tx, mut rx) = mpsc::unbounded_channel::<TxNotification>();

    mgr.confirm_tx(faucet_intent("null"), HASH, Some(ReturnType::Null), Arc::new(tx))
        .await
        .unwrap();

    assert_eq!(next(&mut rx).await, TxNotification::Sent(ethrpc_tx::SentTx { hash: HASH.into(), call_return: None }));
    match next(&mut rx).await {
        TxNotification::Failed(err) => {
            assert_eq!(err, RpcError::TransactionNotConfirmed { hash: HASH.into() });
            assert_eq!(err.code(), 503);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    let record = mgr.record(HASH).unwrap();
    assert_eq!(record.status, TxStatus::Unconfirmed);
    assert_eq!(record.poll_count, 2);
    assert_eq!(node.count("eth_getTransactionByHash"), 2);
}

#[tokio::test]
async fn duplicate_hash_is_rejected() {
    let node = ScriptedNode::new(|method, _params, _n| match method {
        "eth_getTransactionByHash" => pending_tx(HASH),
        _ => Value::Null,
    });
    let mgr = manager(node, 64, Duration::from_secs(30));
    let (tx, _rx) = mpsc::unbounded_channel::<TxNotification>();
    let handler = Arc::new(tx);

    mgr.confirm_tx(faucet_intent("null"), HASH, Some(ReturnType::Null), handler.clone())
        .await
        .unwrap();
    let err = mgr
        .confirm_tx(faucet_intent("null"), HASH, Some(ReturnType::Null), handler)
        .await
        .unwrap_err();
    assert_eq!(err.name(), "DUPLICATE_TRANSACTION");
    assert_eq!(err.code(), 502);

    mgr.clear();
    assert!(mgr.records().is_empty());
    assert_eq!(mgr.pending_polls(), 0);
}

#[tokio::test]
async fn empty_call_return_fails_before_polling() {
    let node = ScriptedNode::new(|method, _params, _n| match method {
        "eth_sendTransaction" => json!(HASH),
        "eth_call" => json!("0x"),
        "eth_getTransactionByHash" => pending_tx(HASH),
        _ => Value::Null,
    });
    let mgr = manager(node.clone(), 64, Duration::from_millis(10));
    let (tx, mut rx) = mpsc::unbounded_channel::<TxNotification>();

    mgr.transact(faucet_intent("number"), Arc::new(tx)).await.unwrap();
    assert_eq!(next(&mut rx).await, TxNotification::Failed(RpcError::NullCallReturn));
    assert_eq!(mgr.status(HASH), Some(TxStatus::Failed));
    assert_eq!(mgr.pending_polls(), 0);
}

#[tokio::test]
async fn contract_sentinel_fails_with_method_code() {
    let node = ScriptedNode::new(|method, _params, _n| match method {
        "eth_sendTransaction" => json!(HASH),
        "eth_call" => json!("0xffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff"),
        "eth_getTransactionByHash" => pending_tx(HASH),
        _ => Value::Null,
    });
    let mgr = manager(node, 64, Duration::from_millis(10));
    mgr.codes().register("reputationFaucet", "-1", "already funded");
    let (tx, mut rx) = mpsc::unbounded_channel::<TxNotification>();

    mgr.transact(faucet_intent("number"), Arc::new(tx)).await.unwrap();
    match next(&mut rx).await {
        TxNotification::Failed(err) => {
            assert_eq!(err.to_json(), json!({ "error": "-1", "message": "already funded" }));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn fire_decodes_and_maps() {
    let node = ScriptedNode::new(|method, _params, _n| match method {
        "eth_call" => json!("0x0000000000000000000000000000000000000000000000000000000000000001"),
        _ => Value::Null,
    });
    let mgr = manager(node, 64, Duration::from_millis(10));
    assert_eq!(mgr.fire(&faucet_intent("number")).await.unwrap(), json!("1"));
}

// ─── Raw transactions ─────────────────────────────────────────────────────────

struct TestSigner;

impl RawTxSigner for TestSigner {
    fn address(&self) -> &str {
        COINBASE
    }

    fn sign(&self, tx: &PackagedTx) -> Result<String, RpcError> {
        tx.validate_gas()?;
        Ok(format!("0xf86c{:02x}", tx.nonce))
    }
}

fn raw_hash(n: usize) -> String {
    format!("0x{:064x}", n + 1)
}

#[tokio::test]
async fn duplicate_nonce_resubmits_original_intent() {
    let sent = Arc::new(Mutex::new(0usize));
    let sent_in_script = sent.clone();
    let node = ScriptedNode::new(move |method, params, n| match method {
        "eth_gasPrice" => json!("0x1"),
        "net_version" => json!("1"),
        "eth_getTransactionCount" => json!("0x7"),
        "eth_sendRawTransaction" => {
            *sent_in_script.lock().unwrap() = n + 1;
            json!(raw_hash(n))
        }
        "eth_getTransactionByHash" => {
            let hash = params[0].as_str().unwrap_or_default();
            // the first transaction disappears once its sibling is out
            if hash == raw_hash(0) && *sent_in_script.lock().unwrap() >= 2 {
                Value::Null
            } else {
                pending_tx(hash)
            }
        }
        _ => Value::Null,
    });
    let mgr = manager(node.clone(), 100, Duration::from_millis(20));
    mgr.set_signer(Some(Arc::new(TestSigner)));

    let (tx1, mut rx1) = mpsc::unbounded_channel::<TxNotification>();
    let (tx2, _rx2) = mpsc::unbounded_channel::<TxNotification>();
    let first = mgr.transact(faucet_intent("null"), Arc::new(tx1)).await.unwrap();
    assert_eq!(mgr.record(&first).unwrap().raw.unwrap().nonce, 7);

    // forget the slot so the next send collides on nonce 7
    mgr.nonces().decrement(COINBASE);
    let second = mgr.transact(faucet_intent("null"), Arc::new(tx2)).await.unwrap();
    assert_eq!(mgr.record(&second).unwrap().raw.unwrap().nonce, 7);

    // sent for the original, then sent again for the reissue
    assert!(matches!(next(&mut rx1).await, TxNotification::Sent(s) if s.hash == first));
    match next(&mut rx1).await {
        TxNotification::Sent(s) => assert_eq!(s.hash, raw_hash(2)),
        other => panic!("expected resubmission, got {other:?}"),
    }
    // the dropped hash gets no terminal notification of its own
    assert!(rx1.try_recv().is_err());
    assert_eq!(mgr.status(&first), Some(TxStatus::Resubmitted));
    assert_eq!(node.count("eth_sendRawTransaction"), 3);
    assert_eq!(mgr.record(&raw_hash(2)).unwrap().intent, mgr.record(&first).unwrap().intent);
    mgr.clear();
}

#[tokio::test]
async fn missing_transaction_without_sibling_is_not_found() {
    let node = ScriptedNode::new(|method, _params, n| match method {
        "eth_gasPrice" => json!("0x1"),
        "net_version" => json!("1"),
        "eth_getTransactionCount" => json!("0x0"),
        "eth_sendRawTransaction" => json!(raw_hash(n)),
        _ => Value::Null,
    });
    let mgr = manager(node, 100, Duration::from_millis(20));
    mgr.set_signer(Some(Arc::new(TestSigner)));
    let (tx, mut rx) = mpsc::unbounded_channel::<TxNotification>();

    let hash = mgr.transact(faucet_intent("null"), Arc::new(tx)).await.unwrap();
    assert!(matches!(next(&mut rx).await, TxNotification::Sent(_)));
    assert_eq!(
        next(&mut rx).await,
        TxNotification::Failed(RpcError::TransactionNotFound { hash: hash.clone() })
    );
    assert_eq!(mgr.status(&hash), Some(TxStatus::Failed));
    // the freed slot is handed out again
    assert_eq!(mgr.nonces().highest(COINBASE), None);
}

#[tokio::test]
async fn raw_path_requires_signer_and_sufficient_gas() {
    let node = ScriptedNode::new(|method, _params, _n| match method {
        "eth_gasPrice" => json!("0x1"),
        "net_version" => json!("1"),
        "eth_getTransactionCount" => json!("0x0"),
        _ => Value::Null,
    });
    let mgr = manager(node.clone(), 100, Duration::from_millis(20));
    let (tx, _rx) = mpsc::unbounded_channel::<TxNotification>();
    let handler = Arc::new(tx);

    let err = mgr.transact_raw(faucet_intent("null"), handler.clone()).await.unwrap_err();
    assert_eq!(err, RpcError::NotLoggedIn);

    mgr.set_signer(Some(Arc::new(TestSigner)));
    let mut starved = faucet_intent("null");
    starved.gas = Some("0x5208".into());
    let err = mgr.transact_raw(starved, handler).await.unwrap_err();
    assert_eq!(err.code(), 505);
    assert_eq!(mgr.nonces().highest(COINBASE), None);
    assert_eq!(node.count("eth_sendRawTransaction"), 0);
}

#[tokio::test]
async fn send_ether_skips_verification() {
    let node = ScriptedNode::new(|method, params, _n| match method {
        "eth_sendTransaction" => {
            assert_eq!(params[0]["value"], "0xde0b6b3a7640000");
            assert_eq!(params[0]["gas"], "0xcf08");
            json!(HASH)
        }
        "eth_getTransactionByHash" => mined_tx(HASH),
        _ => Value::Null,
    });
    let mgr = manager(node.clone(), 64, Duration::from_millis(10));
    let (tx, mut rx) = mpsc::unbounded_channel::<TxNotification>();

    mgr.send_ether(FAUCET, "1", Some(COINBASE), Arc::new(tx)).await.unwrap();
    assert!(matches!(next(&mut rx).await, TxNotification::Sent(s) if s.call_return.is_none()));
    assert!(matches!(next(&mut rx).await, TxNotification::Success(_)));
    assert_eq!(node.count("eth_call"), 0);
}

#[tokio::test]
async fn relay_sees_every_notification() {
    let node = ScriptedNode::new(|method, _params, _n| match method {
        "eth_sendTransaction" => json!(HASH),
        "eth_getTransactionByHash" => mined_tx(HASH),
        _ => Value::Null,
    });
    let mgr = manager(node, 64, Duration::from_millis(10));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    mgr.relay().set_hook(move |e| sink.lock().unwrap().push((e.hash, e.status)));
    let (tx, mut rx) = mpsc::unbounded_channel::<TxNotification>();

    mgr.transact(faucet_intent("null"), Arc::new(tx)).await.unwrap();
    next(&mut rx).await;
    next(&mut rx).await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|(h, _)| h == HASH));
    assert_eq!(seen[1].1, ethrpc_tx::RelayStatus::Success);
}
