//! Transaction lifecycle manager.
//!
//! `transact` sends, `confirm_tx` starts tracking, and each confirmation
//! poll runs as its own spawned task. A poll feeds one [`TxEvent`] into
//! the record's transition function and then executes the returned
//! [`Effect`]s. Polls for one hash never overlap: the next one is only
//! scheduled by the previous one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use ethrpc_core::dispatcher::Dispatcher;
use ethrpc_core::error::RpcError;
use ethrpc_core::numeric;
use ethrpc_core::returns::{is_empty_result, ReturnType};

use crate::codes::ErrorCodes;
use crate::intent::{AbiEncoder, PreEncoded, TransactionInfo, TxIntent};
use crate::raw::{self, NonceTracker, RawTxSigner};
use crate::record::{Effect, RawTxMeta, TxEvent, TxRecord, TxStatus};
use crate::relay::{Relay, RelayStatus};

/// Gas limit used for plain ether transfers.
pub const SEND_ETHER_GAS: &str = "0xcf08";

/// Payload of the `sent` notification.
#[derive(Debug, Clone, PartialEq)]
pub struct SentTx {
    pub hash: String,
    /// Decoded return of the verification call; `None` for `"null"` returns.
    pub call_return: Option<Value>,
}

/// Receives the lifecycle notifications of one transaction.
///
/// Per hash, `on_sent` is called at most once and is followed by exactly
/// one of `on_success` / `on_failed`. A transaction resubmitted after a
/// nonce collision keeps its handler: the handler then sees another
/// `on_sent` for the new hash and the terminal call for that hash, and
/// nothing terminal for the dropped one.
pub trait TxHandler: Send + Sync + 'static {
    fn on_sent(&self, _sent: SentTx) {}
    fn on_success(&self, _tx: TransactionInfo) {}
    fn on_failed(&self, _err: RpcError) {}
}

/// Lifecycle notification, for channel-based handlers.
#[derive(Debug, Clone, PartialEq)]
pub enum TxNotification {
    Sent(SentTx),
    Success(TransactionInfo),
    Failed(RpcError),
}

impl TxHandler for mpsc::UnboundedSender<TxNotification> {
    fn on_sent(&self, sent: SentTx) {
        let _ = self.send(TxNotification::Sent(sent));
    }

    fn on_success(&self, tx: TransactionInfo) {
        let _ = self.send(TxNotification::Success(tx));
    }

    fn on_failed(&self, err: RpcError) {
        let _ = self.send(TxNotification::Failed(err));
    }
}

struct Inner {
    dispatcher: Arc<Dispatcher>,
    encoder: Arc<dyn AbiEncoder>,
    signer: RwLock<Option<Arc<dyn RawTxSigner>>>,
    codes: ErrorCodes,
    relay: Relay,
    nonces: NonceTracker,
    records: Mutex<HashMap<String, TxRecord>>,
    handlers: Mutex<HashMap<String, Arc<dyn TxHandler>>>,
    /// hash → outstanding poll task
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
}

/// Tracks submitted transactions until they are confirmed or fail.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TxManager {
    inner: Arc<Inner>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl TxManager {
    pub fn new(dispatcher: Arc<Dispatcher>, encoder: Arc<dyn AbiEncoder>) -> Self {
        Self {
            inner: Arc::new(Inner {
                dispatcher,
                encoder,
                signer: RwLock::new(None),
                codes: ErrorCodes::new(),
                relay: Relay::new(),
                nonces: NonceTracker::new(),
                records: Mutex::new(HashMap::new()),
                handlers: Mutex::new(HashMap::new()),
                timers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Manager for callers that always supply literal call data.
    pub fn pre_encoded(dispatcher: Arc<Dispatcher>) -> Self {
        Self::new(dispatcher, Arc::new(PreEncoded))
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    pub fn codes(&self) -> &ErrorCodes {
        &self.inner.codes
    }

    pub fn relay(&self) -> &Relay {
        &self.inner.relay
    }

    pub fn nonces(&self) -> &NonceTracker {
        &self.inner.nonces
    }

    /// Register (or drop) the account used for raw transactions.
    pub fn set_signer(&self, signer: Option<Arc<dyn RawTxSigner>>) {
        *self.inner.signer.write().unwrap_or_else(|p| p.into_inner()) = signer;
    }

    fn signer(&self) -> Option<Arc<dyn RawTxSigner>> {
        self.inner.signer.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn record(&self, hash: &str) -> Option<TxRecord> {
        lock(&self.inner.records).get(hash).cloned()
    }

    pub fn status(&self, hash: &str) -> Option<TxStatus> {
        lock(&self.inner.records).get(hash).map(|r| r.status)
    }

    pub fn records(&self) -> Vec<TxRecord> {
        lock(&self.inner.records).values().cloned().collect()
    }

    /// Number of outstanding poll timers.
    pub fn pending_polls(&self) -> usize {
        lock(&self.inner.timers).len()
    }

    // ─── Sending ────────────────────────────────────────────────────────────

    /// Send a state-changing transaction and start tracking it.
    ///
    /// Errors before a hash exists are returned; everything after is
    /// delivered to `handler`. Uses the raw path when a signer is
    /// registered for the intent's sender.
    pub async fn transact(&self, mut intent: TxIntent, handler: Arc<dyn TxHandler>) -> Result<String, RpcError> {
        intent.send = true;
        let returns = intent.returns_type();
        let data = self.call_data(&intent)?;

        let signer = self.signer().filter(|s| {
            intent
                .from
                .as_deref()
                .map_or(true, |from| from.eq_ignore_ascii_case(s.address()))
        });
        let (hash, raw) = match signer {
            Some(signer) => self.send_raw(&intent, data, signer.as_ref()).await?,
            None => {
                let gas = intent
                    .gas
                    .clone()
                    .unwrap_or_else(|| self.inner.dispatcher.config().default_gas.clone());
                let tx = intent.call_object(data.as_deref(), Some(&gas));
                (self.inner.dispatcher.send_transaction(tx).await?, None)
            }
        };

        if is_empty_result(&Value::String(hash.clone())) {
            return Err(RpcError::TransactionFailed {
                detail: format!("{} returned no transaction hash", intent.kind()),
            });
        }
        let hash = numeric::pad_left(&hash, 64);
        if self.inner.dispatcher.debug().tx {
            tracing::debug!(hash = %hash, kind = intent.kind(), "transaction sent");
        }
        self.track(intent, hash.clone(), returns, handler, raw).await?;
        Ok(hash)
    }

    /// Like [`TxManager::transact`] but requires a registered signer.
    pub async fn transact_raw(&self, intent: TxIntent, handler: Arc<dyn TxHandler>) -> Result<String, RpcError> {
        if self.signer().is_none() {
            return Err(RpcError::NotLoggedIn);
        }
        self.transact(intent, handler).await
    }

    async fn send_raw(
        &self,
        intent: &TxIntent,
        data: Option<String>,
        signer: &dyn RawTxSigner,
    ) -> Result<(String, Option<RawTxMeta>), RpcError> {
        let (packaged, signed) =
            raw::package_and_sign(&self.inner.dispatcher, &self.inner.nonces, signer, intent, data).await?;
        match self.inner.dispatcher.send_raw_transaction(&signed).await {
            Ok(hash) => Ok((
                hash,
                Some(RawTxMeta {
                    from: packaged.from,
                    nonce: packaged.nonce,
                }),
            )),
            Err(e) => {
                self.inner.nonces.decrement(&packaged.from);
                Err(e)
            }
        }
    }

    /// Transfer `value` ether (decimal string) from `from` to `to`.
    pub async fn send_ether(
        &self,
        to: &str,
        value: &str,
        from: Option<&str>,
        handler: Arc<dyn TxHandler>,
    ) -> Result<String, RpcError> {
        let wei = numeric::ether_to_wei_hex(value).ok_or_else(|| RpcError::TransactionFailed {
            detail: format!("invalid ether amount {value}"),
        })?;
        let intent = TxIntent {
            from: from.map(str::to_string),
            value: Some(wei),
            returns: Some("null".into()),
            gas: Some(SEND_ETHER_GAS.into()),
            ..TxIntent::new(to)
        };
        self.transact(intent, handler).await
    }

    /// `eth_call` the intent, decode by its return type and resolve
    /// contract error codes.
    pub async fn fire(&self, intent: &TxIntent) -> Result<Value, RpcError> {
        let returns = intent.returns_type();
        let data = self.call_data(intent)?;
        let call = intent.call_object(data.as_deref(), None);
        let value = self.inner.dispatcher.eth_call(call, returns.clone()).await?;
        self.inner
            .codes
            .check(intent.method.as_deref(), returns.as_ref(), value)
    }

    fn call_data(&self, intent: &TxIntent) -> Result<Option<String>, RpcError> {
        match (&intent.data, &intent.method) {
            (Some(data), _) => Ok(Some(data.clone())),
            (None, Some(_)) => self.inner.encoder.encode(intent).map(Some),
            (None, None) => Ok(None),
        }
    }

    // ─── Tracking ───────────────────────────────────────────────────────────

    /// Start tracking an already-sent transaction.
    ///
    /// Fails with `DUPLICATE_TRANSACTION` if `hash` is already tracked.
    pub async fn confirm_tx(
        &self,
        intent: TxIntent,
        hash: &str,
        returns: Option<ReturnType>,
        handler: Arc<dyn TxHandler>,
    ) -> Result<(), RpcError> {
        self.track(intent, hash.to_string(), returns, handler, None).await
    }

    async fn track(
        &self,
        intent: TxIntent,
        hash: String,
        returns: Option<ReturnType>,
        handler: Arc<dyn TxHandler>,
        raw: Option<RawTxMeta>,
    ) -> Result<(), RpcError> {
        {
            let mut records = lock(&self.inner.records);
            if records.contains_key(&hash) {
                return Err(RpcError::DuplicateTransaction { hash });
            }
            records.insert(hash.clone(), TxRecord::pending(hash.clone(), intent.clone(), raw));
        }
        lock(&self.inner.handlers).insert(hash.clone(), handler);

        let plain_transfer = intent.method.is_none() && intent.data.is_none();
        let skip_verify = plain_transfer || returns.as_ref().map_or(false, ReturnType::is_null);
        let call_return = if skip_verify {
            None
        } else {
            match self.verify_call_return(&intent, &hash, returns.as_ref()).await {
                Ok(value) => Some(value),
                Err(e) => {
                    self.abandon(&hash, e);
                    return Ok(());
                }
            }
        };

        if let Some(record) = lock(&self.inner.records).get_mut(&hash) {
            record.call_return = call_return.clone();
        }
        self.notify_sent(&intent, &hash, call_return);
        self.schedule_poll(hash, Duration::ZERO);
        Ok(())
    }

    /// Re-run the call against the transaction as the node recorded it to
    /// recover its logical return value.
    async fn verify_call_return(
        &self,
        intent: &TxIntent,
        hash: &str,
        returns: Option<&ReturnType>,
    ) -> Result<Value, RpcError> {
        let recorded = match self.inner.dispatcher.get_transaction(hash).await {
            Ok(Some(v)) => TransactionInfo::from_value(v).ok(),
            _ => None,
        };
        let call = match recorded {
            Some(info) => info.replay_call(),
            None => intent.call_object(self.call_data(intent)?.as_deref(), None),
        };
        let value = self.inner.dispatcher.eth_call(call, returns.cloned()).await?;
        if is_empty_result(&value) {
            return Err(RpcError::NullCallReturn);
        }
        self.inner.codes.check(intent.method.as_deref(), returns, value)
    }

    /// One confirmation poll for `hash`.
    pub async fn check_block_hash(&self, hash: &str) -> Result<TxStatus, RpcError> {
        let status = self
            .status(hash)
            .ok_or_else(|| RpcError::TransactionNotFound { hash: hash.to_string() })?;
        if status.is_terminal() {
            return Ok(status);
        }

        let event = match self.inner.dispatcher.get_transaction(hash).await {
            Ok(Some(v)) => match TransactionInfo::from_value(v) {
                Ok(info) if info.is_mined() => TxEvent::Mined(info),
                _ => TxEvent::NotMined,
            },
            Ok(None) => TxEvent::NotFound {
                nonce_collision: self.has_nonce_sibling(hash),
            },
            Err(e) if e.is_fatal() => {
                self.abandon(hash, e.clone());
                return Err(e);
            }
            Err(e) => {
                tracing::debug!(hash = %hash, error = %e, "poll failed, counting as not mined");
                TxEvent::NotMined
            }
        };

        let poll_max = self.inner.dispatcher.config().tx_poll_max;
        let (record, effects) = {
            let mut records = lock(&self.inner.records);
            let Some(record) = records.get_mut(hash) else {
                return Err(RpcError::TransactionNotFound { hash: hash.to_string() });
            };
            let effects = record.apply(event, poll_max);
            (record.clone(), effects)
        };
        if self.inner.dispatcher.debug().tx {
            tracing::debug!(hash = %hash, polls = record.poll_count, status = ?record.status, "poll");
        }
        self.run_effects(&record, effects);
        Ok(record.status)
    }

    fn has_nonce_sibling(&self, hash: &str) -> bool {
        let records = lock(&self.inner.records);
        let Some(this) = records.get(hash) else {
            return false;
        };
        records.values().any(|other| this.shares_nonce_with(other))
    }

    fn run_effects(&self, record: &TxRecord, effects: Vec<Effect>) {
        let hash = record.hash.as_str();
        for effect in effects {
            match effect {
                Effect::SchedulePoll => {
                    let interval = self.inner.dispatcher.config().tx_poll_interval;
                    self.schedule_poll(hash.to_string(), interval);
                }
                Effect::CancelPoll => self.cancel_poll(hash),
                Effect::NotifySuccess(info) => {
                    tracing::info!(hash = %hash, block = ?info.block_number, "transaction confirmed");
                    let response = serde_json::to_value(&info).unwrap_or(Value::Null);
                    if let Some(handler) = self.take_handler(hash) {
                        handler.on_success(info);
                    }
                    self.inner.relay.notify(RelayStatus::Success, &record.intent, &response);
                }
                Effect::NotifyFailed(err) => {
                    tracing::warn!(hash = %hash, error = %err, "transaction failed");
                    self.notify_failed(&record.intent, hash, err);
                }
                Effect::DecrementNonce => {
                    if let Some(raw) = &record.raw {
                        self.inner.nonces.decrement(&raw.from);
                    }
                }
                Effect::Resubmit => {
                    tracing::info!(hash = %hash, kind = record.intent.kind(), "nonce collision, resubmitting");
                    if let Some(handler) = self.take_handler(hash) {
                        self.resubmit(record.intent.clone(), handler);
                    }
                }
            }
        }
    }

    fn resubmit(&self, intent: TxIntent, handler: Arc<dyn TxHandler>) {
        let this = self.clone();
        let task: BoxFuture<'static, ()> = async move {
            if let Err(e) = this.transact(intent, handler.clone()).await {
                handler.on_failed(e);
            }
        }
        .boxed();
        tokio::spawn(task);
    }

    /// Mark a still-pending record failed and report `err`.
    fn abandon(&self, hash: &str, err: RpcError) {
        let intent = {
            let mut records = lock(&self.inner.records);
            match records.get_mut(hash) {
                Some(record) if !record.status.is_terminal() => {
                    record.status = TxStatus::Failed;
                    record.intent.clone()
                }
                _ => return,
            }
        };
        self.cancel_poll(hash);
        tracing::warn!(hash = %hash, error = %err, "transaction abandoned");
        self.notify_failed(&intent, hash, err);
    }

    fn take_handler(&self, hash: &str) -> Option<Arc<dyn TxHandler>> {
        lock(&self.inner.handlers).remove(hash)
    }

    fn notify_sent(&self, intent: &TxIntent, hash: &str, call_return: Option<Value>) {
        let response = json!({ "hash": hash, "callReturn": call_return });
        let handler = lock(&self.inner.handlers).get(hash).cloned();
        if let Some(handler) = handler {
            handler.on_sent(SentTx {
                hash: hash.to_string(),
                call_return,
            });
        }
        self.inner.relay.notify(RelayStatus::Sent, intent, &response);
    }

    fn notify_failed(&self, intent: &TxIntent, hash: &str, err: RpcError) {
        let mut response = err.to_json();
        response["hash"] = Value::String(hash.to_string());
        if let Some(handler) = self.take_handler(hash) {
            handler.on_failed(err);
        }
        self.inner.relay.notify(RelayStatus::Failed, intent, &response);
    }

    // ─── Poll timers ────────────────────────────────────────────────────────

    fn schedule_poll(&self, hash: String, delay: Duration) {
        let mut timers = lock(&self.inner.timers);
        let task = self.clone().poll_task(hash.clone(), delay);
        // inserted before the task can look for its own handle
        if let Some(stale) = timers.insert(hash, tokio::spawn(task)) {
            stale.abort();
        }
    }

    fn poll_task(self, hash: String, delay: Duration) -> BoxFuture<'static, ()> {
        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            lock(&self.inner.timers).remove(&hash);
            if let Err(e) = self.check_block_hash(&hash).await {
                tracing::warn!(hash = %hash, error = %e, "confirmation poll failed");
            }
        }
        .boxed()
    }

    fn cancel_poll(&self, hash: &str) {
        if let Some(handle) = lock(&self.inner.timers).remove(hash) {
            handle.abort();
        }
    }

    /// Cancel every poll and forget all transactions, nonces and latency
    /// statistics. Node lists are kept.
    pub fn clear(&self) {
        for (_, handle) in lock(&self.inner.timers).drain() {
            handle.abort();
        }
        lock(&self.inner.records).clear();
        lock(&self.inner.handlers).clear();
        self.inner.nonces.clear();
        self.inner.dispatcher.clear();
    }
}
