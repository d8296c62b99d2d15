//! Per-transaction state and the pure transition function that drives it.

use serde::Serialize;
use serde_json::Value;

use ethrpc_core::error::RpcError;

use crate::intent::{TransactionInfo, TxIntent};

/// Lifecycle state of a tracked transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Unconfirmed,
    Failed,
    Resubmitted,
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Sender and nonce of a transaction submitted through the raw path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawTxMeta {
    pub from: String,
    pub nonce: u64,
}

/// Outcome of one confirmation poll.
#[derive(Debug, Clone, PartialEq)]
pub enum TxEvent {
    /// Included in a block.
    Mined(TransactionInfo),
    /// Known to the node, no block yet.
    NotMined,
    /// The node has no record of the hash.
    NotFound { nonce_collision: bool },
}

/// Side effect requested by a transition, executed by the manager.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    SchedulePoll,
    CancelPoll,
    NotifySuccess(TransactionInfo),
    NotifyFailed(RpcError),
    DecrementNonce,
    Resubmit,
}

/// A tracked transaction.
#[derive(Debug, Clone, Serialize)]
pub struct TxRecord {
    pub hash: String,
    pub intent: TxIntent,
    pub poll_count: u32,
    pub status: TxStatus,
    pub call_return: Option<Value>,
    pub raw: Option<RawTxMeta>,
}

impl TxRecord {
    pub fn pending(hash: impl Into<String>, intent: TxIntent, raw: Option<RawTxMeta>) -> Self {
        Self {
            hash: hash.into(),
            intent,
            poll_count: 0,
            status: TxStatus::Pending,
            call_return: None,
            raw,
        }
    }

    /// Apply one poll outcome. Terminal records ignore further events.
    pub fn apply(&mut self, event: TxEvent, poll_max: u32) -> Vec<Effect> {
        if self.status.is_terminal() {
            return Vec::new();
        }
        self.poll_count += 1;
        match event {
            TxEvent::Mined(mut info) => {
                self.status = TxStatus::Confirmed;
                info.call_return = self.call_return.clone();
                vec![Effect::CancelPoll, Effect::NotifySuccess(info)]
            }
            TxEvent::NotMined if self.poll_count < poll_max => vec![Effect::SchedulePoll],
            TxEvent::NotMined => {
                self.status = TxStatus::Unconfirmed;
                vec![
                    Effect::CancelPoll,
                    Effect::NotifyFailed(RpcError::TransactionNotConfirmed {
                        hash: self.hash.clone(),
                    }),
                ]
            }
            TxEvent::NotFound { nonce_collision: true } => {
                // failed, then immediately reissued under a new hash
                self.status = TxStatus::Resubmitted;
                vec![Effect::CancelPoll, Effect::DecrementNonce, Effect::Resubmit]
            }
            TxEvent::NotFound { nonce_collision: false } => {
                self.status = TxStatus::Failed;
                vec![
                    Effect::CancelPoll,
                    Effect::DecrementNonce,
                    Effect::NotifyFailed(RpcError::TransactionNotFound {
                        hash: self.hash.clone(),
                    }),
                ]
            }
        }
    }

    /// Whether `other` is a different raw transaction from the same
    /// account with the same nonce.
    pub fn shares_nonce_with(&self, other: &TxRecord) -> bool {
        match (&self.raw, &other.raw) {
            (Some(a), Some(b)) => self.hash != other.hash && a.from.eq_ignore_ascii_case(&b.from) && a.nonce == b.nonce,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TxRecord {
        TxRecord::pending("0xb479", TxIntent::new("0xd403"), None)
    }

    fn mined() -> TransactionInfo {
        TransactionInfo {
            hash: "0xb479".into(),
            block_hash: Some("0x043d".into()),
            ..Default::default()
        }
    }

    #[test]
    fn mined_confirms_and_attaches_call_return() {
        let mut r = record();
        r.call_return = Some(Value::String("1".into()));
        let effects = r.apply(TxEvent::Mined(mined()), 64);
        assert_eq!(r.status, TxStatus::Confirmed);
        assert_eq!(r.poll_count, 1);
        match &effects[1] {
            Effect::NotifySuccess(info) => assert_eq!(info.call_return, Some(Value::String("1".into()))),
            other => panic!("unexpected effect {other:?}"),
        }
    }

    #[test]
    fn poll_budget_exhaustion() {
        let mut r = record();
        assert_eq!(r.apply(TxEvent::NotMined, 2), vec![Effect::SchedulePoll]);
        let effects = r.apply(TxEvent::NotMined, 2);
        assert_eq!(r.poll_count, 2);
        assert_eq!(r.status, TxStatus::Unconfirmed);
        assert_eq!(
            effects,
            vec![
                Effect::CancelPoll,
                Effect::NotifyFailed(RpcError::TransactionNotConfirmed { hash: "0xb479".into() })
            ]
        );
    }

    #[test]
    fn terminal_records_ignore_events() {
        let mut r = record();
        r.apply(TxEvent::Mined(mined()), 64);
        assert!(r.apply(TxEvent::NotMined, 64).is_empty());
        assert_eq!(r.poll_count, 1);
    }

    #[test]
    fn missing_without_sibling_fails() {
        let mut r = record();
        let effects = r.apply(TxEvent::NotFound { nonce_collision: false }, 64);
        assert_eq!(r.status, TxStatus::Failed);
        assert!(matches!(effects.last(), Some(Effect::NotifyFailed(RpcError::TransactionNotFound { .. }))));
    }

    #[test]
    fn missing_with_sibling_resubmits() {
        let mut r = record();
        let effects = r.apply(TxEvent::NotFound { nonce_collision: true }, 64);
        assert_eq!(r.status, TxStatus::Resubmitted);
        assert_eq!(effects, vec![Effect::CancelPoll, Effect::DecrementNonce, Effect::Resubmit]);
    }

    #[test]
    fn nonce_siblings() {
        let meta = |nonce| Some(RawTxMeta { from: "0xAA".into(), nonce });
        let a = TxRecord::pending("0x1", TxIntent::new("0xd"), meta(7));
        let b = TxRecord::pending("0x2", TxIntent::new("0xd"), Some(RawTxMeta { from: "0xaa".into(), nonce: 7 }));
        let c = TxRecord::pending("0x3", TxIntent::new("0xd"), meta(8));
        assert!(a.shares_nonce_with(&b));
        assert!(!a.shares_nonce_with(&a));
        assert!(!a.shares_nonce_with(&c));
        assert!(!a.shares_nonce_with(&record()));
    }
}
