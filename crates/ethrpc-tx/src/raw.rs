//! Raw-transaction packaging, nonce tracking and the signer seam.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;

use ethrpc_core::dispatcher::Dispatcher;
use ethrpc_core::error::RpcError;
use ethrpc_core::numeric;

use crate::intent::TxIntent;

/// Base cost of any transaction.
pub const TX_BASE_GAS: u64 = 21_000;
/// Calldata cost per zero byte.
pub const TX_DATA_ZERO_GAS: u64 = 4;
/// Calldata cost per non-zero byte.
pub const TX_DATA_NONZERO_GAS: u64 = 16;

/// An unsigned transaction ready for signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackagedTx {
    pub from: String,
    pub to: String,
    pub data: Option<String>,
    pub value: String,
    pub gas: String,
    pub gas_price: String,
    pub nonce: u64,
    pub chain_id: u64,
}

impl PackagedTx {
    /// Minimum gas the transaction needs before execution.
    pub fn intrinsic_gas(&self) -> u64 {
        let data = self.data.as_deref().map(numeric::strip_0x).unwrap_or_default();
        let bytes = hex::decode(data).unwrap_or_default();
        bytes.iter().fold(TX_BASE_GAS, |acc, b| {
            acc + if *b == 0 { TX_DATA_ZERO_GAS } else { TX_DATA_NONZERO_GAS }
        })
    }

    /// Fails with `TRANSACTION_INVALID` when the declared gas cannot cover
    /// the intrinsic cost.
    pub fn validate_gas(&self) -> Result<(), RpcError> {
        let declared = numeric::parse_quantity(&self.gas).ok_or_else(|| RpcError::TransactionInvalid {
            detail: format!("unparseable gas {}", self.gas),
        })?;
        let needed = self.intrinsic_gas();
        if declared < needed {
            return Err(RpcError::TransactionInvalid {
                detail: format!("gas {declared} below intrinsic cost {needed}"),
            });
        }
        Ok(())
    }
}

/// Holds an account key and signs packaged transactions.
pub trait RawTxSigner: Send + Sync + 'static {
    /// Address of the signing account.
    fn address(&self) -> &str;

    /// Signed, serialized transaction as hex. Implementations fail with
    /// [`RpcError::TransactionInvalid`] when the declared gas is
    /// insufficient (see [`PackagedTx::validate_gas`]).
    fn sign(&self, tx: &PackagedTx) -> Result<String, RpcError>;
}

/// Highest nonce handed out per account.
#[derive(Debug, Default)]
pub struct NonceTracker {
    highest: Mutex<HashMap<String, u64>>,
}

impl NonceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next nonce for `address` given the node's pending count, recording
    /// it as the new highest.
    pub fn next(&self, address: &str, pending_count: u64) -> u64 {
        let mut highest = self.highest.lock().unwrap_or_else(|p| p.into_inner());
        let key = address.to_ascii_lowercase();
        let nonce = match highest.get(&key) {
            Some(h) => pending_count.max(h + 1),
            None => pending_count,
        };
        highest.insert(key, nonce);
        nonce
    }

    pub fn highest(&self, address: &str) -> Option<u64> {
        self.highest
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&address.to_ascii_lowercase())
            .copied()
    }

    /// Release the highest slot so a reissue can reuse it.
    pub fn decrement(&self, address: &str) {
        let mut highest = self.highest.lock().unwrap_or_else(|p| p.into_inner());
        let key = address.to_ascii_lowercase();
        match highest.get(&key).copied() {
            Some(0) => {
                highest.remove(&key);
            }
            Some(h) => {
                highest.insert(key, h - 1);
            }
            None => {}
        }
    }

    pub fn clear(&self) {
        self.highest.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}

/// Package `intent` for `signer`, filling gas price, nonce and chain id
/// from the node, then sign it.
pub async fn package_and_sign(
    dispatcher: &Dispatcher,
    nonces: &NonceTracker,
    signer: &dyn RawTxSigner,
    intent: &TxIntent,
    data: Option<String>,
) -> Result<(PackagedTx, String), RpcError> {
    if intent.to.is_empty() {
        return Err(RpcError::TransactionFailed {
            detail: "raw transaction has no recipient".into(),
        });
    }
    let from = signer.address().to_string();

    let gas_price = match &intent.gas_price {
        Some(price) => price.clone(),
        None => dispatcher.gas_price().await?,
    };
    let chain_id = dispatcher
        .version()
        .await?
        .parse::<u64>()
        .map_err(|e| RpcError::InvalidResponse {
            detail: format!("net_version: {e}"),
        })?;
    let pending = dispatcher.tx_count(&from, Some("pending")).await?;
    let nonce = nonces.next(&from, pending);

    let packaged = PackagedTx {
        from,
        to: intent.to.clone(),
        data,
        value: intent.value.clone().unwrap_or_else(|| "0x0".into()),
        gas: intent
            .gas
            .clone()
            .unwrap_or_else(|| dispatcher.config().default_gas.clone()),
        gas_price,
        nonce,
        chain_id,
    };
    if dispatcher.debug().broadcast || dispatcher.debug().nonce {
        tracing::debug!(
            packaged = %serde_json::to_string(&packaged).unwrap_or_default(),
            "packaged raw transaction"
        );
    }

    match signer.sign(&packaged) {
        Ok(signed) => Ok((packaged, signed)),
        Err(e) => {
            // the slot was never used
            nonces.decrement(&packaged.from);
            Err(e)
        }
    }
}
