//! ethrpc-tx — transaction lifecycle for ethrpc.
//!
//! Submit a transaction, recover its call return, poll until it is mined
//! and resubmit it when it is dropped because another transaction took
//! its nonce.
//!
//! # Quick start
//! ```rust,no_run
//! use std::sync::Arc;
//! use ethrpc_core::{Dispatcher, RpcConfig};
//! use ethrpc_http::HttpTransport;
//! use ethrpc_tx::{TxIntent, TxManager, TxNotification};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(HttpTransport::with_defaults()?);
//! let dispatcher = Arc::new(Dispatcher::new(RpcConfig::default(), transport));
//! let manager = TxManager::pre_encoded(dispatcher);
//!
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<TxNotification>();
//! manager.send_ether("0xd403f1657106c138843ea831bd99cbd2a4b8d648", "0.1", None, Arc::new(tx)).await?;
//! while let Some(note) = rx.recv().await {
//!     println!("{note:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod codes;
pub mod intent;
pub mod manager;
pub mod raw;
pub mod record;
pub mod relay;

pub use codes::ErrorCodes;
pub use intent::{AbiEncoder, PreEncoded, TransactionInfo, TxIntent};
pub use manager::{SentTx, TxHandler, TxManager, TxNotification, SEND_ETHER_GAS};
pub use raw::{NonceTracker, PackagedTx, RawTxSigner};
pub use record::{Effect, RawTxMeta, TxEvent, TxRecord, TxStatus};
pub use relay::{Relay, RelayEvent, RelayStatus};
