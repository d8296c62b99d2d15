//! Transaction relay: mirror every lifecycle notification to an observer.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use alloy_primitives::keccak256;
use serde::Serialize;
use serde_json::Value;

use crate::intent::TxIntent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayStatus {
    Sent,
    Success,
    Failed,
}

/// One relayed notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayEvent {
    pub hash: String,
    /// Intent label, or its method name.
    #[serde(rename = "type")]
    pub kind: String,
    pub status: RelayStatus,
    pub data: Value,
    pub response: Value,
}

pub type RelayFn = Arc<dyn Fn(RelayEvent) + Send + Sync>;

/// Relay hook plus the set of methods that are never relayed.
#[derive(Default)]
pub struct Relay {
    hook: RwLock<Option<RelayFn>>,
    no_relay: RwLock<HashSet<String>>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_hook(&self, hook: impl Fn(RelayEvent) + Send + Sync + 'static) {
        *self.hook.write().unwrap_or_else(|p| p.into_inner()) = Some(Arc::new(hook));
    }

    pub fn clear_hook(&self) {
        *self.hook.write().unwrap_or_else(|p| p.into_inner()) = None;
    }

    pub fn exclude(&self, method: impl Into<String>) {
        self.no_relay
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(method.into());
    }

    pub fn include(&self, method: &str) {
        self.no_relay.write().unwrap_or_else(|p| p.into_inner()).remove(method);
    }

    /// Forward a notification about `intent`. Only intents with a method
    /// that is not excluded are relayed. Without a hash in `response` the
    /// event is keyed by the keccak-256 of the serialized intent.
    pub fn notify(&self, status: RelayStatus, intent: &TxIntent, response: &Value) {
        let Some(method) = intent.method.as_deref() else {
            return;
        };
        if self.no_relay.read().unwrap_or_else(|p| p.into_inner()).contains(method) {
            return;
        }
        let Some(hook) = self.hook.read().unwrap_or_else(|p| p.into_inner()).clone() else {
            return;
        };
        let data = serde_json::to_value(intent).unwrap_or(Value::Null);
        let hash = match response.get("hash").and_then(Value::as_str) {
            Some(h) => h.to_string(),
            None => format!("0x{}", hex::encode(keccak256(data.to_string().as_bytes()))),
        };
        hook(RelayEvent {
            hash,
            kind: intent.kind().to_string(),
            status,
            data,
            response: response.clone(),
        });
    }
}
