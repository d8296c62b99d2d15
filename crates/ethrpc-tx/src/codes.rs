//! Contract error-code tables.
//!
//! Contracts signal failure by returning small sentinel integers that
//! collide with legitimate results for other methods, so lookup is
//! two-tier: a global table keyed by the literal returned value, then a
//! per-method table keyed by the value read as a decimal number.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::{json, Value};

use ethrpc_core::error::RpcError;
use ethrpc_core::numeric;
use ethrpc_core::returns::ReturnType;

/// Message for the global `"0x"` sentinel.
pub const NO_RESPONSE_MESSAGE: &str = "no response or bad input";

/// Global and method-scoped error-code tables.
pub struct ErrorCodes {
    /// literal value → message
    global: RwLock<HashMap<String, String>>,
    /// method → decimal code → message
    by_method: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl ErrorCodes {
    /// Tables seeded with the global `"0x"` entry.
    pub fn new() -> Self {
        let codes = Self {
            global: RwLock::new(HashMap::new()),
            by_method: RwLock::new(HashMap::new()),
        };
        codes.register_global("0x", NO_RESPONSE_MESSAGE);
        codes
    }

    pub fn register_global(&self, value: impl Into<String>, message: impl Into<String>) {
        self.global
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(value.into(), message.into());
    }

    /// Register `code` (decimal, may be negative) for `method`.
    pub fn register(&self, method: impl Into<String>, code: impl Into<String>, message: impl Into<String>) {
        self.by_method
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .entry(method.into())
            .or_default()
            .insert(code.into(), message.into());
    }

    /// Load method tables from `{ "<method>": { "<code>": "<message>" } }`.
    /// Returns the number of codes registered.
    pub fn load_json(&self, json: &str) -> Result<usize, serde_json::Error> {
        let tables: HashMap<String, HashMap<String, String>> = serde_json::from_str(json)?;
        let mut count = 0;
        for (method, codes) in tables {
            for (code, message) in codes {
                self.register(method.clone(), code, message);
                count += 1;
            }
        }
        Ok(count)
    }

    /// Resolve a single scalar result to `(code, message)`.
    pub fn lookup(&self, method: Option<&str>, returns: Option<&ReturnType>, value: &str) -> Option<(String, String)> {
        if let Some(message) = self.global.read().unwrap_or_else(|p| p.into_inner()).get(value) {
            return Some((value.to_string(), message.clone()));
        }
        let method = method?;
        let numeric_return = !returns.map(ReturnType::is_string).unwrap_or(false);
        if !numeric_return && !numeric::is_hex(value) {
            return None;
        }
        let code = numeric::bignum(value)?.to_string();
        let tables = self.by_method.read().unwrap_or_else(|p| p.into_inner());
        tables
            .get(method)?
            .get(&code)
            .map(|message| (code, message.clone()))
    }

    /// Rewrite a decoded response: arrays element-wise, exception-shaped
    /// objects to `{error: name, message}`, known sentinels to
    /// `{error: code, message}`. Everything else passes through.
    pub fn map_error_codes(&self, method: Option<&str>, returns: Option<&ReturnType>, response: Value) -> Value {
        match response {
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| self.map_error_codes(method, returns, item))
                    .collect(),
            ),
            Value::Object(obj) if obj.get("error").is_none() && is_exception(&obj) => {
                json!({ "error": obj["name"], "message": obj["message"] })
            }
            Value::String(s) => match self.lookup(method, returns, &s) {
                Some((code, message)) => json!({ "error": code, "message": message }),
                None => Value::String(s),
            },
            other => other,
        }
    }

    /// Like [`ErrorCodes::map_error_codes`] for a single result, but a
    /// sentinel becomes an `Err`.
    pub fn check(&self, method: Option<&str>, returns: Option<&ReturnType>, response: Value) -> Result<Value, RpcError> {
        if let Value::String(s) = &response {
            if let Some((code, message)) = self.lookup(method, returns, s) {
                return Err(RpcError::Contract {
                    method: method.unwrap_or_default().to_string(),
                    code,
                    message,
                });
            }
        }
        match self.map_error_codes(method, returns, response) {
            Value::Object(obj) if obj.contains_key("error") && obj.contains_key("message") => {
                Err(RpcError::Contract {
                    method: method.unwrap_or_default().to_string(),
                    code: value_text(&obj["error"]),
                    message: value_text(&obj["message"]),
                })
            }
            mapped => Ok(mapped),
        }
    }
}

impl Default for ErrorCodes {
    fn default() -> Self {
        Self::new()
    }
}

fn is_exception(obj: &serde_json::Map<String, Value>) -> bool {
    matches!(
        (obj.get("name"), obj.get("message")),
        (Some(Value::String(_)), Some(Value::String(_)))
    )
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes() -> ErrorCodes {
        let codes = ErrorCodes::new();
        codes.register("buyCompleteSets", "-1", "market not found");
        codes.register("buyCompleteSets", "0", "not enough cash");
        codes
    }

    #[test]
    fn global_literal_wins() {
        let mapped = codes().map_error_codes(Some("anything"), None, json!("0x"));
        assert_eq!(mapped, json!({ "error": "0x", "message": NO_RESPONSE_MESSAGE }));
    }

    #[test]
    fn method_scoped_sentinel() {
        let c = codes();
        let minus_one = "0xffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff";
        let mapped = c.map_error_codes(Some("buyCompleteSets"), Some(&ReturnType::Number), json!(minus_one));
        assert_eq!(mapped, json!({ "error": "-1", "message": "market not found" }));
        // the same value from another method is a legitimate result
        let passthrough = c.map_error_codes(Some("getMarkets"), Some(&ReturnType::Number), json!(minus_one));
        assert_eq!(passthrough, json!(minus_one));
    }

    #[test]
    fn string_returns_only_match_hex() {
        let c = codes();
        let s = ReturnType::String;
        assert_eq!(c.map_error_codes(Some("buyCompleteSets"), Some(&s), json!("0")), json!("0"));
        assert_eq!(
            c.map_error_codes(Some("buyCompleteSets"), Some(&s), json!("0x0")),
            json!({ "error": "0", "message": "not enough cash" })
        );
    }

    #[test]
    fn arrays_mapped_recursively() {
        let c = codes();
        let mapped = c.map_error_codes(Some("buyCompleteSets"), None, json!(["0x1", "-1"]));
        assert_eq!(mapped, json!(["0x1", { "error": "-1", "message": "market not found" }]));
    }

    #[test]
    fn exception_objects_folded() {
        let mapped = codes().map_error_codes(None, None, json!({ "name": "TypeError", "message": "boom" }));
        assert_eq!(mapped, json!({ "error": "TypeError", "message": "boom" }));
    }

    #[test]
    fn check_returns_contract_error() {
        let c = codes();
        let err = c.check(Some("buyCompleteSets"), Some(&ReturnType::Number), json!("-1")).unwrap_err();
        assert_eq!(err.to_json(), json!({ "error": "-1", "message": "market not found" }));
        assert_eq!(c.check(Some("reputationFaucet"), Some(&ReturnType::Number), json!("1")).unwrap(), json!("1"));
    }

    #[test]
    fn load_json_registers_tables() {
        let c = ErrorCodes::new();
        let n = c
            .load_json(r#"{ "sellShares": { "-2": "bad outcome", "-3": "no shares" } }"#)
            .unwrap();
        assert_eq!(n, 2);
        assert!(c.lookup(Some("sellShares"), None, "-3").is_some());
    }
}
