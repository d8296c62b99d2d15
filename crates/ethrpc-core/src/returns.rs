//! Return-type descriptors and the coercions applied to raw results.

use serde_json::Value;

use crate::numeric::{self, strip_0x};

/// Width of one ABI word in hex digits.
pub const WORD_HEX_LEN: usize = 64;

/// Out-of-band hint selecting how a raw result is decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnType {
    Number,
    Unfix,
    String,
    Address,
    Hash,
    Bool,
    Int256,
    /// The call returns nothing worth verifying.
    Null,
    /// `X[]` — a packed array of ABI words.
    Array(Box<ReturnType>),
    Other(String),
}

impl ReturnType {
    /// Parse a descriptor string, case-insensitively.
    pub fn parse(descriptor: &str) -> Self {
        let lower = descriptor.trim().to_ascii_lowercase();
        if let Some(base) = lower.strip_suffix("[]") {
            return Self::Array(Box::new(Self::parse(base)));
        }
        match lower.as_str() {
            "number" => Self::Number,
            "unfix" => Self::Unfix,
            "string" => Self::String,
            "address" => Self::Address,
            "hash" => Self::Hash,
            "bool" => Self::Bool,
            "int256" => Self::Int256,
            "null" => Self::Null,
            _ => Self::Other(lower),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Self::String)
    }
}

impl std::fmt::Display for ReturnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number => write!(f, "number"),
            Self::Unfix => write!(f, "unfix"),
            Self::String => write!(f, "string"),
            Self::Address => write!(f, "address"),
            Self::Hash => write!(f, "hash"),
            Self::Bool => write!(f, "bool"),
            Self::Int256 => write!(f, "int256"),
            Self::Null => write!(f, "null"),
            Self::Array(base) => write!(f, "{base}[]"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

/// Returns `true` for the canonical empty placeholders (`null`, `""`, `"0x"`).
pub fn is_empty_result(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty() || s == "0x",
        _ => false,
    }
}

/// Apply a return-type coercion to a raw `result`.
///
/// Booleans and empty placeholders pass through untouched. Without a
/// descriptor, hex strings are normalised (leading zero bytes dropped).
pub fn apply_returns(returns: Option<&ReturnType>, result: Value) -> Value {
    if result.is_boolean() || is_empty_result(&result) {
        return result;
    }
    let Value::String(raw) = result else {
        return result;
    };
    let Some(returns) = returns else {
        return Value::String(normalize_hex(&raw));
    };
    match returns {
        ReturnType::Array(base) => unmarshal(&raw, base),
        ReturnType::String => numeric::decode_hex_string(&raw)
            .map(Value::String)
            .unwrap_or(Value::String(raw)),
        other => coerce_scalar(other, raw),
    }
}

fn normalize_hex(raw: &str) -> String {
    if raw.len() > 2 && numeric::is_hex(raw) {
        numeric::remove_leading_zeros(raw)
    } else {
        raw.to_string()
    }
}

fn coerce_scalar(returns: &ReturnType, raw: String) -> Value {
    let decoded = match returns {
        ReturnType::Number | ReturnType::Int256 => numeric::hex_to_decimal(&raw),
        ReturnType::Unfix => numeric::unfix(&raw),
        ReturnType::Address => address_from_word(&raw),
        ReturnType::Bool => {
            return numeric::bignum(&raw)
                .map(|n| Value::Bool(!n.is_zero()))
                .unwrap_or(Value::String(raw));
        }
        ReturnType::Hash | ReturnType::Null | ReturnType::Other(_) => Some(normalize_hex(&raw)),
        ReturnType::String | ReturnType::Array(_) => None,
    };
    Value::String(decoded.unwrap_or(raw))
}

fn address_from_word(raw: &str) -> Option<String> {
    let digits = strip_0x(raw);
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let tail = if digits.len() > 40 {
        &digits[digits.len() - 40..]
    } else {
        digits
    };
    Some(numeric::pad_left(&tail.to_ascii_lowercase(), 40))
}

/// Split a packed array result into 64-digit words and coerce each one.
///
/// A leading count word (equal to the remaining element count) is
/// dropped, as is a leading `offset, count` pair.
pub fn unmarshal(raw: &str, base: &ReturnType) -> Value {
    if raw.len() < WORD_HEX_LEN + 2 {
        return Value::String(raw.to_string());
    }
    let digits = strip_0x(raw);
    let mut words: Vec<String> = digits
        .as_bytes()
        .chunks(WORD_HEX_LEN)
        .map(|chunk| format!("0x{}", String::from_utf8_lossy(chunk)))
        .collect();

    if !words.is_empty() {
        let n = words.len() as u64;
        let first = numeric::parse_quantity(&words[0]);
        let second = words.get(1).and_then(|w| numeric::parse_quantity(w));
        if first == Some(n - 1) {
            words.remove(0);
        } else if n >= 2 {
            let count = n - 2;
            if second == Some(count) || second.is_some_and(|s| s % 32 == 0 && s / 32 == count) {
                words.drain(..2);
            }
        }
    }

    Value::Array(
        words
            .into_iter()
            .map(|word| match base {
                ReturnType::Number | ReturnType::Int256 => {
                    Value::String(numeric::hex_to_decimal(&word).unwrap_or(word))
                }
                ReturnType::Unfix => Value::String(numeric::unfix(&word).unwrap_or(word)),
                ReturnType::Address => Value::String(address_from_word(&word).unwrap_or(word)),
                _ => Value::String(word),
            })
            .collect(),
    )
}
