//! Hex and number helpers shared by the response decoder and the
//! transaction layer.
//!
//! Hex quantities are read as 256-bit two's complement words, so
//! `0xff…ff` decodes to `-1`. Fixed-point values use `2^64` as one.

use alloy_primitives::{I256, U256};

/// Number of decimal places rendered for fixed-point values.
pub const UNFIX_DECIMALS: usize = 20;

/// Remove a leading `0x`/`0X`, if any.
pub fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// Add a `0x` prefix unless one is present.
pub fn prefix_hex(s: &str) -> String {
    if s.starts_with("0x") || s.starts_with("0X") {
        s.to_string()
    } else {
        format!("0x{s}")
    }
}

/// Left-pad a hex string with zeros to `width` digits and prefix it.
pub fn pad_left(s: &str, width: usize) -> String {
    let digits = strip_0x(s);
    format!("0x{digits:0>width$}")
}

/// Returns `true` for `0x`-prefixed strings made only of hex digits.
pub fn is_hex(s: &str) -> bool {
    match s.strip_prefix("0x") {
        Some(rest) => rest.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

/// Drop leading zero bytes; an all-zero value keeps one `0`.
pub fn remove_leading_zeros(s: &str) -> String {
    let mut digits = strip_0x(s);
    while let Some(rest) = digits.strip_prefix("00") {
        digits = rest;
    }
    if digits.is_empty() {
        "0x0".to_string()
    } else {
        prefix_hex(digits)
    }
}

/// Parse a hex word (two's complement) or a decimal integer string.
pub fn bignum(s: &str) -> Option<I256> {
    let s = s.trim();
    if s.starts_with("0x") || s.starts_with("0X") {
        let digits = strip_0x(s);
        if digits.is_empty() {
            return Some(I256::ZERO);
        }
        if digits.len() > 64 {
            return None;
        }
        U256::from_str_radix(digits, 16).ok().map(I256::from_raw)
    } else {
        I256::from_dec_str(s).ok()
    }
}

/// Decode a hex value as a signed decimal string.
pub fn hex_to_decimal(s: &str) -> Option<String> {
    bignum(s).map(|n| n.to_string())
}

/// Parse a JSON-RPC quantity (`0x`-prefixed, unsigned) into a `u64`.
pub fn parse_quantity(s: &str) -> Option<u64> {
    let digits = strip_0x(s);
    if digits.is_empty() {
        return Some(0);
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Encode a `u64` as a JSON-RPC quantity.
pub fn to_quantity(n: u64) -> String {
    format!("0x{n:x}")
}

/// Decode a fixed-point hex value (`value / 2^64`) as a decimal string.
pub fn unfix(s: &str) -> Option<String> {
    let n = bignum(s)?;
    let (sign, abs) = n.into_sign_and_abs();
    let mask: U256 = (U256::from(1u8) << 64usize) - U256::from(1u8);
    let mut int_part: U256 = abs >> 64usize;
    let frac_bits = abs & mask;

    let scale = U256::from(10u8).pow(U256::from(UNFIX_DECIMALS));
    let half: U256 = U256::from(1u8) << 63usize;
    let mut frac: U256 = (frac_bits * scale + half) >> 64usize;
    if frac >= scale {
        int_part += U256::from(1u8);
        frac -= scale;
    }

    let frac_str = format!("{:0>width$}", frac.to_string(), width = UNFIX_DECIMALS);
    let frac_str = frac_str.trim_end_matches('0');
    let negative = sign.is_negative() && !(int_part.is_zero() && frac_str.is_empty());

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(&int_part.to_string());
    if !frac_str.is_empty() {
        out.push('.');
        out.push_str(frac_str);
    }
    Some(out)
}

/// Encode a decimal number as a fixed-point hex word (`value * 2^64`).
pub fn fix(decimal: &str) -> Option<String> {
    let (negative, body) = match decimal.trim().strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, decimal.trim()),
    };
    let (int_str, frac_str) = body.split_once('.').unwrap_or((body, ""));
    let int_part = if int_str.is_empty() {
        U256::ZERO
    } else {
        U256::from_str_radix(int_str, 10).ok()?
    };
    let mut value: U256 = int_part << 64usize;
    if !frac_str.is_empty() {
        let frac = U256::from_str_radix(frac_str, 10).ok()?;
        let scale = U256::from(10u8).pow(U256::from(frac_str.len()));
        value += (frac << 64usize) / scale;
    }
    let signed = I256::from_raw(value);
    let signed = if negative { -signed } else { signed };
    Some(format!("0x{:x}", signed.into_raw()))
}

/// Decode hex bytes as text, trimming NUL padding.
///
/// ABI-encoded dynamic strings (offset word `0x20`, length word, data)
/// are unwrapped using the length word.
pub fn decode_hex_string(s: &str) -> Option<String> {
    let digits = strip_0x(s);
    let mut bytes = hex::decode(digits).ok()?;
    if bytes.len() >= 64 && U256::from_be_slice(&bytes[..32]) == U256::from(32u8) {
        let len = U256::from_be_slice(&bytes[32..64]);
        let available = bytes.len() - 64;
        if len <= U256::from(available) {
            let len = len.to::<usize>();
            bytes = bytes[64..64 + len].to_vec();
        }
    }
    while bytes.last() == Some(&0) {
        bytes.pop();
    }
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    Some(String::from_utf8_lossy(&bytes[start..]).into_owned())
}

/// Convert an ether amount (decimal string) to a wei quantity.
pub fn ether_to_wei_hex(ether: &str) -> Option<String> {
    alloy_primitives::utils::parse_ether(ether.trim())
        .ok()
        .map(|wei| format!("0x{wei:x}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_and_strip() {
        assert_eq!(strip_0x("0xabc"), "abc");
        assert_eq!(strip_0x("abc"), "abc");
        assert_eq!(prefix_hex("abc"), "0xabc");
        assert_eq!(prefix_hex("0xabc"), "0xabc");
        assert_eq!(pad_left("0x1", 4), "0x0001");
    }

    #[test]
    fn leading_zero_bytes_removed() {
        assert_eq!(remove_leading_zeros("0x000000aff9"), "0xaff9");
        assert_eq!(remove_leading_zeros("0x0000"), "0x0");
        assert_eq!(remove_leading_zeros("0x10"), "0x10");
    }

    #[test]
    fn twos_complement_words() {
        let minus_one = format!("0x{}", "f".repeat(64));
        assert_eq!(hex_to_decimal(&minus_one).unwrap(), "-1");
        assert_eq!(hex_to_decimal("0x05").unwrap(), "5");
        assert_eq!(hex_to_decimal("0xff").unwrap(), "255");
        assert_eq!(hex_to_decimal("0x").unwrap(), "0");
    }

    #[test]
    fn unfix_renders_decimals() {
        // 1.5 * 2^64
        assert_eq!(unfix("0x18000000000000000").unwrap(), "1.5");
        assert_eq!(unfix("0x10000000000000000").unwrap(), "1");
        assert_eq!(unfix("0x0").unwrap(), "0");
        let minus_two = fix("-2").unwrap();
        assert_eq!(unfix(&minus_two).unwrap(), "-2");
    }

    #[test]
    fn fix_then_unfix() {
        assert_eq!(unfix(&fix("0.25").unwrap()).unwrap(), "0.25");
        assert_eq!(unfix(&fix("42").unwrap()).unwrap(), "42");
    }

    #[test]
    fn abi_string_unwrapped() {
        let encoded = concat!(
            "0x",
            "0000000000000000000000000000000000000000000000000000000000000020",
            "0000000000000000000000000000000000000000000000000000000000000005",
            "626f6f6d21000000000000000000000000000000000000000000000000000000"
        );
        assert_eq!(decode_hex_string(encoded).unwrap(), "boom!");
        assert_eq!(decode_hex_string("0x626f6f6d210000").unwrap(), "boom!");
    }

    #[test]
    fn quantities() {
        assert_eq!(parse_quantity("0xf22"), Some(0xf22));
        assert_eq!(to_quantity(3874), "0xf22");
        assert_eq!(ether_to_wei_hex("1").unwrap(), "0xde0b6b3a7640000");
    }
}
