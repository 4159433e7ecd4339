//! Value representation for stored entries.
//!
//! Strings that are the canonical decimal rendering of an `i64` are
//! stored as [`Value::Integer`]. Counter operations work on the integer
//! directly without reparsing, and reads hand back a numeric result
//! rather than a string.

use bytes::Bytes;

/// A stored value in the keyspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Binary-safe string data. Uses `Bytes` for cheap cloning.
    String(Bytes),

    /// Integer encoding of a numeric string.
    Integer(i64),
}

impl Value {
    /// Encodes raw client bytes, choosing the integer encoding when the
    /// bytes round-trip exactly through `i64`.
    ///
    /// "123" becomes `Integer(123)`, while "0123", "+5", " 7" and
    /// "9223372036854775808" stay strings so nothing observable is lost.
    pub fn from_bytes(data: Bytes) -> Self {
        match parse_canonical_i64(&data) {
            Some(n) => Value::Integer(n),
            None => Value::String(data),
        }
    }

    /// Returns the integer if this value is integer-encoded.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            Value::String(_) => None,
        }
    }
}

/// Parses `data` as an `i64` only if it is the canonical rendering:
/// optional leading `-`, no leading zeros, no sign on zero, no padding.
fn parse_canonical_i64(data: &[u8]) -> Option<i64> {
    // i64::MIN is 20 bytes with the sign
    if data.is_empty() || data.len() > 20 {
        return None;
    }
    let digits = data.strip_prefix(b"-").unwrap_or(data);
    match digits {
        [] => return None,
        [b'0'] if digits.len() != data.len() => return None, // "-0"
        [b'0', _, ..] => return None,
        _ => {}
    }
    if !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(data).ok()?.parse::<i64>().ok()
}
