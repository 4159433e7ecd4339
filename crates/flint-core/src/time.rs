//! Wall-clock time utilities for expiry bookkeeping.
//!
//! Expiry deadlines are absolute unix timestamps in milliseconds so that
//! relative (EX/PX) and absolute (EXAT/PXAT) options share one
//! representation. A `u64` is half the size of `Option<SystemTime>`.

use std::time::{SystemTime, UNIX_EPOCH};

/// Sentinel value meaning "no expiry".
pub const NO_EXPIRY: u64 = 0;

/// Returns the current unix time in milliseconds.
#[inline]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        // a clock set before 1970 is treated as the epoch itself
        .unwrap_or(0)
}

/// Returns true if the given expiry timestamp has passed.
#[inline]
pub fn is_expired(expires_at_ms: u64) -> bool {
    expires_at_ms != NO_EXPIRY && now_ms() >= expires_at_ms
}

/// Returns the absolute deadline `millis` from now.
///
/// Never returns `NO_EXPIRY`, even for a zero delta, so a zero TTL still
/// marks the entry as expiring.
#[inline]
pub fn deadline_after(millis: u64) -> u64 {
    now_ms().saturating_add(millis).max(1)
}

/// Normalizes an absolute unix-ms deadline supplied by a client.
///
/// The epoch itself would collide with the `NO_EXPIRY` sentinel, so it is
/// nudged forward by one millisecond. Both mean "already elapsed".
#[inline]
pub fn absolute_deadline(unix_ms: u64) -> u64 {
    unix_ms.max(1)
}

/// Returns remaining TTL in seconds, or None if no expiry.
#[inline]
pub fn remaining_secs(expires_at_ms: u64) -> Option<u64> {
    remaining_ms(expires_at_ms).map(|ms| ms / 1000)
}

/// Returns remaining TTL in milliseconds, or None if no expiry.
#[inline]
pub fn remaining_ms(expires_at_ms: u64) -> Option<u64> {
    if expires_at_ms == NO_EXPIRY {
        None
    } else {
        Some(expires_at_ms.saturating_sub(now_ms()))
    }
}
