//! Memory tracking for the keyspace.
//!
//! Provides byte-level accounting of memory used by entries. Updated
//! on every mutation so the shard can enforce its limits and report
//! stats without scanning the entire keyspace.

use crate::types::Value;

/// Estimated overhead per entry in the HashMap.
///
/// Accounts for the boxed key pointer, the `Entry` struct (value enum,
/// expiry and access timestamps, LFU counter) and the map's per-slot
/// bookkeeping. Precision isn't critical: the estimate only drives
/// eviction triggers and stats.
pub(crate) const ENTRY_OVERHEAD: usize = 96;

/// Percentage of the configured maximum the shard actually allows.
///
/// Leaves headroom for allocator overhead and fragmentation that the
/// per-entry estimate can't see.
const LIMIT_PERCENT: usize = 90;

/// Tracks memory usage for a single keyspace.
///
/// All updates are explicit — callers must call `add` / `remove` on every
/// mutation. This avoids any hidden scanning cost.
#[derive(Debug)]
pub struct MemoryTracker {
    used_bytes: usize,
    key_count: usize,
}

impl MemoryTracker {
    /// Creates a tracker with zero usage.
    pub fn new() -> Self {
        Self {
            used_bytes: 0,
            key_count: 0,
        }
    }

    /// Resets tracking to zero. Used by FLUSHDB.
    pub fn reset(&mut self) {
        self.used_bytes = 0;
        self.key_count = 0;
    }

    /// Returns the current estimated memory usage in bytes.
    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    /// Returns the number of tracked keys.
    pub fn key_count(&self) -> usize {
        self.key_count
    }

    /// Records the addition of a new entry.
    pub fn add(&mut self, key: &str, value: &Value) {
        self.used_bytes += entry_size(key, value);
        self.key_count += 1;
    }

    /// Records the removal of an entry.
    pub fn remove(&mut self, key: &str, value: &Value) {
        let size = entry_size(key, value);
        self.used_bytes = self.used_bytes.saturating_sub(size);
        self.key_count = self.key_count.saturating_sub(1);
    }

    /// Adjusts tracking when a key's value is overwritten.
    ///
    /// Key count stays the same.
    pub fn replace(&mut self, key: &str, old_value: &Value, new_value: &Value) {
        let old_size = entry_size(key, old_value);
        let new_size = entry_size(key, new_value);
        self.used_bytes = self
            .used_bytes
            .saturating_sub(old_size)
            .saturating_add(new_size);
    }
}

impl Default for MemoryTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Estimates the total memory footprint of a single entry.
///
/// key heap allocation + value bytes + fixed per-entry overhead.
pub fn entry_size(key: &str, value: &Value) -> usize {
    key.len() + value_size(value) + ENTRY_OVERHEAD
}

/// Returns the byte size of a value's payload.
///
/// Integers live inline in the enum, so they cost nothing beyond the
/// fixed overhead.
pub fn value_size(value: &Value) -> usize {
    match value {
        Value::String(data) => data.len(),
        Value::Integer(_) => 0,
    }
}

/// Returns the byte budget the shard enforces for a configured maximum.
pub fn effective_limit(max_bytes: usize) -> usize {
    max_bytes / 100 * LIMIT_PERCENT + max_bytes % 100 * LIMIT_PERCENT / 100
}
