//! The keyspace: one shard's partition of the key-value store.
//!
//! A `Keyspace` owns a flat `AHashMap<Box<str>, Entry>` and handles
//! get, set, delete, existence checks, and TTL queries. Expired keys are
//! removed lazily on access and actively by [`crate::expiry`]. Memory
//! usage is tracked on every mutation so [`crate::eviction`] can keep the
//! shard under its limits.
//!
//! There is no locking here. A keyspace is only ever touched by the shard
//! task that owns it.

use std::time::Duration;

use ahash::AHashMap;
use rand::seq::IteratorRandom;

use crate::eviction::{self, EvictionPolicy};
use crate::memory::{self, MemoryTracker};
use crate::time;
use crate::types::Value;

mod string;

pub use string::{SetCondition, SetExpire, SetOptions, SetOutcome};

const OOM_MSG: &str = "OOM command not allowed when used memory > 'maxmemory'";

/// Error returned by write operations that fail under memory limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    /// Limit reached and the eviction policy is `NoEviction`.
    OutOfMemory,
}

impl std::fmt::Display for WriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteError::OutOfMemory => write!(f, "{OOM_MSG}"),
        }
    }
}

impl std::error::Error for WriteError {}

/// Errors that can occur during INCR/DECR operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncrError {
    /// The stored value is not integer-encoded.
    NotAnInteger,
    /// Increment or decrement would overflow i64.
    Overflow,
    /// Memory limit reached.
    OutOfMemory,
}

impl std::fmt::Display for IncrError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncrError::NotAnInteger => write!(f, "value is not an integer or out of range"),
            IncrError::Overflow => write!(f, "increment or decrement would overflow"),
            IncrError::OutOfMemory => write!(f, "{OOM_MSG}"),
        }
    }
}

impl std::error::Error for IncrError {}

/// Configuration for a single keyspace / shard.
#[derive(Debug, Clone, Default)]
pub struct ShardConfig {
    /// Maximum estimated memory in bytes. `None` means unlimited.
    pub max_memory: Option<usize>,
    /// Maximum number of keys. `None` means unlimited.
    pub max_keys: Option<usize>,
    /// What to do when a limit is reached.
    pub eviction_policy: EvictionPolicy,
    /// Numeric identifier for this shard (used in logs).
    pub shard_id: u16,
}

/// A single entry in the keyspace: a value plus optional expiration and
/// the access metadata eviction ranks victims by.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub(crate) value: Value,
    /// Unix expiry timestamp in ms. 0 = no expiry.
    pub(crate) expires_at_ms: u64,
    /// Unix last access timestamp in ms (LRU, LFU decay).
    pub(crate) last_access_ms: u64,
    /// Logarithmic access frequency counter (LFU).
    pub(crate) lfu_counter: u8,
}

impl Entry {
    fn new(value: Value, expires_at_ms: u64) -> Self {
        Self {
            value,
            expires_at_ms,
            last_access_ms: time::now_ms(),
            lfu_counter: eviction::LFU_INIT_VAL,
        }
    }

    /// Returns `true` if this entry has passed its expiration time.
    fn is_expired(&self) -> bool {
        time::is_expired(self.expires_at_ms)
    }

    /// Marks this entry as accessed right now.
    fn touch(&mut self) {
        let now = time::now_ms();
        self.lfu_counter = eviction::lfu_touch(self.lfu_counter, self.last_access_ms, now);
        self.last_access_ms = now;
    }
}

/// Result of a TTL query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TtlResult {
    /// Key exists and has a TTL. Returns remaining seconds.
    Seconds(u64),
    /// Key exists and has a TTL. Returns remaining milliseconds.
    Milliseconds(u64),
    /// Key exists but has no expiration set.
    NoExpiry,
    /// Key does not exist.
    NotFound,
}

/// Aggregated statistics for a keyspace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyspaceStats {
    /// Number of stored keys. Expired keys that neither lazy nor active
    /// expiry has reached yet are still counted.
    pub key_count: usize,
    /// Estimated memory usage in bytes.
    pub used_bytes: usize,
    /// Number of keys with an expiration set.
    pub keys_with_expiry: usize,
    /// Cumulative count of keys removed by expiration (lazy + active).
    pub keys_expired: u64,
    /// Cumulative count of keys removed by eviction.
    pub keys_evicted: u64,
}

impl KeyspaceStats {
    /// Folds another shard's stats into this one.
    pub fn merge(&mut self, other: &KeyspaceStats) {
        self.key_count += other.key_count;
        self.used_bytes += other.used_bytes;
        self.keys_with_expiry += other.keys_with_expiry;
        self.keys_expired += other.keys_expired;
        self.keys_evicted += other.keys_evicted;
    }
}

/// The object store for one shard.
///
/// All operations are single-threaded per shard — no internal locking.
/// Memory usage is tracked incrementally on every mutation.
pub struct Keyspace {
    entries: AHashMap<Box<str>, Entry>,
    memory: MemoryTracker,
    config: ShardConfig,
    /// Number of entries that currently have an expiration set.
    expiry_count: usize,
    /// Cumulative count of keys removed by expiration (lazy + active).
    expired_total: u64,
    /// Cumulative count of keys removed by eviction.
    evicted_total: u64,
}

impl Keyspace {
    /// Creates a new, empty keyspace with default config (no limits).
    pub fn new() -> Self {
        Self::with_config(ShardConfig::default())
    }

    /// Creates a new, empty keyspace with the given config.
    pub fn with_config(config: ShardConfig) -> Self {
        Self {
            entries: AHashMap::new(),
            memory: MemoryTracker::new(),
            config,
            expiry_count: 0,
            expired_total: 0,
            evicted_total: 0,
        }
    }

    /// Returns the shard config this keyspace enforces.
    pub fn config(&self) -> &ShardConfig {
        &self.config
    }

    /// Removes a key. Returns `true` if the key existed (and wasn't expired).
    pub fn del(&mut self, key: &str) -> bool {
        if self.remove_if_expired(key) {
            return false;
        }
        self.remove_entry(key).is_some()
    }

    /// Returns `true` if the key exists and hasn't expired.
    pub fn exists(&mut self, key: &str) -> bool {
        if self.remove_if_expired(key) {
            return false;
        }
        self.entries.contains_key(key)
    }

    /// Returns the TTL status for a key in seconds:
    /// - `Seconds(n)` if the key has a TTL
    /// - `NoExpiry` if the key exists without a TTL
    /// - `NotFound` if the key doesn't exist
    pub fn ttl(&mut self, key: &str) -> TtlResult {
        if self.remove_if_expired(key) {
            return TtlResult::NotFound;
        }
        match self.entries.get(key) {
            Some(entry) => match time::remaining_secs(entry.expires_at_ms) {
                Some(secs) => TtlResult::Seconds(secs),
                None => TtlResult::NoExpiry,
            },
            None => TtlResult::NotFound,
        }
    }

    /// Millisecond variant of [`Keyspace::ttl`].
    pub fn pttl(&mut self, key: &str) -> TtlResult {
        if self.remove_if_expired(key) {
            return TtlResult::NotFound;
        }
        match self.entries.get(key) {
            Some(entry) => match time::remaining_ms(entry.expires_at_ms) {
                Some(ms) => TtlResult::Milliseconds(ms),
                None => TtlResult::NoExpiry,
            },
            None => TtlResult::NotFound,
        }
    }

    /// Returns aggregated stats for this keyspace.
    ///
    /// All fields are tracked incrementally — this is O(1).
    pub fn stats(&self) -> KeyspaceStats {
        KeyspaceStats {
            key_count: self.memory.key_count(),
            used_bytes: self.memory.used_bytes(),
            keys_with_expiry: self.expiry_count,
            keys_expired: self.expired_total,
            keys_evicted: self.evicted_total,
        }
    }

    /// Returns the number of stored entries, including expired ones that
    /// haven't been purged yet. Call [`purge_expired`](Self::purge_expired)
    /// first for a count of live keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the keyspace has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes all keys from the keyspace.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.memory.reset();
        self.expiry_count = 0;
    }

    /// Randomly samples up to `count` keys that carry an expiry and removes
    /// the ones that have elapsed.
    ///
    /// Returns `(sampled, removed)`. Used by the active expiration cycle
    /// to reclaim keys that no one is reading.
    pub fn expire_sample(&mut self, count: usize) -> (usize, usize) {
        if self.expiry_count == 0 {
            return (0, 0);
        }

        let mut rng = rand::rng();
        let keys_to_check: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at_ms != time::NO_EXPIRY)
            .map(|(k, _)| k)
            .choose_multiple(&mut rng, count)
            .into_iter()
            .map(|k| String::from(&**k))
            .collect();

        let mut removed = 0;
        for key in &keys_to_check {
            if self.remove_if_expired(key) {
                removed += 1;
            }
        }
        (keys_to_check.len(), removed)
    }

    /// Removes every entry whose deadline has passed. Returns how many
    /// were removed.
    ///
    /// O(n) in the number of entries, so it is only used where an exact
    /// live count is needed (DBSIZE).
    pub fn purge_expired(&mut self) -> usize {
        if self.expiry_count == 0 {
            return 0;
        }
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired())
            .map(|(k, _)| String::from(&**k))
            .collect();

        for key in &expired {
            self.remove_entry(key);
        }
        self.expired_total += expired.len() as u64;
        expired.len()
    }

    /// Returns `true` if the shard is above any configured limit.
    pub fn over_limit(&self) -> bool {
        self.would_exceed(0, 0)
    }

    /// Evicts one key chosen by the configured policy.
    ///
    /// Samples `EVICTION_SAMPLE_SIZE` entries and removes the weakest by
    /// [`eviction::rank`]. Uses reservoir sampling so no Vec is allocated
    /// per attempt. Returns `false` if there was nothing to evict or the
    /// policy forbids eviction.
    pub(crate) fn evict_one(&mut self) -> bool {
        let policy = self.config.eviction_policy;
        if policy == EvictionPolicy::NoEviction || self.entries.is_empty() {
            return false;
        }

        let now = time::now_ms();
        let mut rng = rand::rng();
        let mut best_key: Option<&str> = None;
        let mut best_rank = (u64::MAX, u64::MAX);
        let mut seen = 0usize;

        for (key, entry) in &self.entries {
            seen += 1;
            let candidate = if seen <= eviction::EVICTION_SAMPLE_SIZE {
                true
            } else {
                use rand::Rng;
                rng.random_range(0..seen) < eviction::EVICTION_SAMPLE_SIZE
            };
            if !candidate {
                continue;
            }
            let rank = eviction::rank(entry, policy, now);
            if rank < best_rank {
                best_rank = rank;
                best_key = Some(&**key);
            }
        }

        let Some(victim) = best_key.map(str::to_owned) else {
            return false;
        };
        if self.remove_entry(&victim).is_some() {
            self.evicted_total += 1;
            true
        } else {
            false
        }
    }

    /// Returns `true` if adding `extra_bytes` and `extra_keys` would push
    /// the shard over a configured limit.
    fn would_exceed(&self, extra_bytes: usize, extra_keys: usize) -> bool {
        if let Some(max) = self.config.max_memory {
            if self.memory.used_bytes().saturating_add(extra_bytes) > memory::effective_limit(max) {
                return true;
            }
        }
        if let Some(max) = self.config.max_keys {
            if self.memory.key_count().saturating_add(extra_keys) > max {
                return true;
            }
        }
        false
    }

    /// Checks whether a write that grows the shard by `extra_bytes` and
    /// `extra_keys` may proceed.
    ///
    /// Only `NoEviction` refuses writes. The sampling policies let the
    /// write through and the shard evicts after the command completes, so
    /// eviction never interleaves with a command's NX/XX/GET checks.
    fn admit_write(&self, extra_bytes: usize, extra_keys: usize) -> bool {
        self.config.eviction_policy != EvictionPolicy::NoEviction
            || !self.would_exceed(extra_bytes, extra_keys)
    }

    /// Adjusts the expiry count when replacing an entry whose TTL status
    /// may have changed.
    fn adjust_expiry_count(&mut self, had_expiry: bool, has_expiry: bool) {
        match (had_expiry, has_expiry) {
            (false, true) => self.expiry_count += 1,
            (true, false) => self.expiry_count = self.expiry_count.saturating_sub(1),
            _ => {}
        }
    }

    /// Unconditionally removes an entry and updates accounting.
    fn remove_entry(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.memory.remove(key, &entry.value);
        if entry.expires_at_ms != time::NO_EXPIRY {
            self.expiry_count = self.expiry_count.saturating_sub(1);
        }
        Some(entry)
    }

    /// Checks if a key is expired and removes it if so. Returns `true`
    /// if the key was removed.
    fn remove_if_expired(&mut self, key: &str) -> bool {
        let expired = self
            .entries
            .get(key)
            .map(|e| e.is_expired())
            .unwrap_or(false);

        if expired {
            self.remove_entry(key);
            self.expired_total += 1;
        }
        expired
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new()
    }
}
