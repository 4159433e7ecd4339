//! Eviction policies and the post-command eviction pass.
//!
//! Victims are picked by sampling a handful of keys and removing the
//! weakest one, rather than keeping an exact LRU list or frequency heap.
//! LFU uses a logarithmic 8-bit counter that halves its growth rate as
//! it climbs and decays with idle time.

use rand::Rng;

use crate::keyspace::{Entry, Keyspace};

/// Number of keys sampled per eviction attempt.
pub const EVICTION_SAMPLE_SIZE: usize = 16;

/// Upper bound on evictions per pass, so a large config change can't
/// stall the shard loop in one go.
pub const MAX_EVICTION_ATTEMPTS: usize = 128;

/// Starting counter for new keys. Non-zero so fresh keys aren't evicted
/// before they get a chance to be read.
pub const LFU_INIT_VAL: u8 = 5;

/// Higher values make the counter saturate more slowly.
const LFU_LOG_FACTOR: f64 = 10.0;

/// Idle minutes that cost one counter step.
const LFU_DECAY_MINUTES: u64 = 1;

/// What a shard does once it reaches its memory or key limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Reject writes that would exceed the limit.
    #[default]
    NoEviction,
    /// Evict the approximately least recently used key.
    AllKeysLru,
    /// Evict the approximately least frequently used key.
    AllKeysLfu,
}

impl std::fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EvictionPolicy::NoEviction => "noeviction",
            EvictionPolicy::AllKeysLru => "allkeys-lru",
            EvictionPolicy::AllKeysLfu => "allkeys-lfu",
        };
        f.write_str(name)
    }
}

/// Returns the counter after `idle` decay, without mutating anything.
fn lfu_decayed(counter: u8, last_access_ms: u64, now_ms: u64) -> u8 {
    let idle_minutes = now_ms.saturating_sub(last_access_ms) / 60_000;
    let steps = idle_minutes / LFU_DECAY_MINUTES;
    counter.saturating_sub(steps.min(u8::MAX as u64) as u8)
}

/// Applies decay for idle time, then a probabilistic logarithmic bump.
pub(crate) fn lfu_touch(counter: u8, last_access_ms: u64, now_ms: u64) -> u8 {
    let counter = lfu_decayed(counter, last_access_ms, now_ms);
    if counter == u8::MAX {
        return counter;
    }
    let base = counter.saturating_sub(LFU_INIT_VAL) as f64;
    let p = 1.0 / (base * LFU_LOG_FACTOR + 1.0);
    if rand::rng().random::<f64>() < p {
        counter + 1
    } else {
        counter
    }
}

/// Orders entries for victim selection under `policy`. Lower ranks are
/// evicted first.
pub(crate) fn rank(entry: &Entry, policy: EvictionPolicy, now_ms: u64) -> (u64, u64) {
    match policy {
        EvictionPolicy::AllKeysLru => (entry.last_access_ms, 0),
        EvictionPolicy::AllKeysLfu => (
            lfu_decayed(entry.lfu_counter, entry.last_access_ms, now_ms) as u64,
            entry.last_access_ms,
        ),
        EvictionPolicy::NoEviction => (u64::MAX, u64::MAX),
    }
}

/// Evicts keys until the keyspace is back under its limits.
///
/// Runs after each command on the shard task. Returns the number of keys
/// evicted. A no-op under `NoEviction`, where writes are refused instead.
pub fn run_eviction_cycle(ks: &mut Keyspace) -> usize {
    let mut evicted = 0;
    while evicted < MAX_EVICTION_ATTEMPTS && ks.over_limit() {
        if !ks.evict_one() {
            break;
        }
        evicted += 1;
    }
    evicted
}
