//! Active expiration via random sampling.
//!
//! Keys that nobody reads again would otherwise linger until their next
//! access. Each tick the shard samples keys that carry a deadline and
//! drops the elapsed ones, repeating while the sample stays dirty.

use std::time::Duration;

use crate::keyspace::Keyspace;

/// If more than this fraction of the sample was expired, go again.
const EXPIRED_THRESHOLD: f64 = 0.25;

/// Tuning for the active expiration cycle.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// How often each shard runs a cycle.
    pub tick: Duration,
    /// Maximum keys to sample per round.
    pub sample_size: usize,
    /// Maximum rounds per tick, to avoid starving the command loop.
    pub max_rounds: usize,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            sample_size: 20,
            max_rounds: 3,
        }
    }
}

/// Runs one active expiration cycle on the keyspace.
///
/// Samples up to `sample_size` keys with a deadline per round and removes
/// the expired ones. Another round runs only if at least a quarter of the
/// sample had expired. Returns the total number of keys removed.
pub fn run_expiration_cycle(ks: &mut Keyspace, config: &ExpiryConfig) -> usize {
    let mut total_removed = 0;

    for _ in 0..config.max_rounds.max(1) {
        let (sampled, removed) = ks.expire_sample(config.sample_size);
        total_removed += removed;

        if sampled == 0 || (removed as f64) < (sampled as f64) * EXPIRED_THRESHOLD {
            break;
        }
    }

    total_removed
}
