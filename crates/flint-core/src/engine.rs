//! The engine: coordinator for the sharded keyspace.
//!
//! Routes single-key operations to the correct shard based on a hash
//! of the key, splits multi-key operations into one request per owning
//! shard, and fans broadcast commands out to every shard. Each shard is
//! an independent tokio task, so there are no locks on the hot path.
//!
//! The engine is also where writes meet the watch machinery: after a
//! shard reports a mutation, the touched keys are handed to the watch
//! task without waiting on it.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::error::ShardError;
use crate::expiry::ExpiryConfig;
use crate::keyspace::{KeyspaceStats, ShardConfig};
use crate::shard::{self, ShardHandle, ShardRequest, ShardResponse};
use crate::types::Value;
use crate::watch::{SessionId, WatchHandle, WatchNotification, WatchQuery, WatchRegistry, WriteSet};

/// Channel buffer size per shard. 256 is large enough to absorb
/// bursts without putting meaningful back-pressure on sessions.
const SHARD_BUFFER: usize = 256;

/// Configuration for the engine, passed down to each shard.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Per-shard configuration (memory limits, eviction policy).
    pub shard: ShardConfig,
    /// Active expiration tuning.
    pub expiry: ExpiryConfig,
}

/// The sharded engine. Owns handles to all shard tasks and routes
/// requests by key hash.
///
/// `Clone` is cheap: it clones the shard senders and the watch handle.
#[derive(Debug, Clone)]
pub struct Engine {
    shards: Vec<ShardHandle>,
    /// Absent only on the watch task's own read-only engine.
    watch: Option<WatchHandle>,
}

impl Engine {
    /// Creates an engine with `shard_count` shards using default config.
    ///
    /// Each shard is spawned as a tokio task immediately.
    /// Panics if `shard_count` is zero.
    pub fn new(shard_count: usize) -> Self {
        Self::with_config(shard_count, EngineConfig::default())
    }

    /// Creates an engine with `shard_count` shards and the given config,
    /// plus the watch task that re-evaluates subscriptions.
    ///
    /// Panics if `shard_count` is zero.
    pub fn with_config(shard_count: usize, config: EngineConfig) -> Self {
        assert!(shard_count > 0, "shard count must be at least 1");

        let shards: Vec<ShardHandle> = (0..shard_count)
            .map(|i| {
                let mut shard_config = config.shard.clone();
                shard_config.shard_id = i as u16;
                shard::spawn_shard(SHARD_BUFFER, shard_config, config.expiry.clone())
            })
            .collect();

        let reader = Engine {
            shards: shards.clone(),
            watch: None,
        };
        let watch = WatchHandle::spawn(reader, Arc::new(WatchRegistry::new()));

        info!(
            shards = shard_count,
            policy = %config.shard.eviction_policy,
            max_memory = ?config.shard.max_memory,
            max_keys = ?config.shard.max_keys,
            "engine started"
        );

        Self {
            shards,
            watch: Some(watch),
        }
    }

    /// Returns the number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Routes a request to the shard that owns `key`.
    ///
    /// A write that the shard reports as applied is forwarded to the
    /// watch task as a write-set for `key`.
    pub async fn route(
        &self,
        key: &str,
        request: ShardRequest,
    ) -> Result<ShardResponse, ShardError> {
        let is_write = request.is_write();
        let idx = self.shard_for_key(key);
        let resp = self.shards[idx].send(request).await?;
        if is_write && resp.is_mutation() {
            self.notify(WriteSet::Keys(vec![key.to_owned()]));
        }
        Ok(resp)
    }

    /// Splits `keys` by owning shard and sends one request per shard.
    ///
    /// Dispatches every group before awaiting any reply, so shards work
    /// in parallel. Shards that own none of the keys are not contacted;
    /// an empty key list contacts nobody and returns no responses. The
    /// caller aggregates the partial results. Keys a DEL actually removed
    /// are forwarded to the watch task.
    pub async fn route_grouped<F>(
        &self,
        keys: &[String],
        make_req: F,
    ) -> Result<Vec<ShardResponse>, ShardError>
    where
        F: Fn(Vec<String>) -> ShardRequest,
    {
        let mut groups: Vec<Vec<String>> = vec![Vec::new(); self.shards.len()];
        for key in keys {
            groups[self.shard_for_key(key)].push(key.clone());
        }

        let mut receivers = Vec::new();
        for (idx, group) in groups.into_iter().enumerate() {
            if group.is_empty() {
                continue;
            }
            receivers.push(self.shards[idx].dispatch(make_req(group)).await?);
        }

        let mut results = Vec::with_capacity(receivers.len());
        for rx in receivers {
            results.push(rx.await.map_err(|_| ShardError::Unavailable)?);
        }

        let removed: Vec<String> = results
            .iter()
            .filter_map(|resp| match resp {
                ShardResponse::Removed(keys) => Some(keys.iter().cloned()),
                _ => None,
            })
            .flatten()
            .collect();
        if !removed.is_empty() {
            self.notify(WriteSet::Keys(removed));
        }

        Ok(results)
    }

    /// Sends a request to every shard and collects all responses.
    ///
    /// Dispatches to all shards first (so they start processing in
    /// parallel), then collects the replies. Used for DBSIZE, FLUSHDB
    /// and stats. A broadcast write re-evaluates every watched query.
    pub async fn broadcast<F>(&self, make_req: F) -> Result<Vec<ShardResponse>, ShardError>
    where
        F: Fn() -> ShardRequest,
    {
        let mut is_write = false;
        let mut receivers = Vec::with_capacity(self.shards.len());
        for shard in &self.shards {
            let request = make_req();
            is_write |= request.is_write();
            receivers.push(shard.dispatch(request).await?);
        }

        let mut results = Vec::with_capacity(receivers.len());
        for rx in receivers {
            results.push(rx.await.map_err(|_| ShardError::Unavailable)?);
        }

        if is_write {
            self.notify(WriteSet::All);
        }
        Ok(results)
    }

    /// Collects and sums the stats of every shard.
    pub async fn stats(&self) -> Result<KeyspaceStats, ShardError> {
        let mut total = KeyspaceStats::default();
        for resp in self.broadcast(|| ShardRequest::Stats).await? {
            if let ShardResponse::Stats(stats) = resp {
                total.merge(&stats);
            }
        }
        Ok(total)
    }

    /// Subscribes `session` to `query` and returns the fingerprint along
    /// with the query's current result.
    ///
    /// Later changes arrive on `tx` as [`WatchNotification`]s.
    pub async fn watch(
        &self,
        session: SessionId,
        query: WatchQuery,
        tx: mpsc::Sender<WatchNotification>,
    ) -> Result<(u64, Option<Value>), ShardError> {
        let registry = self.registry()?;
        // register before evaluating so no write can slip between them
        let fingerprint = registry.subscribe(session, query.clone(), tx);
        match query.evaluate(self).await {
            Ok(result) => {
                registry.record_initial(fingerprint, session, result.clone());
                Ok((fingerprint, result))
            }
            Err(e) => {
                registry.unsubscribe(session, fingerprint);
                Err(e)
            }
        }
    }

    /// Removes one of `session`'s subscriptions. Returns `true` if it
    /// existed.
    pub fn unwatch(&self, session: SessionId, fingerprint: u64) -> bool {
        self.registry()
            .map(|r| r.unsubscribe(session, fingerprint))
            .unwrap_or(false)
    }

    /// Drops every subscription held by `session`.
    pub fn close_session(&self, session: SessionId) -> usize {
        self.registry()
            .map(|r| r.close_session(session))
            .unwrap_or(0)
    }

    /// Number of live watch subscriptions across all sessions.
    pub fn watch_count(&self) -> usize {
        self.registry()
            .map(|r| r.subscriber_count())
            .unwrap_or(0)
    }

    fn registry(&self) -> Result<&WatchRegistry, ShardError> {
        self.watch
            .as_ref()
            .map(|w| w.registry.as_ref())
            .ok_or(ShardError::Unavailable)
    }

    fn notify(&self, writes: WriteSet) {
        if let Some(watch) = &self.watch {
            watch.notify(writes);
        }
    }

    /// Determines which shard owns a given key.
    fn shard_for_key(&self, key: &str) -> usize {
        shard_index(key, self.shards.len())
    }
}

/// Pure function: maps a key to a shard index.
///
/// ahash is fast and deterministic within a process, which is all local
/// sharding needs. Shard routing is trusted internal logic, so a
/// DoS-resistant hash buys nothing here.
pub fn shard_index(key: &str, shard_count: usize) -> usize {
    let mut hasher = ahash::AHasher::default();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % shard_count
}
