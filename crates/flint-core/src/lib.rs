//! flint-core: the storage engine.
//!
//! Owns the keyspace, value encoding, expiration, eviction, and the
//! watch engine. Built around a shared-nothing design where each shard
//! task exclusively manages a partition of keys.

pub mod engine;
pub mod error;
pub mod eviction;
pub mod expiry;
pub mod keyspace;
pub mod memory;
pub mod shard;
pub mod time;
pub mod types;
pub mod watch;

pub use engine::{Engine, EngineConfig};
pub use error::ShardError;
pub use eviction::EvictionPolicy;
pub use expiry::ExpiryConfig;
pub use keyspace::{
    IncrError, Keyspace, KeyspaceStats, SetCondition, SetExpire, SetOptions, SetOutcome,
    ShardConfig, TtlResult, WriteError,
};
pub use shard::{ShardHandle, ShardRequest, ShardResponse};
pub use types::Value;
pub use watch::{SessionId, WatchNotification, WatchQuery, WatchRegistry, WriteSet};
