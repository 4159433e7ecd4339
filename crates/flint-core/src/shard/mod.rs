//! Shard: an independent partition of the keyspace.
//!
//! Each shard runs as a single tokio task that exclusively owns its
//! [`Keyspace`]. Commands arrive over a bounded mpsc channel, each with
//! its own oneshot reply, and execute strictly one at a time. Active
//! expiration and eviction run in the same task between commands, so
//! neither can observe or disturb a command halfway through.
//!
//! After waking from `select!`, the loop drains the channel with
//! `try_recv()` before re-entering `select!`, so bursts of requests don't
//! pay the scheduler wake-up cost once per command.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::ShardError;
use crate::eviction::{self, EvictionPolicy};
use crate::expiry::{self, ExpiryConfig};
use crate::keyspace::{
    IncrError, Keyspace, KeyspaceStats, SetOptions, SetOutcome, ShardConfig, TtlResult,
    WriteError,
};
use crate::types::Value;

/// A protocol-agnostic command sent to a shard.
#[derive(Debug, Clone)]
pub enum ShardRequest {
    Get {
        key: String,
    },
    /// Reads a key without updating its LRU/LFU metadata. Used when
    /// re-evaluating watches, which are not client accesses.
    Peek {
        key: String,
    },
    Set {
        key: String,
        value: Bytes,
        options: SetOptions,
    },
    /// INCR, DECR, INCRBY and DECRBY all land here.
    IncrBy {
        key: String,
        delta: i64,
    },
    /// Deletes every key in the group owned by this shard.
    Del {
        keys: Vec<String>,
    },
    /// Counts the live keys in the group owned by this shard.
    Exists {
        keys: Vec<String>,
    },
    Ttl {
        key: String,
    },
    Pttl {
        key: String,
    },
    /// Returns the live key count for this shard, purging expired keys
    /// first.
    DbSize,
    /// Returns keyspace stats for this shard.
    Stats,
    /// Removes every key in this shard.
    FlushDb,
}

impl ShardRequest {
    /// Returns true for requests that may modify the keyspace.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            ShardRequest::Set { .. }
                | ShardRequest::IncrBy { .. }
                | ShardRequest::Del { .. }
                | ShardRequest::FlushDb
        )
    }
}

/// The shard's response to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardResponse {
    /// A value (or None for a miss).
    Value(Option<Value>),
    /// SET result, including whether the write happened.
    Set(SetOutcome),
    /// Integer result of a counter operation.
    Integer(i64),
    /// The keys a DEL actually removed.
    Removed(Vec<String>),
    /// A count (EXISTS, DBSIZE).
    Count(usize),
    /// TTL query result.
    Ttl(TtlResult),
    /// Full stats for a shard.
    Stats(KeyspaceStats),
    /// Simple acknowledgement (FLUSHDB).
    Ok,
    /// Memory limit reached and eviction policy is NoEviction.
    OutOfMemory,
    /// A command-level error message.
    Err(String),
}

impl ShardResponse {
    /// Returns true if this response reports a change to the keyspace.
    pub fn is_mutation(&self) -> bool {
        match self {
            ShardResponse::Set(outcome) => outcome.written,
            ShardResponse::Integer(_) | ShardResponse::Ok => true,
            ShardResponse::Removed(keys) => !keys.is_empty(),
            _ => false,
        }
    }
}

/// A request bundled with its reply channel.
#[derive(Debug)]
struct ShardMessage {
    request: ShardRequest,
    reply: oneshot::Sender<ShardResponse>,
}

/// A cloneable handle for sending commands to a shard task.
///
/// Wraps the mpsc sender so callers don't need to manage oneshot
/// channels directly.
#[derive(Debug, Clone)]
pub struct ShardHandle {
    tx: mpsc::Sender<ShardMessage>,
}

impl ShardHandle {
    /// Sends a request and waits for the response.
    ///
    /// Returns `ShardError::Unavailable` if the shard task has stopped.
    pub async fn send(&self, request: ShardRequest) -> Result<ShardResponse, ShardError> {
        let rx = self.dispatch(request).await?;
        rx.await.map_err(|_| ShardError::Unavailable)
    }

    /// Sends a request and returns the reply channel without waiting for
    /// the response. Used by the engine to fan out to several shards
    /// before collecting results.
    pub async fn dispatch(
        &self,
        request: ShardRequest,
    ) -> Result<oneshot::Receiver<ShardResponse>, ShardError> {
        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(ShardMessage { request, reply })
            .await
            .map_err(|_| ShardError::Unavailable)?;
        Ok(reply_rx)
    }
}

/// Spawns a shard task and returns the handle for communicating with it.
///
/// `buffer` controls the mpsc channel capacity. The task exits once every
/// handle has been dropped.
pub fn spawn_shard(buffer: usize, config: ShardConfig, expiry: ExpiryConfig) -> ShardHandle {
    let (tx, rx) = mpsc::channel(buffer);
    tokio::spawn(run_shard(rx, config, expiry));
    ShardHandle { tx }
}

/// The shard's main loop. Processes messages and runs periodic active
/// expiration until the channel closes.
async fn run_shard(
    mut rx: mpsc::Receiver<ShardMessage>,
    config: ShardConfig,
    expiry_config: ExpiryConfig,
) {
    let shard_id = config.shard_id;
    let mut keyspace = Keyspace::with_config(config);

    let mut expiry_tick = tokio::time::interval(expiry_config.tick);
    expiry_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Some(msg) => {
                        process_message(&mut keyspace, msg);
                        while let Ok(msg) = rx.try_recv() {
                            process_message(&mut keyspace, msg);
                        }
                    }
                    None => break, // all handles dropped
                }
            }
            _ = expiry_tick.tick() => {
                let removed = expiry::run_expiration_cycle(&mut keyspace, &expiry_config);
                if removed > 0 {
                    debug!(shard_id, removed, "active expiry pass");
                }
            }
        }
    }

    debug!(shard_id, "shard stopped");
}

/// Runs one request to completion, then the eviction pass, then replies.
///
/// Eviction happens before the reply is sent so the caller never sees a
/// state the shard is about to correct.
fn process_message(ks: &mut Keyspace, msg: ShardMessage) {
    let response = dispatch(ks, msg.request);

    if ks.config().eviction_policy != EvictionPolicy::NoEviction {
        let evicted = eviction::run_eviction_cycle(ks);
        if evicted > 0 {
            debug!(shard_id = ks.config().shard_id, evicted, "eviction pass");
        }
    }

    // the caller may have stopped waiting; the work is done either way
    let _ = msg.reply.send(response);
}

/// Converts an `IncrError` result into a response.
fn incr_result(result: Result<i64, IncrError>) -> ShardResponse {
    match result {
        Ok(val) => ShardResponse::Integer(val),
        Err(IncrError::OutOfMemory) => ShardResponse::OutOfMemory,
        Err(e) => ShardResponse::Err(e.to_string()),
    }
}

/// Routes a request to the appropriate keyspace operation.
///
/// This is the hot path: every read and write goes through here.
fn dispatch(ks: &mut Keyspace, req: ShardRequest) -> ShardResponse {
    match req {
        ShardRequest::Get { key } => ShardResponse::Value(ks.get(&key)),
        ShardRequest::Peek { key } => ShardResponse::Value(ks.peek(&key)),
        ShardRequest::Set {
            key,
            value,
            options,
        } => match ks.set(key, value, options) {
            Ok(outcome) => ShardResponse::Set(outcome),
            Err(WriteError::OutOfMemory) => ShardResponse::OutOfMemory,
        },
        ShardRequest::IncrBy { key, delta } => incr_result(ks.incr_by(&key, delta)),
        ShardRequest::Del { keys } => {
            ShardResponse::Removed(keys.into_iter().filter(|k| ks.del(k)).collect())
        }
        ShardRequest::Exists { keys } => {
            ShardResponse::Count(keys.iter().filter(|k| ks.exists(k)).count())
        }
        ShardRequest::Ttl { key } => ShardResponse::Ttl(ks.ttl(&key)),
        ShardRequest::Pttl { key } => ShardResponse::Ttl(ks.pttl(&key)),
        ShardRequest::DbSize => {
            ks.purge_expired();
            ShardResponse::Count(ks.len())
        }
        ShardRequest::Stats => ShardResponse::Stats(ks.stats()),
        ShardRequest::FlushDb => {
            ks.clear();
            ShardResponse::Ok
        }
    }
}
