//! Watch engine: reactive re-evaluation of subscribed queries.
//!
//! A session watches a query (today only GET) and receives a
//! [`WatchNotification`] whenever a write changes the query's result.
//! Subscriptions are keyed by a fingerprint of the query, so any number
//! of sessions watching the same key share one re-evaluation.
//!
//! The registry is the one structure shared by every shard and session,
//! so it sits in DashMaps. Re-evaluation happens on a dedicated task fed
//! by an unbounded channel of write-sets. The command path only ever does
//! a non-blocking send, and delivery uses `try_send` into each session's
//! bounded queue, so a slow session can't stall a shard. A result that
//! finds the queue full is parked on the subscriber and retried by the
//! same task until it fits, so a lagging session still ends up on the
//! latest result.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ahash::{AHashMap, AHashSet};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::error::ShardError;
use crate::shard::{ShardRequest, ShardResponse};
use crate::types::Value;

/// How often results parked on full queues are retried.
const RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// Identifies a client session across subscriptions.
pub type SessionId = u64;

/// A read query whose result can be watched.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WatchQuery {
    Get { key: String },
}

impl WatchQuery {
    /// The command name reported in notifications.
    pub fn command(&self) -> &'static str {
        match self {
            WatchQuery::Get { .. } => "GET",
        }
    }

    /// The keys this query's result depends on.
    pub fn keys(&self) -> &[String] {
        match self {
            WatchQuery::Get { key } => std::slice::from_ref(key),
        }
    }

    /// Deterministic hash of the command shape and its keys.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = ahash::AHasher::default();
        self.command().hash(&mut hasher);
        for key in self.keys() {
            key.hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Runs the query against current store state. Reads don't count as
    /// accesses for eviction ranking.
    pub(crate) async fn evaluate(&self, engine: &Engine) -> Result<Option<Value>, ShardError> {
        match self {
            WatchQuery::Get { key } => {
                let resp = engine
                    .route(key, ShardRequest::Peek { key: key.clone() })
                    .await?;
                match resp {
                    ShardResponse::Value(value) => Ok(value),
                    other => {
                        warn!(?other, "unexpected response to watched GET");
                        Ok(None)
                    }
                }
            }
        }
    }
}

/// An updated query result pushed to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchNotification {
    pub fingerprint: u64,
    pub command: &'static str,
    pub result: Option<Value>,
}

/// The keys touched by a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteSet {
    Keys(Vec<String>),
    /// Every key may have changed (FLUSHDB).
    All,
}

#[derive(Debug)]
struct Subscriber {
    session: SessionId,
    tx: mpsc::Sender<WatchNotification>,
    /// `None` until the first result has been handed to the session.
    last_pushed: Option<Option<Value>>,
    /// Newest result that found the queue full and still has to be sent.
    pending: Option<Option<Value>>,
}


#[derive(Debug)]
struct Subscription {
    query: WatchQuery,
    subscribers: Vec<Subscriber>,
}

/// Live subscriptions, indexed by fingerprint and by key.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    subscriptions: DashMap<u64, Subscription>,
    by_key: DashMap<String, AHashSet<u64>>,
    /// Set while some subscriber holds a pending result.
    has_pending: AtomicBool,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `session` for `query`. Returns the fingerprint.
    ///
    /// Watching the same query twice from one session keeps a single
    /// subscription and switches it to the newest queue.
    pub fn subscribe(
        &self,
        session: SessionId,
        query: WatchQuery,
        tx: mpsc::Sender<WatchNotification>,
    ) -> u64 {
        let fingerprint = query.fingerprint();
        let keys = query.keys().to_vec();

        {
            let mut sub = self
                .subscriptions
                .entry(fingerprint)
                .or_insert_with(|| Subscription {
                    query,
                    subscribers: Vec::new(),
                });
            match sub.subscribers.iter_mut().find(|s| s.session == session) {
                Some(existing) => existing.tx = tx,
                None => sub.subscribers.push(Subscriber {
                    session,
                    tx,
                    last_pushed: None,
                    pending: None,
                }),
            }
        }

        for key in keys {
            self.by_key.entry(key).or_default().insert(fingerprint);
        }
        debug!(session, fingerprint, "watch subscribed");
        fingerprint
    }

    /// Records the result returned to the session at subscribe time, unless
    /// a notification already got there first.
    pub fn record_initial(&self, fingerprint: u64, session: SessionId, result: Option<Value>) {
        if let Some(mut sub) = self.subscriptions.get_mut(&fingerprint) {
            if let Some(s) = sub.subscribers.iter_mut().find(|s| s.session == session) {
                s.last_pushed.get_or_insert(result);
            }
        }
    }

    /// Removes one subscription. Returns `true` if it existed.
    pub fn unsubscribe(&self, session: SessionId, fingerprint: u64) -> bool {
        let (removed, now_empty) = match self.subscriptions.get_mut(&fingerprint) {
            Some(mut sub) => {
                let before = sub.subscribers.len();
                sub.subscribers.retain(|s| s.session != session);
                (sub.subscribers.len() < before, sub.subscribers.is_empty())
            }
            None => return false,
        };
        if now_empty {
            self.remove_if_empty(fingerprint);
        }
        if removed {
            debug!(session, fingerprint, "watch unsubscribed");
        }
        removed
    }

    /// Drops every subscription held by `session`. Returns how many.
    pub fn close_session(&self, session: SessionId) -> usize {
        let fingerprints: Vec<u64> = self
            .subscriptions
            .iter()
            .filter(|entry| entry.subscribers.iter().any(|s| s.session == session))
            .map(|entry| *entry.key())
            .collect();

        fingerprints
            .into_iter()
            .filter(|fp| self.unsubscribe(session, *fp))
            .count()
    }

    /// Returns the fingerprints (and their queries) a write-set can affect.
    pub fn affected(&self, writes: &WriteSet) -> Vec<(u64, WatchQuery)> {
        let fingerprints: AHashSet<u64> = match writes {
            WriteSet::All => self.subscriptions.iter().map(|e| *e.key()).collect(),
            WriteSet::Keys(keys) => keys
                .iter()
                .filter_map(|k| self.by_key.get(k).map(|fps| fps.clone()))
                .flatten()
                .collect(),
        };

        fingerprints
            .into_iter()
            .filter_map(|fp| {
                self.subscriptions
                    .get(&fp)
                    .map(|sub| (fp, sub.query.clone()))
            })
            .collect()
    }

    /// Pushes `result` to every subscriber of `fingerprint` whose last
    /// pushed result differs. Returns the number of notifications queued.
    ///
    /// A full queue parks `result` on the subscriber, replacing anything
    /// parked earlier, for [`retry_pending`](Self::retry_pending) to send
    /// later. A closed queue ends the subscription.
    pub fn deliver(&self, fingerprint: u64, result: Option<Value>) -> usize {
        let mut delivered = 0;
        let now_empty = {
            let Some(mut sub) = self.subscriptions.get_mut(&fingerprint) else {
                return 0;
            };
            let command = sub.query.command();
            sub.subscribers.retain_mut(|s| {
                if s.last_pushed.as_ref() == Some(&result) {
                    // the session already holds this result
                    s.pending = None;
                    return true;
                }
                let note = WatchNotification {
                    fingerprint,
                    command,
                    result: result.clone(),
                };
                match s.tx.try_send(note) {
                    Ok(()) => {
                        s.last_pushed = Some(result.clone());
                        s.pending = None;
                        delivered += 1;
                        true
                    }
                    Err(TrySendError::Full(_)) => {
                        debug!(session = s.session, fingerprint, "watch queue full, parking result");
                        s.pending = Some(result.clone());
                        self.has_pending.store(true, Ordering::Release);
                        true
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(session = s.session, fingerprint, "watch session gone");
                        false
                    }
                }
            });
            sub.subscribers.is_empty()
        };

        if now_empty {
            self.remove_if_empty(fingerprint);
        }
        delivered
    }

    /// Returns `true` if some subscriber still has a parked result.
    pub fn has_pending(&self) -> bool {
        self.has_pending.load(Ordering::Acquire)
    }

    /// Tries again to send every parked result. Returns the number of
    /// notifications queued. Results whose queue is still full stay
    /// parked.
    pub fn retry_pending(&self) -> usize {
        if !self.has_pending.swap(false, Ordering::AcqRel) {
            return 0;
        }

        let mut delivered = 0;
        let mut still_pending = false;
        let mut emptied = Vec::new();
        for mut entry in self.subscriptions.iter_mut() {
            let fingerprint = *entry.key();
            let command = entry.query.command();
            entry.subscribers.retain_mut(|s| {
                let Some(result) = s.pending.take() else {
                    return true;
                };
                let note = WatchNotification {
                    fingerprint,
                    command,
                    result: result.clone(),
                };
                match s.tx.try_send(note) {
                    Ok(()) => {
                        s.last_pushed = Some(result);
                        delivered += 1;
                        true
                    }
                    Err(TrySendError::Full(_)) => {
                        s.pending = Some(result);
                        still_pending = true;
                        true
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(session = s.session, fingerprint, "watch session gone");
                        false
                    }
                }
            });
            if entry.subscribers.is_empty() {
                emptied.push(fingerprint);
            }
        }

        // shard locks from iter_mut must be released before removal
        for fingerprint in emptied {
            self.remove_if_empty(fingerprint);
        }
        if still_pending {
            self.has_pending.store(true, Ordering::Release);
        }
        delivered
    }

    /// Number of distinct watched queries.
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Total subscriptions across all queries and sessions.
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions
            .iter()
            .map(|entry| entry.subscribers.len())
            .sum()
    }

    /// Removes a fingerprint and its key index entries once nobody is
    /// subscribed any more.
    fn remove_if_empty(&self, fingerprint: u64) {
        if let Some((_, sub)) = self
            .subscriptions
            .remove_if(&fingerprint, |_, sub| sub.subscribers.is_empty())
        {
            self.unindex(fingerprint, sub.query.keys());
        }
    }

    /// Drops `fingerprint` from the index of each key.
    ///
    /// A concurrent `subscribe` may recreate the fingerprint after it left
    /// `subscriptions`. The index entry is only dropped while holding its
    /// lock and after checking the fingerprint is still gone, so a fresh
    /// subscription keeps its index.
    fn unindex(&self, fingerprint: u64, keys: &[String]) {
        for key in keys {
            if let Some(mut fps) = self.by_key.get_mut(key) {
                if !self.subscriptions.contains_key(&fingerprint) {
                    fps.remove(&fingerprint);
                }
            }
            self.by_key.remove_if(key, |_, fps| fps.is_empty());
        }
    }
}

/// The engine's side of the watch machinery: the shared registry plus the
/// channel into the re-evaluation task.
#[derive(Debug, Clone)]
pub(crate) struct WatchHandle {
    pub(crate) registry: Arc<WatchRegistry>,
    writes: mpsc::UnboundedSender<WriteSet>,
}

impl WatchHandle {
    /// Spawns the re-evaluation task. `reader` must not carry a watch
    /// handle of its own, or the task would keep itself alive.
    pub(crate) fn spawn(reader: Engine, registry: Arc<WatchRegistry>) -> Self {
        let (writes, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_watcher(rx, reader, Arc::clone(&registry)));
        Self { registry, writes }
    }

    /// Hands a write-set to the re-evaluation task without blocking.
    pub(crate) fn notify(&self, writes: WriteSet) {
        if self.registry.is_empty() {
            return;
        }
        // the task only stops once every engine handle is gone
        let _ = self.writes.send(writes);
    }
}

/// Re-evaluates affected queries for each batch of write-sets, and
/// retries parked results on a short interval.
///
/// Write-sets that queue up while a batch is running are folded into the
/// next one, so a hot key is evaluated once per batch rather than once
/// per write.
async fn run_watcher(
    mut rx: mpsc::UnboundedReceiver<WriteSet>,
    reader: Engine,
    registry: Arc<WatchRegistry>,
) {
    let mut retry = tokio::time::interval(RETRY_INTERVAL);
    retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            writes = rx.recv() => {
                let Some(first) = writes else { break };
                let mut batch: AHashMap<u64, WatchQuery> =
                    registry.affected(&first).into_iter().collect();
                while let Ok(more) = rx.try_recv() {
                    batch.extend(registry.affected(&more));
                }
                evaluate_batch(&reader, &registry, batch).await;
            }
            _ = retry.tick() => {
                if registry.has_pending() {
                    let delivered = registry.retry_pending();
                    if delivered > 0 {
                        debug!(delivered, "parked watch results delivered");
                    }
                }
            }
        }
    }
    debug!("watch task stopped");
}

async fn evaluate_batch(
    reader: &Engine,
    registry: &WatchRegistry,
    batch: AHashMap<u64, WatchQuery>,
) {
    for (fingerprint, query) in batch {
        match query.evaluate(reader).await {
            Ok(result) => {
                let delivered = registry.deliver(fingerprint, result);
                if delivered > 0 {
                    debug!(fingerprint, delivered, "watch notifications queued");
                }
            }
            Err(e) => warn!(fingerprint, "watch re-evaluation failed: {e}"),
        }
    }
}
