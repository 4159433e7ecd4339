//! Client sessions.
//!
//! A session is the identity the watch engine attaches subscriptions to,
//! plus the bounded queue its notifications land on. Dropping a session
//! (or calling [`Session::close`]) removes every subscription it holds.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use flint_core::{Engine, SessionId, ShardError, Value, WatchNotification, WatchQuery};
use flint_protocol::Frame;
use tokio::sync::mpsc;
use tracing::debug;

use crate::executor::value_frame;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// One client's view of the engine.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    engine: Engine,
    tx: mpsc::Sender<WatchNotification>,
    rx: mpsc::Receiver<WatchNotification>,
}

impl Session {
    /// Opens a session whose notification queue holds at most
    /// `queue_capacity` pending updates.
    pub fn new(engine: Engine, queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        debug!(session = id, "session opened");
        Self { id, engine, tx, rx }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Subscribes to `query` and returns its fingerprint and current
    /// result.
    pub async fn watch(&self, query: WatchQuery) -> Result<(u64, Option<Value>), ShardError> {
        let (fingerprint, result) = self.engine.watch(self.id, query, self.tx.clone()).await?;
        debug!(session = self.id, fingerprint, "watch registered");
        Ok((fingerprint, result))
    }

    /// Ends one subscription. Returns `false` if this session held no
    /// subscription with that fingerprint.
    pub fn unwatch(&self, fingerprint: u64) -> bool {
        let removed = self.engine.unwatch(self.id, fingerprint);
        if removed {
            debug!(session = self.id, fingerprint, "watch removed");
        }
        removed
    }

    /// Returns the next pending notification without waiting.
    pub fn try_next_notification(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok().map(|n| notification_frame(&n))
    }

    /// Waits for the next notification. Never returns `None` while the
    /// session is open, since it holds a sender of its own.
    pub async fn next_notification(&mut self) -> Option<Frame> {
        self.rx.recv().await.map(|n| notification_frame(&n))
    }

    /// Takes every notification that is already queued.
    pub fn drain_notifications(&mut self) -> Vec<Frame> {
        std::iter::from_fn(|| self.try_next_notification()).collect()
    }

    /// Closes the session and returns how many subscriptions it held.
    pub fn close(self) -> usize {
        // Drop runs right after and finds nothing left to remove
        self.engine.close_session(self.id)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let removed = self.engine.close_session(self.id);
        if removed > 0 {
            debug!(session = self.id, removed, "session closed");
        }
    }
}

/// Renders a notification as `[command, fingerprint, result]`.
pub fn notification_frame(notification: &WatchNotification) -> Frame {
    Frame::Array(vec![
        Frame::Bulk(Bytes::from_static(notification.command.as_bytes())),
        Frame::Simple(notification.fingerprint.to_string()),
        value_frame(notification.result.clone()),
    ])
}
