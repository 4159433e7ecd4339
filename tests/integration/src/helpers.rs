//! Test helpers for running a flint engine in-process and sending
//! commands through the executor.

use std::time::Duration;

use bytes::Bytes;
use flint_protocol::Frame;
use flint_server::{Executor, FlintConfig, Session};

/// An engine plus executor, built from a `FlintConfig` the same way the
/// binary builds one.
pub struct TestServer {
    executor: Executor,
}

/// Options for starting a test server.
pub struct ServerOptions {
    pub shards: usize,
    pub maxkeys: Option<usize>,
    pub maxmemory: Option<String>,
    pub policy: &'static str,
    pub expiry_tick_ms: u64,
    pub watch_queue_capacity: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            shards: 2,
            maxkeys: None,
            maxmemory: None,
            policy: "noeviction",
            expiry_tick_ms: 100,
            watch_queue_capacity: 64,
        }
    }
}

impl TestServer {
    /// Starts a two-shard engine with no limits.
    pub fn start() -> Self {
        Self::start_with(ServerOptions::default())
    }

    /// Starts an engine with custom options.
    pub fn start_with(opts: ServerOptions) -> Self {
        let cfg = FlintConfig {
            shards: opts.shards,
            maxkeys: opts.maxkeys,
            maxmemory: opts.maxmemory,
            maxmemory_policy: opts.policy.into(),
            expiry_tick_ms: opts.expiry_tick_ms,
            watch_queue_capacity: opts.watch_queue_capacity,
            ..FlintConfig::default()
        };
        let engine_config = cfg.engine_config().expect("invalid test config");
        let rule = cfg.absolute_expiry_rule().expect("invalid expiry rule");
        let engine = flint_core::Engine::with_config(cfg.resolved_shard_count(), engine_config);
        let executor = Executor::new(engine)
            .with_expiry_rule(rule)
            .with_watch_queue_capacity(cfg.watch_queue_capacity);
        Self { executor }
    }

    /// Opens a client session against this server.
    pub fn connect(&self) -> TestClient {
        TestClient {
            executor: self.executor.clone(),
            session: self.executor.session(),
        }
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }
}

/// A client session with assertion helpers.
pub struct TestClient {
    executor: Executor,
    session: Session,
}

impl TestClient {
    /// Sends a command and returns the reply frame.
    pub async fn cmd(&mut self, args: &[&str]) -> Frame {
        let parts: Vec<Frame> = args
            .iter()
            .map(|a| Frame::Bulk(Bytes::copy_from_slice(a.as_bytes())))
            .collect();
        self.executor
            .execute_frame(&self.session, Frame::Array(parts))
            .await
    }

    /// Sends a whitespace-separated command line.
    pub async fn line(&mut self, line: &str) -> Frame {
        self.executor
            .execute_line(&self.session, line)
            .await
            .expect("blank command line")
    }

    /// Sends a command and extracts the bulk string value.
    pub async fn get_bulk(&mut self, args: &[&str]) -> Option<String> {
        match self.cmd(args).await {
            Frame::Bulk(data) => Some(String::from_utf8_lossy(&data).to_string()),
            Frame::Null => None,
            other => panic!("expected Bulk or Null, got {other:?}"),
        }
    }

    /// Sends a command and extracts the integer value.
    pub async fn get_int(&mut self, args: &[&str]) -> i64 {
        match self.cmd(args).await {
            Frame::Integer(n) => n,
            other => panic!("expected Integer, got {other:?}"),
        }
    }

    /// Sends a command and expects a Simple "OK" response.
    pub async fn ok(&mut self, args: &[&str]) {
        match self.cmd(args).await {
            Frame::Simple(s) if s == "OK" => {}
            other => panic!("expected OK, got {other:?}"),
        }
    }

    /// Sends a command and expects a Null response.
    pub async fn null(&mut self, args: &[&str]) {
        match self.cmd(args).await {
            Frame::Null => {}
            other => panic!("expected Null, got {other:?}"),
        }
    }

    /// Sends a command and expects an error response. Returns the error message.
    pub async fn err(&mut self, args: &[&str]) -> String {
        match self.cmd(args).await {
            Frame::Error(msg) => msg,
            other => panic!("expected Error, got {other:?}"),
        }
    }

    /// Runs GET.WATCH and returns the fingerprint and the initial result.
    pub async fn watch(&mut self, key: &str) -> (String, Frame) {
        match self.cmd(&["GET.WATCH", key]).await {
            Frame::Array(mut parts) if parts.len() == 2 => {
                let result = parts.pop().expect("two parts");
                match parts.pop() {
                    Some(Frame::Simple(fingerprint)) => (fingerprint, result),
                    other => panic!("expected fingerprint, got {other:?}"),
                }
            }
            other => panic!("expected watch reply, got {other:?}"),
        }
    }

    /// Waits up to two seconds for the next watch notification.
    pub async fn read_notification(&mut self) -> Frame {
        tokio::time::timeout(Duration::from_secs(2), self.session.next_notification())
            .await
            .expect("timed out waiting for notification")
            .expect("notification queue closed")
    }

    /// Returns every notification already queued, after giving the
    /// watch task a moment to catch up.
    pub async fn pending_notifications(&mut self) -> Vec<Frame> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.session.drain_notifications()
    }
}
