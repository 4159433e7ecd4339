//! Command execution.
//!
//! Turns a parsed [`Command`] into shard requests, sends them through the
//! engine, and folds the shard responses back into a single reply
//! [`Frame`]. Every failure is returned to the caller as an error frame.

use std::time::Duration;

use flint_core::{
    Engine, IncrError, SetCondition, SetExpire, SetOptions, ShardError, ShardRequest,
    ShardResponse, TtlResult, Value, WatchQuery, WriteError,
};
use flint_protocol::command::{SetCondition as ConditionArg, SetExpire as ExpireArg};
use flint_protocol::{tokenize, AbsoluteExpiryRule, Command, Frame};

use crate::session::Session;

/// Executes commands against one engine.
///
/// Cheap to clone; every clone shares the same shards.
#[derive(Debug, Clone)]
pub struct Executor {
    engine: Engine,
    expiry_rule: AbsoluteExpiryRule,
    watch_queue_capacity: usize,
}

impl Executor {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            expiry_rule: AbsoluteExpiryRule::default(),
            watch_queue_capacity: 64,
        }
    }

    /// Sets how SET validates EXAT/PXAT timestamps.
    pub fn with_expiry_rule(mut self, rule: AbsoluteExpiryRule) -> Self {
        self.expiry_rule = rule;
        self
    }

    /// Sets the notification queue size of sessions opened afterwards.
    pub fn with_watch_queue_capacity(mut self, capacity: usize) -> Self {
        self.watch_queue_capacity = capacity;
        self
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Opens a new session on this executor's engine.
    pub fn session(&self) -> Session {
        Session::new(self.engine.clone(), self.watch_queue_capacity)
    }

    /// Tokenizes and runs one command line. Returns `None` for a blank
    /// line.
    pub async fn execute_line(&self, session: &Session, line: &str) -> Option<Frame> {
        let frame = tokenize(line)?;
        Some(self.execute_frame(session, frame).await)
    }

    /// Parses and runs a command frame.
    pub async fn execute_frame(&self, session: &Session, frame: Frame) -> Frame {
        match Command::from_frame_with(frame, self.expiry_rule) {
            Ok(cmd) => self.execute(session, cmd).await,
            Err(e) => Frame::error(e),
        }
    }

    /// Runs a parsed command.
    pub async fn execute(&self, session: &Session, cmd: Command) -> Frame {
        let engine = &self.engine;
        match cmd {
            Command::Ping(None) => Frame::Simple("PONG".into()),
            Command::Ping(Some(msg)) => Frame::Bulk(msg),

            Command::Get { key } => {
                let req = ShardRequest::Get { key: key.clone() };
                match engine.route(&key, req).await {
                    Ok(ShardResponse::Value(value)) => value_frame(value),
                    other => unexpected(other),
                }
            }

            Command::GetWatch { key } => {
                match session.watch(WatchQuery::Get { key }).await {
                    Ok((fingerprint, result)) => Frame::Array(vec![
                        Frame::Simple(fingerprint.to_string()),
                        value_frame(result),
                    ]),
                    Err(e) => Frame::error(e),
                }
            }

            Command::Unwatch { fingerprint } => {
                Frame::Integer(i64::from(session.unwatch(fingerprint)))
            }

            Command::Set {
                key,
                value,
                expire,
                condition,
                keep_ttl,
                get,
            } => {
                let options = SetOptions {
                    expire: expire.map(set_expire),
                    keep_ttl,
                    condition: condition.map(|c| match c {
                        ConditionArg::Nx => SetCondition::IfAbsent,
                        ConditionArg::Xx => SetCondition::IfPresent,
                    }),
                    get,
                };
                let req = ShardRequest::Set {
                    key: key.clone(),
                    value,
                    options,
                };
                match engine.route(&key, req).await {
                    Ok(ShardResponse::Set(outcome)) if get => value_frame(outcome.previous),
                    Ok(ShardResponse::Set(outcome)) if outcome.written => Frame::ok(),
                    Ok(ShardResponse::Set(_)) => Frame::Null,
                    Ok(ShardResponse::OutOfMemory) => oom_error(),
                    other => unexpected(other),
                }
            }

            Command::Del { keys } => {
                match engine
                    .route_grouped(&keys, |keys| ShardRequest::Del { keys })
                    .await
                {
                    Ok(responses) => Frame::Integer(sum(&responses, |r| match r {
                        ShardResponse::Removed(keys) => Some(keys.len()),
                        _ => None,
                    })),
                    Err(e) => Frame::error(e),
                }
            }

            Command::Exists { keys } => {
                match engine
                    .route_grouped(&keys, |keys| ShardRequest::Exists { keys })
                    .await
                {
                    Ok(responses) => Frame::Integer(sum(&responses, count)),
                    Err(e) => Frame::error(e),
                }
            }

            Command::Incr { key } => self.incr_by(key, 1).await,
            Command::Decr { key } => self.incr_by(key, -1).await,
            Command::IncrBy { key, delta } => self.incr_by(key, delta).await,
            Command::DecrBy { key, delta } => match delta.checked_neg() {
                Some(delta) => self.incr_by(key, delta).await,
                None => Frame::error(IncrError::Overflow),
            },

            Command::Ttl { key } => {
                let req = ShardRequest::Ttl { key: key.clone() };
                ttl_frame(engine.route(&key, req).await)
            }
            Command::Pttl { key } => {
                let req = ShardRequest::Pttl { key: key.clone() };
                ttl_frame(engine.route(&key, req).await)
            }

            Command::DbSize => match engine.broadcast(|| ShardRequest::DbSize).await {
                Ok(responses) => Frame::Integer(sum(&responses, count)),
                Err(e) => Frame::error(e),
            },

            Command::FlushDb => match engine.broadcast(|| ShardRequest::FlushDb).await {
                Ok(_) => Frame::ok(),
                Err(e) => Frame::error(e),
            },

            Command::Unknown(name) => Frame::Error(format!("unknown command '{name}'")),
        }
    }

    async fn incr_by(&self, key: String, delta: i64) -> Frame {
        let req = ShardRequest::IncrBy {
            key: key.clone(),
            delta,
        };
        match self.engine.route(&key, req).await {
            Ok(ShardResponse::Integer(n)) => Frame::Integer(n),
            Ok(ShardResponse::OutOfMemory) => oom_error(),
            other => unexpected(other),
        }
    }
}

/// Renders a stored value. Integer-encoded values come back as integers.
pub fn value_frame(value: Option<Value>) -> Frame {
    match value {
        Some(Value::Integer(n)) => Frame::Integer(n),
        Some(Value::String(data)) => Frame::Bulk(data),
        None => Frame::Null,
    }
}

fn set_expire(expire: ExpireArg) -> SetExpire {
    match expire {
        ExpireArg::Ex(secs) => SetExpire::After(Duration::from_secs(secs)),
        ExpireArg::Px(millis) => SetExpire::After(Duration::from_millis(millis)),
        ExpireArg::ExAt(secs) => SetExpire::At(secs.saturating_mul(1000)),
        ExpireArg::PxAt(millis) => SetExpire::At(millis),
    }
}

fn ttl_frame(resp: Result<ShardResponse, ShardError>) -> Frame {
    match resp {
        Ok(ShardResponse::Ttl(TtlResult::Seconds(s))) => Frame::Integer(s as i64),
        Ok(ShardResponse::Ttl(TtlResult::Milliseconds(ms))) => Frame::Integer(ms as i64),
        Ok(ShardResponse::Ttl(TtlResult::NoExpiry)) => Frame::Integer(-1),
        Ok(ShardResponse::Ttl(TtlResult::NotFound)) => Frame::Integer(-2),
        other => unexpected(other),
    }
}

fn count(resp: &ShardResponse) -> Option<usize> {
    match resp {
        ShardResponse::Count(n) => Some(*n),
        _ => None,
    }
}

fn sum(responses: &[ShardResponse], f: impl Fn(&ShardResponse) -> Option<usize>) -> i64 {
    responses.iter().filter_map(f).sum::<usize>() as i64
}

/// Maps an engine failure, a shard-level error message, or a response
/// the caller didn't expect to an error frame.
fn unexpected(resp: Result<ShardResponse, ShardError>) -> Frame {
    match resp {
        Ok(ShardResponse::Err(msg)) => Frame::Error(msg),
        Ok(other) => Frame::Error(format!("unexpected shard response: {other:?}")),
        Err(e) => Frame::error(e),
    }
}

fn oom_error() -> Frame {
    Frame::error(WriteError::OutOfMemory)
}
