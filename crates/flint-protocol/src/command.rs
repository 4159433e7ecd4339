//! Command parsing from token frames.
//!
//! Converts a [`Frame`] (expected to be an array of string tokens) into a
//! typed [`Command`]. Option conflicts and malformed values are rejected
//! here, before anything reaches a shard, so a rejected command can never
//! partially apply.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::types::Frame;

/// Smallest EXAT/PXAT instant accepted by the default rule, in unix ms
/// (2001-09-09). Anything smaller is almost certainly a relative TTL or a
/// seconds value passed to PXAT by mistake.
pub const DEFAULT_ABSOLUTE_EXPIRY_FLOOR_MS: u64 = 1_000_000_000_000;

/// How EXAT/PXAT timestamps are validated.
///
/// A timestamp that passes validation but lies in the past is not an
/// error: the write happens and the key is immediately expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsoluteExpiryRule {
    /// Reject instants before the given unix-ms floor.
    Floor(u64),
    /// Reject any instant that has already elapsed.
    FutureOnly,
    /// Accept any non-negative integer.
    AnyNonNegative,
}

impl Default for AbsoluteExpiryRule {
    fn default() -> Self {
        AbsoluteExpiryRule::Floor(DEFAULT_ABSOLUTE_EXPIRY_FLOOR_MS)
    }
}

impl AbsoluteExpiryRule {
    /// Returns `true` if `unix_ms` is an acceptable absolute deadline.
    pub fn accepts(&self, unix_ms: u64) -> bool {
        match *self {
            AbsoluteExpiryRule::Floor(floor) => unix_ms >= floor,
            AbsoluteExpiryRule::FutureOnly => unix_ms > now_ms(),
            AbsoluteExpiryRule::AnyNonNegative => true,
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Expiration option for the SET command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetExpire {
    /// EX seconds: expire after N seconds.
    Ex(u64),
    /// PX milliseconds: expire after N milliseconds.
    Px(u64),
    /// EXAT unix-seconds: expire at an absolute time.
    ExAt(u64),
    /// PXAT unix-milliseconds: expire at an absolute time.
    PxAt(u64),
}

/// Write precondition for the SET command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetCondition {
    /// Only set if the key is absent.
    Nx,
    /// Only set if the key is present.
    Xx,
}

/// A parsed client command, ready for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// PING with an optional message. Returns PONG or echoes the message.
    Ping(Option<Bytes>),

    /// GET <key>. Returns the value or nil.
    Get { key: String },

    /// GET.WATCH <key>. Returns the current value and subscribes to
    /// changes.
    GetWatch { key: String },

    /// UNWATCH <fingerprint>. Ends a subscription.
    Unwatch { fingerprint: u64 },

    /// SET <key> <value> [EX s | PX ms | EXAT ts | PXAT ts_ms] [NX | XX]
    /// [KEEPTTL] [GET].
    Set {
        key: String,
        value: Bytes,
        expire: Option<SetExpire>,
        condition: Option<SetCondition>,
        keep_ttl: bool,
        get: bool,
    },

    /// DEL [key ...]. Returns the number of keys removed.
    Del { keys: Vec<String> },

    /// EXISTS <key> [key ...]. Returns the number of keys that exist.
    Exists { keys: Vec<String> },

    /// INCR <key>.
    Incr { key: String },

    /// DECR <key>.
    Decr { key: String },

    /// INCRBY <key> <delta>.
    IncrBy { key: String, delta: i64 },

    /// DECRBY <key> <delta>.
    DecrBy { key: String, delta: i64 },

    /// TTL <key>. Returns remaining time-to-live in seconds.
    Ttl { key: String },

    /// PTTL <key>. Returns remaining time-to-live in milliseconds.
    Pttl { key: String },

    /// DBSIZE. Returns the number of keys in the database.
    DbSize,

    /// FLUSHDB. Removes every key.
    FlushDb,

    /// A command we don't recognize.
    Unknown(String),
}

impl Command {
    /// Parses a [`Frame`] into a [`Command`] using the default
    /// [`AbsoluteExpiryRule`].
    pub fn from_frame(frame: Frame) -> Result<Command, ProtocolError> {
        Self::from_frame_with(frame, AbsoluteExpiryRule::default())
    }

    /// Parses a [`Frame`] into a [`Command`].
    ///
    /// Expects an array frame where the first element is the command name
    /// and the rest are arguments.
    pub fn from_frame_with(
        frame: Frame,
        rule: AbsoluteExpiryRule,
    ) -> Result<Command, ProtocolError> {
        let frames = match frame {
            Frame::Array(frames) => frames,
            _ => {
                return Err(ProtocolError::InvalidCommandFrame(
                    "expected array frame".into(),
                ));
            }
        };

        let Some((head, args)) = frames.split_first() else {
            return Err(ProtocolError::InvalidCommandFrame(
                "empty command array".into(),
            ));
        };

        let name = extract_string(head)?;
        let name_upper = name.to_ascii_uppercase();

        match name_upper.as_str() {
            "PING" => parse_ping(args),
            "GET" => parse_single_key(args, "GET").map(|key| Command::Get { key }),
            "GET.WATCH" => {
                parse_single_key(args, "GET.WATCH").map(|key| Command::GetWatch { key })
            }
            "UNWATCH" => parse_unwatch(args),
            "SET" => parse_set(args, rule),
            "DEL" => parse_del(args),
            "EXISTS" => parse_exists(args),
            "INCR" => parse_single_key(args, "INCR").map(|key| Command::Incr { key }),
            "DECR" => parse_single_key(args, "DECR").map(|key| Command::Decr { key }),
            "INCRBY" => {
                parse_key_and_delta(args, "INCRBY").map(|(key, delta)| Command::IncrBy { key, delta })
            }
            "DECRBY" => {
                parse_key_and_delta(args, "DECRBY").map(|(key, delta)| Command::DecrBy { key, delta })
            }
            "TTL" => parse_single_key(args, "TTL").map(|key| Command::Ttl { key }),
            "PTTL" => parse_single_key(args, "PTTL").map(|key| Command::Pttl { key }),
            "DBSIZE" => parse_no_args(args, "DBSIZE", Command::DbSize),
            "FLUSHDB" => parse_no_args(args, "FLUSHDB", Command::FlushDb),
            _ => Ok(Command::Unknown(name)),
        }
    }

    /// Returns the command name as clients spell it.
    pub fn name(&self) -> &str {
        match self {
            Command::Ping(_) => "PING",
            Command::Get { .. } => "GET",
            Command::GetWatch { .. } => "GET.WATCH",
            Command::Unwatch { .. } => "UNWATCH",
            Command::Set { .. } => "SET",
            Command::Del { .. } => "DEL",
            Command::Exists { .. } => "EXISTS",
            Command::Incr { .. } => "INCR",
            Command::Decr { .. } => "DECR",
            Command::IncrBy { .. } => "INCRBY",
            Command::DecrBy { .. } => "DECRBY",
            Command::Ttl { .. } => "TTL",
            Command::Pttl { .. } => "PTTL",
            Command::DbSize => "DBSIZE",
            Command::FlushDb => "FLUSHDB",
            Command::Unknown(name) => name,
        }
    }
}

/// Extracts a UTF-8 string from a Bulk or Simple frame.
fn extract_string(frame: &Frame) -> Result<String, ProtocolError> {
    match frame {
        Frame::Bulk(data) => String::from_utf8(data.to_vec()).map_err(|_| {
            ProtocolError::InvalidCommandFrame("argument is not valid utf-8".into())
        }),
        Frame::Simple(s) => Ok(s.clone()),
        _ => Err(ProtocolError::InvalidCommandFrame(
            "expected bulk or simple string argument".into(),
        )),
    }
}

/// Extracts raw bytes from a Bulk or Simple frame.
fn extract_bytes(frame: &Frame) -> Result<Bytes, ProtocolError> {
    match frame {
        Frame::Bulk(data) => Ok(data.clone()),
        Frame::Simple(s) => Ok(Bytes::from(s.clone().into_bytes())),
        _ => Err(ProtocolError::InvalidCommandFrame(
            "expected bulk or simple string argument".into(),
        )),
    }
}

fn extract_keys(args: &[Frame]) -> Result<Vec<String>, ProtocolError> {
    args.iter().map(extract_string).collect()
}

fn parse_i64(frame: &Frame) -> Result<i64, ProtocolError> {
    extract_string(frame)?
        .parse::<i64>()
        .map_err(|_| ProtocolError::NotAnInteger)
}

fn parse_ping(args: &[Frame]) -> Result<Command, ProtocolError> {
    match args {
        [] => Ok(Command::Ping(None)),
        [msg] => Ok(Command::Ping(Some(extract_bytes(msg)?))),
        _ => Err(ProtocolError::WrongArity("PING".into())),
    }
}

fn parse_single_key(args: &[Frame], cmd: &str) -> Result<String, ProtocolError> {
    match args {
        [key] => extract_string(key),
        _ => Err(ProtocolError::WrongArity(cmd.into())),
    }
}

fn parse_key_and_delta(args: &[Frame], cmd: &str) -> Result<(String, i64), ProtocolError> {
    match args {
        [key, delta] => Ok((extract_string(key)?, parse_i64(delta)?)),
        _ => Err(ProtocolError::WrongArity(cmd.into())),
    }
}

fn parse_no_args(args: &[Frame], cmd: &str, command: Command) -> Result<Command, ProtocolError> {
    if !args.is_empty() {
        return Err(ProtocolError::WrongArity(cmd.into()));
    }
    Ok(command)
}

fn parse_unwatch(args: &[Frame]) -> Result<Command, ProtocolError> {
    let [raw] = args else {
        return Err(ProtocolError::WrongArity("UNWATCH".into()));
    };
    let fingerprint = extract_string(raw)?
        .parse::<u64>()
        .map_err(|_| ProtocolError::invalid_parameter("UNWATCH", "FINGERPRINT"))?;
    Ok(Command::Unwatch { fingerprint })
}

/// DEL with no keys is valid and deletes nothing.
fn parse_del(args: &[Frame]) -> Result<Command, ProtocolError> {
    Ok(Command::Del {
        keys: extract_keys(args)?,
    })
}

fn parse_exists(args: &[Frame]) -> Result<Command, ProtocolError> {
    if args.is_empty() {
        return Err(ProtocolError::WrongArity("EXISTS".into()));
    }
    Ok(Command::Exists {
        keys: extract_keys(args)?,
    })
}

/// Parses SET in two passes: the shape of the option list first, then
/// the expiry value. A conflicting combination is a syntax error even
/// when the value would also fail validation.
fn parse_set(args: &[Frame], rule: AbsoluteExpiryRule) -> Result<Command, ProtocolError> {
    let [key, value, options @ ..] = args else {
        return Err(ProtocolError::WrongArity("SET".into()));
    };
    let key = extract_string(key)?;
    let value = extract_bytes(value)?;

    let syntax = || ProtocolError::Syntax("SET".into());

    let mut expire: Option<(&'static str, String)> = None;
    let mut condition = None;
    let mut keep_ttl = false;
    let mut get = false;

    let mut idx = 0;
    while idx < options.len() {
        let flag = extract_string(&options[idx])?.to_ascii_uppercase();
        idx += 1;
        match flag.as_str() {
            "EX" | "PX" | "EXAT" | "PXAT" => {
                if expire.is_some() || keep_ttl {
                    return Err(syntax());
                }
                let raw = options.get(idx).ok_or_else(syntax)?;
                idx += 1;
                let option = match flag.as_str() {
                    "EX" => "EX",
                    "PX" => "PX",
                    "EXAT" => "EXAT",
                    _ => "PXAT",
                };
                expire = Some((option, extract_string(raw)?));
            }
            "NX" | "XX" => {
                if condition.is_some() {
                    return Err(syntax());
                }
                condition = Some(if flag == "NX" {
                    SetCondition::Nx
                } else {
                    SetCondition::Xx
                });
            }
            "KEEPTTL" => {
                if expire.is_some() || keep_ttl {
                    return Err(syntax());
                }
                keep_ttl = true;
            }
            "GET" => {
                if get {
                    return Err(syntax());
                }
                get = true;
            }
            _ => return Err(syntax()),
        }
    }

    let expire = match expire {
        Some((option, raw)) => Some(parse_set_expire(option, &raw, rule)?),
        None => None,
    };

    Ok(Command::Set {
        key,
        value,
        expire,
        condition,
        keep_ttl,
        get,
    })
}

/// Validates an expiry value. Relative TTLs must be positive; absolute
/// timestamps are checked against `rule`. Every failure names the option.
fn parse_set_expire(
    option: &'static str,
    raw: &str,
    rule: AbsoluteExpiryRule,
) -> Result<SetExpire, ProtocolError> {
    let invalid = || ProtocolError::invalid_parameter("SET", option);
    let n = raw.parse::<u64>().map_err(|_| invalid())?;

    match option {
        "EX" => {
            // the ms form must fit too
            if n == 0 || n.checked_mul(1000).is_none() {
                return Err(invalid());
            }
            Ok(SetExpire::Ex(n))
        }
        "PX" => {
            if n == 0 {
                return Err(invalid());
            }
            Ok(SetExpire::Px(n))
        }
        "EXAT" => {
            let ms = n.checked_mul(1000).ok_or_else(invalid)?;
            if !rule.accepts(ms) {
                return Err(invalid());
            }
            Ok(SetExpire::ExAt(n))
        }
        _ => {
            if !rule.accepts(n) {
                return Err(invalid());
            }
            Ok(SetExpire::PxAt(n))
        }
    }
}
