//! Reply and request frames.
//!
//! The [`Frame`] enum is the value exchanged with the protocol layer:
//! commands arrive as an array of bulk tokens and every reply goes back
//! as a single frame. Bulk strings use `Bytes` so values move from the
//! keyspace to the caller without copying.

use std::fmt;

use bytes::Bytes;

/// A single request or reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Short status reply, e.g. `OK` or `PONG`.
    Simple(String),

    /// Error reply carrying the client-facing message.
    Error(String),

    /// 64-bit signed integer.
    Integer(i64),

    /// Binary-safe string.
    Bulk(Bytes),

    /// Ordered array of frames.
    Array(Vec<Frame>),

    /// Absence of a value.
    Null,
}

impl Frame {
    /// The `OK` acknowledgement.
    pub fn ok() -> Frame {
        Frame::Simple("OK".into())
    }

    /// Builds an error frame from anything displayable.
    pub fn error(err: impl fmt::Display) -> Frame {
        Frame::Error(err.to_string())
    }
}

/// Splits a command line on whitespace into an array of bulk tokens.
///
/// Returns `None` for a blank line.
pub fn tokenize(line: &str) -> Option<Frame> {
    let tokens: Vec<Frame> = line
        .split_whitespace()
        .map(|t| Frame::Bulk(Bytes::copy_from_slice(t.as_bytes())))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(Frame::Array(tokens))
    }
}

/// Renders frames the way an interactive client shows them.
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "{s}"),
            Frame::Error(msg) => write!(f, "(error) {msg}"),
            Frame::Integer(n) => write!(f, "(integer) {n}"),
            Frame::Bulk(data) => write!(f, "\"{}\"", String::from_utf8_lossy(data)),
            Frame::Null => write!(f, "(nil)"),
            Frame::Array(items) if items.is_empty() => write!(f, "(empty array)"),
            Frame::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) {item}", i + 1)?;
                }
                Ok(())
            }
        }
    }
}
