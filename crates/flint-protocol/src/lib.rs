//! flint-protocol: the command surface.
//!
//! Turns whitespace-tokenized requests into typed [`Command`]s and
//! defines the [`Frame`] values handed back to the caller. There is no
//! wire codec here; the transport is someone else's concern.
//!
//! # quick start
//!
//! ```
//! use flint_protocol::{tokenize, Command};
//!
//! let frame = tokenize("SET greeting hello EX 10").unwrap();
//! let cmd = Command::from_frame(frame).unwrap();
//! assert_eq!(cmd.name(), "SET");
//! ```

pub mod command;
pub mod error;
pub mod types;

pub use command::{
    AbsoluteExpiryRule, Command, SetCondition, SetExpire, DEFAULT_ABSOLUTE_EXPIRY_FLOOR_MS,
};
pub use error::ProtocolError;
pub use types::{tokenize, Frame};
