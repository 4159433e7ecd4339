//! Protocol error types for command parsing.

use thiserror::Error;

/// Errors that can occur when turning tokens into a [`Command`].
///
/// The `Display` output is the exact message handed back to the client.
///
/// [`Command`]: crate::Command
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The command frame wasn't an array of string tokens.
    #[error("invalid command: {0}")]
    InvalidCommandFrame(String),

    /// Too few or too many arguments for the named command.
    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(String),

    /// A malformed or conflicting combination of options.
    #[error("invalid syntax for '{0}' command")]
    Syntax(String),

    /// A recognized option whose value failed validation.
    #[error("invalid value for a parameter in '{command}' command for {option} parameter")]
    InvalidParameter { command: String, option: String },

    /// A numeric argument that isn't a valid i64.
    #[error("value is not an integer or out of range")]
    NotAnInteger,
}

impl ProtocolError {
    pub(crate) fn invalid_parameter(command: &str, option: &str) -> Self {
        ProtocolError::InvalidParameter {
            command: command.into(),
            option: option.into(),
        }
    }
}
