//! flint-server: everything between a command line and the engine.
//!
//! [`config`] builds the engine from layered settings, [`executor`]
//! runs parsed commands and renders replies, and [`session`] gives each
//! client an identity and a queue for watch notifications.

pub mod config;
pub mod executor;
pub mod session;

pub use config::{ConfigError, FlintConfig};
pub use executor::Executor;
pub use session::Session;
