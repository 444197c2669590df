//! Error types and result handling for pg-notify-relay.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! Only two variants are fatal to a running listener:
//! [`Error::LivenessProbe`] and [`Error::ReconnectExhausted`]. Everything
//! else is absorbed by the dispatch loop and only shows up in the logs.
//!
//! # Example
//!
//! ```rust
//! use pg_notify_relay::{Error, Result};
//!
//! fn check_channel(name: &str) -> Result<()> {
//!     if name.is_empty() {
//!         return Err(Error::Config("channel must not be empty".to_string()));
//!     }
//!     Ok(())
//! }
//!
//! match check_channel("") {
//!     Ok(()) => println!("ok"),
//!     Err(Error::Config(msg)) => eprintln!("Config error: {}", msg),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

/// The main error type for pg-notify-relay operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error, from the config file, environment, or validation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// PostgreSQL client or protocol error.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// JSON serialization error when encoding envelopes.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic connection error not covered by specific types.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A notification payload that is not a complete change envelope.
    #[error("Malformed envelope: {message}")]
    MalformedEnvelope {
        /// Description of what was wrong with the payload
        message: String,
    },

    /// The liveness round-trip on an idle connection failed.
    #[error("Liveness probe failed: {message}")]
    LivenessProbe {
        /// Description of the probe failure
        message: String,
    },

    /// The configured number of consecutive reconnect attempts all failed.
    #[error("Reconnect attempts exhausted after {attempts} consecutive failures")]
    ReconnectExhausted {
        /// Number of consecutive failed attempts
        attempts: u32,
    },

    /// Operation timeout.
    #[error("Timeout error: {message} (after {after:?})")]
    Timeout {
        /// Description of what timed out
        message: String,
        /// How long the operation was allowed to run
        after: Duration,
    },

    /// The session was closed and can no longer be used.
    #[error("Session closed")]
    SessionClosed,
}

impl Error {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedEnvelope {
            message: message.into(),
        }
    }

    /// Returns `true` for errors that end a listener run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::LivenessProbe { .. } | Error::ReconnectExhausted { .. }
        )
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

/// A convenient Result type alias for pg-notify-relay operations.
///
/// This is equivalent to `std::result::Result<T, pg_notify_relay::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
