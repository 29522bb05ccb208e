//! Error types and result handling for pg-capture-consumer.
//!
//! This module defines the main error type [`Error`], the per-column
//! [`DecodeError`] and a convenience [`Result`] type alias used throughout
//! the crate.
//!
//! Only [`Error::Registration`] and [`Error::Source`] ever escape
//! [`Consumer::consume`](crate::Consumer::consume). Decode and handler
//! failures are local to one event and turn into a requeue.
//!
//! # Example
//!
//! ```rust
//! use pg_capture_consumer::{Error, Result};
//!
//! fn open_stream() -> Result<()> {
//!     Err(Error::Source {
//!         message: "connection reset by peer".to_string(),
//!     })
//! }
//!
//! match open_stream() {
//!     Ok(()) => println!("Streaming"),
//!     Err(Error::Source { message }) => eprintln!("Source failed: {}", message),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use thiserror::Error;

/// Boxed error returned by the low-level wire codecs.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The main error type for pg-capture-consumer operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error, typically from a bad file or environment variable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A model could not be turned into a descriptor at startup.
    #[error("Registration error for {table}: {message}")]
    Registration {
        /// Qualified table name of the offending model
        table: String,
        /// What was wrong with it
        message: String,
    },

    /// A column value could not be converted into its model field.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Terminal failure of the capture source.
    #[error("Source error: {message}")]
    Source {
        /// Description of the failure
        message: String,
    },

    /// Invalid or malformed replication message.
    #[error("Invalid message format: {message}")]
    InvalidMessage {
        /// Description of what was invalid
        message: String,
    },

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The session was stopped before the operation could complete.
    #[error("Shutdown requested")]
    Shutdown,
}

impl Error {
    pub(crate) fn invalid_message(message: impl Into<String>) -> Self {
        Error::InvalidMessage {
            message: message.into(),
        }
    }

    pub(crate) fn registration(table: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Registration {
            table: table.into(),
            message: message.into(),
        }
    }
}

impl From<::config::ConfigError> for Error {
    fn from(e: ::config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

/// Failure to decode one column of a row image.
///
/// Carries the table and column so a requeue reason points straight at the
/// offending value.
#[derive(Error, Debug)]
#[error("failed to decode column \"{column}\" of {table}: {source}")]
pub struct DecodeError {
    pub table: String,
    pub column: String,
    #[source]
    pub source: BoxError,
}

/// A convenient Result type alias for pg-capture-consumer operations.
///
/// This is equivalent to `std::result::Result<T, pg_capture_consumer::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
