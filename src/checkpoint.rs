//! Checkpoints: the opaque progress tokens a capture source hands out with
//! every event.
//!
//! A checkpoint must be acknowledged exactly once, by either a commit or a
//! requeue, and acknowledgements must follow receipt order.
//!
//! # Example
//!
//! ```rust
//! use pg_capture_consumer::checkpoint::{format_lsn, parse_lsn, Checkpoint};
//!
//! let checkpoint = Checkpoint::new(0x16_B374_D848);
//! assert_eq!(format_lsn(checkpoint.lsn), "16/B374D848");
//! assert_eq!(parse_lsn("16/B374D848").unwrap(), checkpoint.lsn);
//! ```

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// Represents a position in the change stream.
///
/// The empty checkpoint ([`Checkpoint::default`]) asks a source to resume from
/// its own persisted progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Log sequence number of the event
    pub lsn: u64,
    /// Ordinal of the event within the same LSN
    #[serde(default)]
    pub seq: u32,
    /// Source-specific auxiliary data
    #[serde(default)]
    pub data: Bytes,
    /// When the source server produced the event, if known
    #[serde(default)]
    pub server_time: Option<DateTime<Utc>>,
}

impl Checkpoint {
    /// Creates a checkpoint at the given LSN with no auxiliary data.
    ///
    /// ```rust
    /// use pg_capture_consumer::checkpoint::Checkpoint;
    ///
    /// let checkpoint = Checkpoint::new(42);
    /// assert_eq!(checkpoint.lsn, 42);
    /// assert_eq!(checkpoint.seq, 0);
    /// assert!(checkpoint.data.is_empty());
    /// ```
    pub fn new(lsn: u64) -> Self {
        Self {
            lsn,
            ..Self::default()
        }
    }

    pub fn with_seq(mut self, seq: u32) -> Self {
        self.seq = seq;
        self
    }

    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }

    pub fn with_server_time(mut self, server_time: DateTime<Utc>) -> Self {
        self.server_time = Some(server_time);
        self
    }

    /// Whether this is the empty "resume from source progress" checkpoint.
    pub fn is_empty(&self) -> bool {
        self.lsn == 0 && self.seq == 0 && self.data.is_empty()
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", format_lsn(self.lsn), self.seq)
    }
}

/// Renders an LSN the way PostgreSQL does (`X/X`, upper and lower 32 bits).
pub fn format_lsn(lsn: u64) -> String {
    format!("{:X}/{:X}", lsn >> 32, lsn & 0xFFFFFFFF)
}

/// Parses an LSN in PostgreSQL's `X/X` notation.
pub fn parse_lsn(text: &str) -> Result<u64> {
    let (high, low) = text
        .split_once('/')
        .ok_or_else(|| Error::invalid_message(format!("Invalid LSN: {}", text)))?;

    let high = u32::from_str_radix(high, 16)
        .map_err(|e| Error::invalid_message(format!("Invalid LSN {}: {}", text, e)))?;
    let low = u32::from_str_radix(low, 16)
        .map_err(|e| Error::invalid_message(format!("Invalid LSN {}: {}", text, e)))?;

    Ok(((high as u64) << 32) | low as u64)
}
