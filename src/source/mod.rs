//! Capture sources: where ordered, checkpointed change events come from and
//! where acknowledgements go back to.
//!
//! The consumer only talks to the [`RequeueSource`] trait. Two
//! implementations ship with the crate:
//!
//! - [`MemorySource`], fed in-process, for embedding and tests;
//! - [`ReplicationSource`], which decodes a PostgreSQL `pgoutput` logical
//!   replication byte stream supplied by the caller's transport.

pub mod memory;
pub mod pgoutput;
pub mod replication;
mod types;

#[cfg(test)]
mod test_utils;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::mpsc;

use crate::checkpoint::Checkpoint;
use crate::{Error, Result};

pub use memory::{Ack, MemoryFeed, MemorySource};
pub use pgoutput::PgOutputDecoder;
pub use replication::ReplicationSource;
pub use types::{Field, FieldValue, Message, Op, RowChange, SourceChange};

/// Receiving end of a capture session. Closes when the session ends.
pub type ChangeReceiver = mpsc::Receiver<SourceChange>;

/// A change stream that can be acknowledged per event.
///
/// Every event handed out by [`capture`](RequeueSource::capture) must be
/// answered by exactly one of [`commit`](RequeueSource::commit) or
/// [`requeue`](RequeueSource::requeue), in receipt order.
#[async_trait]
pub trait RequeueSource: Send + Sync {
    /// Opens the session. An empty checkpoint resumes from the source's own
    /// persisted progress.
    async fn capture(&self, checkpoint: Checkpoint) -> Result<ChangeReceiver>;

    /// Marks the event at `checkpoint` as applied.
    fn commit(&self, checkpoint: Checkpoint);

    /// Asks for the event at `checkpoint` to be redelivered later.
    fn requeue(&self, checkpoint: Checkpoint, reason: String);

    /// Cancels the session. The change channel closes promptly afterwards.
    /// Idempotent.
    fn stop(&self);

    /// The terminal error of the session, if it ended abnormally.
    fn error(&self) -> Option<Error>;
}

/// Whether a `TableRegex` filter lets `message` through. Messages that are
/// not about a single table always pass.
pub(crate) fn passes_filter(filter: Option<&Regex>, message: &Message) -> bool {
    match (filter, message.table_name()) {
        (Some(filter), Some(table)) => filter.is_match(&table),
        _ => true,
    }
}

/// Locks a mutex, ignoring poisoning. Guarded state here is always left
/// consistent between statements.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
