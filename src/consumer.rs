//! The consumption loop.
//!
//! [`Consumer::consume`] pulls events from a [`RequeueSource`] one at a
//! time, routes row changes to the handler registered for their table and
//! acknowledges every event exactly once, in receipt order.
//!
//! # Example
//!
//! ```rust,no_run
//! use pg_capture_consumer::config::CaptureInit;
//! use pg_capture_consumer::model::{field, FieldSpec, TableName};
//! use pg_capture_consumer::source::MemorySource;
//! use pg_capture_consumer::{Change, Consumer, Model, ModelHandlers};
//!
//! #[derive(Debug, Default)]
//! struct User {
//!     id: i32,
//!     name: String,
//! }
//!
//! impl Model for User {
//!     fn table_name() -> TableName {
//!         TableName::new("public", "users")
//!     }
//!
//!     fn fields() -> Vec<FieldSpec<Self>> {
//!         vec![
//!             field("id", |u: &mut User| &mut u.id),
//!             field("name", |u: &mut User| &mut u.name),
//!         ]
//!     }
//! }
//!
//! # async fn example() -> pg_capture_consumer::Result<()> {
//! let (source, _feed) = MemorySource::new(CaptureInit::new("memory://"))?;
//! let consumer = Consumer::new(source);
//!
//! let handlers = ModelHandlers::new().register(|change: Change<User>| async move {
//!     println!("{:?} {:?}", change.op, change.new);
//!     anyhow::Ok(())
//! });
//!
//! consumer.consume(handlers).await?;
//! # Ok(())
//! # }
//! ```

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::checkpoint::Checkpoint;
use crate::model::{ModelHandlers, Registry};
use crate::source::{Message, RequeueSource, SourceChange};
use crate::Result;

/// Lifecycle of a [`Consumer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Streaming,
    /// The source closed its channel; the terminal error is being checked.
    Draining,
    /// The session ended with an error. Held after `consume` returns it.
    Failed,
    /// The session ended cleanly.
    Stopped,
}

pub struct Consumer<S> {
    source: S,
    state: watch::Sender<ConsumerState>,
}

impl<S: RequeueSource> Consumer<S> {
    pub fn new(source: S) -> Self {
        let (state, _) = watch::channel(ConsumerState::Idle);
        Self { source, state }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Observes lifecycle transitions. A finished session rests in
    /// [`ConsumerState::Stopped`] or, when `consume` returned an error, in
    /// [`ConsumerState::Failed`].
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Asks the source to end the session. `consume` returns once the
    /// source's channel closes. Safe to call more than once.
    pub fn stop(&self) {
        info!("Stopping consumer");
        self.source.stop();
    }

    /// Runs one consumption session until the source closes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Registration`](crate::Error::Registration) when a
    /// model cannot be registered, and the source's terminal error when the
    /// stream ends abnormally. Decode and handler failures only requeue the
    /// affected event.
    pub async fn consume(&self, handlers: ModelHandlers) -> Result<()> {
        let registry = match Registry::build(handlers) {
            Ok(registry) => registry,
            Err(e) => return self.fail(e),
        };
        info!(models = registry.len(), "Model registry built");

        let mut changes = match self.source.capture(Checkpoint::default()).await {
            Ok(changes) => changes,
            Err(e) => return self.fail(e),
        };

        self.state.send_replace(ConsumerState::Streaming);
        info!("Consuming changes");

        while let Some(change) = changes.recv().await {
            self.apply(&registry, change).await;
        }

        self.state.send_replace(ConsumerState::Draining);
        if let Some(e) = self.source.error() {
            return self.fail(e);
        }

        self.state.send_replace(ConsumerState::Stopped);
        info!("Consumer stopped");
        Ok(())
    }

    async fn apply(&self, registry: &Registry, change: SourceChange) {
        let SourceChange {
            checkpoint,
            message,
        } = change;

        let row = match message {
            Message::Change(row) => row,
            other => {
                debug!(checkpoint = %checkpoint, message = ?other, "Committing non-row message");
                self.source.commit(checkpoint);
                return;
            }
        };

        let Some(route) = registry.resolve(&row.schema, &row.table) else {
            debug!(
                checkpoint = %checkpoint,
                table = %row.qualified_name(),
                "No model registered, committing"
            );
            self.source.commit(checkpoint);
            return;
        };

        match route.dispatch(&row, &checkpoint).await {
            Ok(()) => {
                debug!(checkpoint = %checkpoint, table = route.table(), op = ?row.op, "Applied change");
                self.source.commit(checkpoint);
            }
            Err(e) => {
                let reason = e.reason();
                warn!(
                    checkpoint = %checkpoint,
                    table = route.table(),
                    reason = %reason,
                    "Requeueing change"
                );
                self.source.requeue(checkpoint, reason);
            }
        }
    }

    fn fail(&self, e: crate::Error) -> Result<()> {
        error!(error = %e, "Consumer failed");
        self.state.send_replace(ConsumerState::Failed);
        Err(e)
    }
}
