//! In-process capture source.
//!
//! Events are pushed through a [`MemoryFeed`]; every acknowledgement the
//! consumer issues is recorded and can be inspected with
//! [`MemorySource::acks`].
//!
//! # Example
//!
//! ```rust,no_run
//! use pg_capture_consumer::config::CaptureInit;
//! use pg_capture_consumer::source::{Field, MemorySource, RowChange};
//!
//! # async fn example() -> pg_capture_consumer::Result<()> {
//! let (source, mut feed) = MemorySource::new(CaptureInit::new("memory://"))?;
//! feed.push(RowChange::insert("public", "users", vec![Field::text("id", "1")]))
//!     .await?;
//! feed.close();
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{lock, passes_filter, ChangeReceiver, Message, RequeueSource, SourceChange};
use crate::checkpoint::Checkpoint;
use crate::config::{CaptureInit, ConsumerConfig};
use crate::{Error, Result};

const DEFAULT_CAPACITY: usize = 1000;

/// An acknowledgement recorded by [`MemorySource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    Commit(Checkpoint),
    Requeue {
        checkpoint: Checkpoint,
        reason: String,
    },
}

impl Ack {
    pub fn checkpoint(&self) -> &Checkpoint {
        match self {
            Ack::Commit(checkpoint) => checkpoint,
            Ack::Requeue { checkpoint, .. } => checkpoint,
        }
    }
}

struct Shared {
    init: CaptureInit,
    filter: Option<Regex>,
    capacity: usize,
    token: CancellationToken,
    input: Mutex<Option<mpsc::Receiver<SourceChange>>>,
    error: Mutex<Option<Error>>,
    acks: Mutex<Vec<Ack>>,
    ack_count: watch::Sender<usize>,
}

impl Shared {
    fn record(&self, ack: Ack) {
        let mut acks = lock(&self.acks);
        acks.push(ack);
        self.ack_count.send_replace(acks.len());
    }
}

/// Capture source fed from the same process.
#[derive(Clone)]
pub struct MemorySource {
    shared: Arc<Shared>,
}

/// Producer side of a [`MemorySource`].
///
/// Dropping the feed (or calling [`close`](MemoryFeed::close)) ends the
/// stream normally; [`fail`](MemoryFeed::fail) ends it with a source error.
pub struct MemoryFeed {
    tx: mpsc::Sender<SourceChange>,
    next_lsn: u64,
    shared: Arc<Shared>,
}

impl MemorySource {
    pub fn new(init: CaptureInit) -> Result<(Self, MemoryFeed)> {
        Self::with_capacity(init, DEFAULT_CAPACITY)
    }

    pub fn from_config(config: &ConsumerConfig) -> Result<(Self, MemoryFeed)> {
        Self::with_capacity(config.capture_init()?, config.channel_capacity)
    }

    pub fn with_capacity(init: CaptureInit, capacity: usize) -> Result<(Self, MemoryFeed)> {
        if capacity == 0 {
            return Err(Error::Config(
                "channel capacity must be greater than zero".to_string(),
            ));
        }

        let filter = init.table_filter()?;
        let (tx, rx) = mpsc::channel(capacity);
        let (ack_count, _) = watch::channel(0);

        let shared = Arc::new(Shared {
            init,
            filter,
            capacity,
            token: CancellationToken::new(),
            input: Mutex::new(Some(rx)),
            error: Mutex::new(None),
            acks: Mutex::new(Vec::new()),
            ack_count,
        });

        let feed = MemoryFeed {
            tx,
            next_lsn: 1,
            shared: shared.clone(),
        };

        Ok((Self { shared }, feed))
    }

    pub fn init(&self) -> &CaptureInit {
        &self.shared.init
    }

    /// Every acknowledgement received so far, in order.
    pub fn acks(&self) -> Vec<Ack> {
        lock(&self.shared.acks).clone()
    }

    /// Waits until at least `count` acknowledgements have been recorded.
    pub async fn wait_for_acks(&self, count: usize) {
        let mut rx = self.shared.ack_count.subscribe();
        let _ = rx.wait_for(|acked| *acked >= count).await;
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.token.is_cancelled()
    }
}

#[async_trait]
impl RequeueSource for MemorySource {
    async fn capture(&self, checkpoint: Checkpoint) -> Result<ChangeReceiver> {
        let input = lock(&self.shared.input)
            .take()
            .ok_or_else(|| Error::Source {
                message: "capture session already started".to_string(),
            })?;

        debug!(
            uri = %self.shared.init.uri,
            resume_from = %checkpoint,
            "Starting memory capture session"
        );

        let (output, changes) = mpsc::channel(self.shared.capacity);
        tokio::spawn(pump(input, output, self.shared.clone(), checkpoint.lsn));
        Ok(changes)
    }

    fn commit(&self, checkpoint: Checkpoint) {
        trace!(checkpoint = %checkpoint, "Commit");
        self.shared.record(Ack::Commit(checkpoint));
    }

    fn requeue(&self, checkpoint: Checkpoint, reason: String) {
        trace!(checkpoint = %checkpoint, reason = %reason, "Requeue");
        self.shared.record(Ack::Requeue { checkpoint, reason });
    }

    fn stop(&self) {
        if !self.shared.token.is_cancelled() {
            debug!("Stopping memory capture session");
        }
        self.shared.token.cancel();
    }

    fn error(&self) -> Option<Error> {
        lock(&self.shared.error).take()
    }
}

async fn pump(
    mut input: mpsc::Receiver<SourceChange>,
    output: mpsc::Sender<SourceChange>,
    shared: Arc<Shared>,
    resume_from: u64,
) {
    loop {
        let change = tokio::select! {
            biased;
            _ = shared.token.cancelled() => break,
            change = input.recv() => match change {
                Some(change) => change,
                None => break,
            },
        };

        if change.checkpoint.lsn < resume_from {
            trace!(checkpoint = %change.checkpoint, "Skipping change before resume point");
            continue;
        }
        if !passes_filter(shared.filter.as_ref(), &change.message) {
            trace!(checkpoint = %change.checkpoint, "Skipping filtered table");
            continue;
        }

        tokio::select! {
            biased;
            _ = shared.token.cancelled() => break,
            sent = output.send(change) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }

    debug!("Memory capture session closed");
}

impl MemoryFeed {
    /// Pushes a message at the next LSN and returns its checkpoint.
    pub async fn push(&mut self, message: impl Into<Message>) -> Result<Checkpoint> {
        let checkpoint = Checkpoint::new(self.next_lsn);
        self.push_at(checkpoint.clone(), message).await?;
        Ok(checkpoint)
    }

    /// Pushes a message with an explicit checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shutdown`] once the session has been stopped.
    pub async fn push_at(
        &mut self,
        checkpoint: Checkpoint,
        message: impl Into<Message>,
    ) -> Result<()> {
        self.next_lsn = self.next_lsn.max(checkpoint.lsn.saturating_add(1));
        self.tx
            .send(SourceChange {
                checkpoint,
                message: message.into(),
            })
            .await
            .map_err(|_| Error::Shutdown)
    }

    /// Ends the stream with a terminal source error.
    pub fn fail(self, message: impl Into<String>) {
        let message = message.into();
        warn!(error = %message, "Memory capture session failed");
        *lock(&self.shared.error) = Some(Error::Source { message });
    }

    /// Ends the stream normally.
    pub fn close(self) {}
}
