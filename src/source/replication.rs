//! [`RequeueSource`] over a `pgoutput` replication stream.
//!
//! The transport (connection, `START_REPLICATION`, standby status updates)
//! stays with the caller: it hands in a stream of CopyData payloads and
//! reports [`ReplicationSource::confirmed_flush`] back to the server.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use regex::Regex;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use super::{lock, passes_filter, ChangeReceiver, PgOutputDecoder, RequeueSource, SourceChange};
use crate::checkpoint::{format_lsn, Checkpoint};
use crate::config::CaptureInit;
use crate::{Error, Result};

const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, Default)]
struct Progress {
    committed: u64,
    /// Lowest LSN requeued so far. The confirmed position never passes it.
    pinned: Option<u64>,
}

impl Progress {
    fn confirmed(&self) -> u64 {
        match self.pinned {
            Some(pinned) => self.committed.min(pinned.saturating_sub(1)),
            None => self.committed,
        }
    }
}

struct Shared {
    init: CaptureInit,
    filter: Option<Regex>,
    capacity: usize,
    token: CancellationToken,
    error: Mutex<Option<Error>>,
    progress: Mutex<Progress>,
    flush: watch::Sender<u64>,
}

impl Shared {
    fn fail(&self, err: Error) {
        let err = match err {
            Error::Source { .. } => err,
            other => Error::Source {
                message: other.to_string(),
            },
        };
        error!(error = %err, "Replication stream failed");
        *lock(&self.error) = Some(err);
    }

    fn publish(&self, progress: &Progress) {
        let confirmed = progress.confirmed();
        self.flush.send_if_modified(|current| {
            if *current == confirmed {
                return false;
            }
            trace!(lsn = %format_lsn(confirmed), "Confirmed flush position");
            *current = confirmed;
            true
        });
    }
}

/// Capture source decoding a `pgoutput` CopyData stream.
pub struct ReplicationSource<S> {
    shared: Arc<Shared>,
    frames: Mutex<Option<S>>,
}

impl<S> ReplicationSource<S>
where
    S: Stream<Item = Result<Bytes>> + Send + 'static,
{
    pub fn new(init: CaptureInit, frames: S) -> Result<Self> {
        Self::with_capacity(init, frames, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(init: CaptureInit, frames: S, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Config(
                "channel capacity must be greater than zero".to_string(),
            ));
        }

        let filter = init.table_filter()?;
        let (flush, _) = watch::channel(0);

        Ok(Self {
            shared: Arc::new(Shared {
                init,
                filter,
                capacity,
                token: CancellationToken::new(),
                error: Mutex::new(None),
                progress: Mutex::new(Progress::default()),
                flush,
            }),
            frames: Mutex::new(Some(frames)),
        })
    }

    pub fn init(&self) -> &CaptureInit {
        &self.shared.init
    }

    /// Highest LSN the server may discard up to. Feed this into standby
    /// status updates.
    pub fn confirmed_flush(&self) -> watch::Receiver<u64> {
        self.shared.flush.subscribe()
    }
}

impl ReplicationSource<ReceiverStream<Result<Bytes>>> {
    /// Source reading frames from a channel, for transports that push.
    pub fn from_channel(init: CaptureInit, frames: mpsc::Receiver<Result<Bytes>>) -> Result<Self> {
        Self::new(init, ReceiverStream::new(frames))
    }
}

#[async_trait]
impl<S> RequeueSource for ReplicationSource<S>
where
    S: Stream<Item = Result<Bytes>> + Send + 'static,
{
    async fn capture(&self, checkpoint: Checkpoint) -> Result<ChangeReceiver> {
        let frames = lock(&self.frames).take().ok_or_else(|| Error::Source {
            message: "capture session already started".to_string(),
        })?;

        debug!(
            uri = %self.shared.init.uri,
            resume_from = %checkpoint,
            "Starting replication capture session"
        );

        let (output, changes) = mpsc::channel(self.shared.capacity);
        tokio::spawn(pump(frames, output, self.shared.clone(), checkpoint.lsn));
        Ok(changes)
    }

    fn commit(&self, checkpoint: Checkpoint) {
        let mut progress = lock(&self.shared.progress);
        progress.committed = progress.committed.max(checkpoint.lsn);
        self.shared.publish(&progress);
    }

    fn requeue(&self, checkpoint: Checkpoint, reason: String) {
        warn!(
            checkpoint = %checkpoint,
            reason = %reason,
            "Holding confirmed flush below requeued change"
        );
        let mut progress = lock(&self.shared.progress);
        progress.pinned = Some(match progress.pinned {
            Some(pinned) => pinned.min(checkpoint.lsn),
            None => checkpoint.lsn,
        });
        self.shared.publish(&progress);
    }

    fn stop(&self) {
        if !self.shared.token.is_cancelled() {
            debug!("Stopping replication capture session");
        }
        self.shared.token.cancel();
    }

    fn error(&self) -> Option<Error> {
        lock(&self.shared.error).take()
    }
}

async fn pump<S>(
    frames: S,
    output: mpsc::Sender<SourceChange>,
    shared: Arc<Shared>,
    resume_from: u64,
) where
    S: Stream<Item = Result<Bytes>> + Send,
{
    tokio::pin!(frames);
    let mut decoder = PgOutputDecoder::new();

    loop {
        let frame = tokio::select! {
            biased;
            _ = shared.token.cancelled() => break,
            frame = frames.next() => frame,
        };

        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                shared.fail(e);
                break;
            }
            None => {
                debug!("Replication stream ended");
                break;
            }
        };

        let change = match decoder.decode(frame) {
            Ok(Some(change)) => change,
            Ok(None) => continue,
            Err(e) => {
                shared.fail(e);
                break;
            }
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

    debug!("Replication capture session closed");
}
