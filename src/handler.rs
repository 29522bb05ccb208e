use async_trait::async_trait;
use std::future::Future;

use crate::model::Model;
use crate::source::Op;

/// A decoded row change delivered to a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Change<M> {
    pub op: Op,
    /// Log sequence number from the event's checkpoint.
    pub lsn: u64,
    /// Row after the change, absent for deletes.
    pub new: Option<M>,
    /// Row before the change, when the source provides it.
    pub old: Option<M>,
}

/// Caller logic invoked once per change of a model's table.
///
/// Returning `Err` requeues the event with the error's text as the reason.
/// Implemented for any `Fn(Change<M>) -> impl Future<Output = anyhow::Result<()>>`.
#[async_trait]
pub trait Handler<M: Model>: Send + Sync + 'static {
    async fn handle(&self, change: Change<M>) -> anyhow::Result<()>;
}

#[async_trait]
impl<M, F, Fut> Handler<M> for F
where
    M: Model,
    F: Fn(Change<M>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, change: Change<M>) -> anyhow::Result<()> {
        (self)(change).await
    }
}
