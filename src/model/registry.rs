use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use super::{qualified_name, Model, ModelDescriptor};
use crate::checkpoint::Checkpoint;
use crate::error::DecodeError;
use crate::handler::{Change, Handler};
use crate::source::RowChange;
use crate::{Error, Result};

type PendingRoute = Box<dyn FnOnce() -> Result<Box<dyn Route>> + Send>;

/// Caller-supplied model/handler pairs for one consumption session.
///
/// Descriptors are built when the session starts, so a model that cannot be
/// indexed fails [`Consumer::consume`](crate::Consumer::consume) before any
/// event is read.
#[derive(Default)]
pub struct ModelHandlers {
    pending: Vec<PendingRoute>,
}

impl ModelHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<M, H>(mut self, handler: H) -> Self
    where
        M: Model,
        H: Handler<M>,
    {
        self.pending.push(Box::new(move || {
            let descriptor = ModelDescriptor::<M>::new()?;
            Ok(Box::new(Registration {
                descriptor,
                handler,
            }) as Box<dyn Route>)
        }));
        self
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl std::fmt::Debug for ModelHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandlers")
            .field("models", &self.pending.len())
            .finish()
    }
}

/// Why an event could not be applied. Both variants resolve to a requeue.
#[derive(Debug, Error)]
pub(crate) enum DispatchError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("{0}")]
    Handler(anyhow::Error),
}

impl DispatchError {
    /// Text handed to the source as the requeue reason. Handler errors keep
    /// their whole context chain.
    pub(crate) fn reason(&self) -> String {
        match self {
            DispatchError::Decode(e) => e.to_string(),
            DispatchError::Handler(e) => format!("{:#}", e),
        }
    }
}

#[async_trait]
pub(crate) trait Route: Send + Sync {
    fn table(&self) -> &str;

    async fn dispatch(
        &self,
        row: &RowChange,
        checkpoint: &Checkpoint,
    ) -> std::result::Result<(), DispatchError>;
}

struct Registration<M, H> {
    descriptor: ModelDescriptor<M>,
    handler: H,
}

#[async_trait]
impl<M, H> Route for Registration<M, H>
where
    M: Model,
    H: Handler<M>,
{
    fn table(&self) -> &str {
        self.descriptor.qualified_name()
    }

    async fn dispatch(
        &self,
        row: &RowChange,
        checkpoint: &Checkpoint,
    ) -> std::result::Result<(), DispatchError> {
        // Both images must decode before the handler sees either.
        let new = self.descriptor.decode(&row.new)?;
        let old = self.descriptor.decode(&row.old)?;

        self.handler
            .handle(Change {
                op: row.op,
                lsn: checkpoint.lsn,
                new,
                old,
            })
            .await
            .map_err(DispatchError::Handler)
    }
}

/// Immutable table-name lookup built once per session.
pub struct Registry {
    routes: HashMap<String, Box<dyn Route>>,
}

impl Registry {
    /// Builds every pending descriptor.
    ///
    /// # Errors
    ///
    /// Returns the first [`Error::Registration`], including a table being
    /// registered twice.
    pub fn build(handlers: ModelHandlers) -> Result<Self> {
        let mut routes: HashMap<String, Box<dyn Route>> =
            HashMap::with_capacity(handlers.pending.len());

        for pending in handlers.pending {
            let route = pending()?;
            let table = route.table().to_string();
            if routes.contains_key(&table) {
                return Err(Error::registration(table, "table registered more than once"));
            }
            debug!(table = %table, "Registered model");
            routes.insert(table, route);
        }

        Ok(Self { routes })
    }

    pub(crate) fn resolve(&self, schema: &str, table: &str) -> Option<&dyn Route> {
        self.routes
            .get(&qualified_name(schema, table))
            .map(|route| route.as_ref())
    }

    pub fn contains(&self, qualified: &str) -> bool {
        self.routes.contains_key(qualified)
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
