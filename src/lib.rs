//! Typed consumer for PostgreSQL change data capture streams.
//!
//! Applications describe tables as [`Model`]s, register an async
//! [`Handler`] per model and run a [`Consumer`] over a
//! [`RequeueSource`](source::RequeueSource). Every event is acknowledged
//! exactly once: committed when it was applied or is of no interest, and
//! requeued with a reason when decoding or the handler failed.

pub mod checkpoint;
pub mod config;
pub mod consumer;
pub mod decode;
pub mod error;
pub mod handler;
pub mod model;
pub mod source;
pub mod telemetry;

pub use checkpoint::Checkpoint;
pub use config::{CaptureInit, ConsumerConfig};
pub use consumer::{Consumer, ConsumerState};
pub use decode::PgDecode;
pub use error::{DecodeError, Error, Result};
pub use handler::{Change, Handler};
pub use model::{Model, ModelDescriptor, ModelHandlers};
pub use source::RequeueSource;
