use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::{Error, Result};

/// Installs the global `tracing` subscriber for an embedding application.
///
/// `RUST_LOG` wins unless `verbose` is set. Fails if a global subscriber is
/// already installed.
pub fn init_logging(json: bool, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        EnvFilter::new("pg_capture_consumer=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("pg_capture_consumer=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("failed to install logger: {}", e)))
}
