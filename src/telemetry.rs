//! Logging setup for embedding services

use crate::{Error, Result};
use tracing::Subscriber;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn default_level(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

/// Build a subscriber without installing it
///
/// `RUST_LOG` wins when set; otherwise the level is `debug` or `info`
/// depending on `verbose`. `json` switches to one JSON object per event.
pub fn subscriber(verbose: bool, json: bool) -> Box<dyn Subscriber + Send + Sync> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(verbose)));

    let registry = tracing_subscriber::registry().with(filter);

    if json {
        Box::new(registry.with(fmt::layer().json()))
    } else {
        Box::new(registry.with(fmt::layer()))
    }
}

/// Install [`subscriber`] as the global default
pub fn init_tracing(verbose: bool, json: bool) -> Result<()> {
    tracing::subscriber::set_global_default(subscriber(verbose, json))
        .map_err(|e| Error::Config(format!("Failed to install tracing subscriber: {}", e)))
}
