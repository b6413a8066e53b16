//! Opt-in subscriber setup for applications
//!
//! Timers only emit `tracing` events. Applications that do not already run a
//! subscriber can install a stderr `fmt` subscriber here.

use crate::correlator::LOG_TARGET;
use crate::error::{ProfilerError, Result};
use tracing_subscriber::EnvFilter;

/// Directive used when neither an explicit filter nor `RUST_LOG` is given
pub fn default_directive() -> String {
    format!("{}=info", LOG_TARGET)
}

/// Build a filter from explicit directives, else `RUST_LOG`, else the default
pub fn env_filter(directives: Option<&str>) -> Result<EnvFilter> {
    match directives {
        Some(directives) => EnvFilter::try_new(directives)
            .map_err(|e| ProfilerError::InvalidFilter(format!("{}: {}", directives, e))),
        None => Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive()))),
    }
}

/// Install a global stderr subscriber; fails if one is already installed
pub fn init_tracing(directives: Option<&str>) -> Result<()> {
    let filter = env_filter(directives)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| ProfilerError::SubscriberInit(e.to_string()))
}
