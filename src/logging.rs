// src/logging.rs

//! Process-wide `tracing` subscriber setup.

use anyhow::{Result, anyhow};
use std::sync::Arc;
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

/// Handle for changing the active log filter at runtime.
pub type LogReloadHandle = Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>;

/// Installs the global subscriber. `RUST_LOG` takes precedence over `level`.
///
/// Fails if a global subscriber is already installed.
pub fn init(level: &str) -> Result<LogReloadHandle> {
    let initial_log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string());

    // Create a reloadable filter layer.
    let (filter, reload_handle) = reload::Layer::new(EnvFilter::try_new(initial_log_level)?);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact() // Use the compact, single-line format.
                .with_ansi(true),
        )
        .try_init()
        .map_err(|e| anyhow!("Failed to install log subscriber: {e}"))?;

    Ok(Arc::new(reload_handle))
}

/// Replaces the active filter, e.g. `"debug"` or `"info,commlink::server=trace"`.
pub fn set_level(handle: &LogReloadHandle, level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)?;
    handle
        .reload(filter)
        .map_err(|e| anyhow!("Failed to reload log filter: {e}"))
}
