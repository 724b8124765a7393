// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide tracing subscriber with a reloadable level filter.

use agentk_modules::observability::DEFAULT_LOG_LEVEL;
use agentk_modules::LogLevelControl;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to install tracing subscriber: {0}")]
    Init(String),
}

/// Swaps the live filter when the configured level changes.
///
/// A filter taken from `RUST_LOG` is pinned: configured levels are then
/// ignored so an operator override stays in effect.
#[derive(Clone)]
pub struct ReloadLogLevel {
    handle: reload::Handle<EnvFilter, Registry>,
    pinned: bool,
}

impl ReloadLogLevel {
    pub fn new(handle: reload::Handle<EnvFilter, Registry>, pinned: bool) -> Self {
        Self { handle, pinned }
    }
}

impl LogLevelControl for ReloadLogLevel {
    fn set_level(&self, level: LevelFilter) -> Result<(), String> {
        if self.pinned {
            tracing::debug!(%level, "RUST_LOG is set, ignoring configured log level");
            return Ok(());
        }
        self.handle.reload(EnvFilter::new(level.to_string())).map_err(|e| e.to_string())
    }
}

/// Install the global subscriber: `RUST_LOG` if set, else `info`.
pub fn init_logging() -> Result<ReloadLogLevel, LoggingError> {
    let from_env = EnvFilter::try_from_default_env().ok();
    let pinned = from_env.is_some();
    let filter = from_env.unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_LEVEL));
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    Ok(ReloadLogLevel::new(handle, pinned))
}

#[cfg(test)]
#[path = "logging_tests.rs"]
mod tests;
