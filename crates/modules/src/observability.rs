// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Applies the configured log level to the running process.

use std::str::FromStr;
use std::sync::Arc;

use agentk_core::{AgentConfiguration, LoggingCF, ObservabilityCF};
use agentk_engine::{BuiltModule, ConfigReceiver, Factory, Module, ModuleConfig, ModuleError};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;

pub const MODULE_NAME: &str = "observability";

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Live control over the process log filter.
pub trait LogLevelControl: Send + Sync {
    fn set_level(&self, level: LevelFilter) -> Result<(), String>;
}

pub fn parse_level(level: &str) -> Result<LevelFilter, ModuleError> {
    LevelFilter::from_str(level).map_err(|_| ModuleError::invalid(format!("invalid log level: {level:?}")))
}

pub struct ObservabilityModule {
    control: Arc<dyn LogLevelControl>,
}

impl ObservabilityModule {
    pub fn new(control: Arc<dyn LogLevelControl>) -> Self {
        Self { control }
    }
}

#[async_trait]
impl Module for ObservabilityModule {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn default_and_validate(&self, cfg: &mut AgentConfiguration) -> Result<(), ModuleError> {
        let logging = cfg
            .observability
            .get_or_insert_with(ObservabilityCF::default)
            .logging
            .get_or_insert_with(LoggingCF::default);
        if logging.level.is_empty() {
            logging.level = DEFAULT_LOG_LEVEL.to_string();
        }
        parse_level(&logging.level)?;
        Ok(())
    }

    async fn run(&self, cancel: CancellationToken, mut cfg: ConfigReceiver) -> Result<(), ModuleError> {
        let mut applied: Option<LevelFilter> = None;
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = cfg.recv() => next,
            };
            let Some(next) = next else { break };
            let level = next
                .observability
                .as_ref()
                .and_then(|o| o.logging.as_ref())
                .map_or(DEFAULT_LOG_LEVEL, |l| l.level.as_str());
            let level = match parse_level(level) {
                Ok(level) => level,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to apply logging configuration");
                    continue;
                }
            };
            if applied == Some(level) {
                continue;
            }
            match self.control.set_level(level) {
                Ok(()) => {
                    tracing::info!(%level, "Log level updated");
                    applied = Some(level);
                }
                Err(e) => tracing::error!(error = %e, "Failed to apply logging configuration"),
            }
        }
        Ok(())
    }
}

pub struct ObservabilityFactory {
    control: Arc<dyn LogLevelControl>,
}

impl ObservabilityFactory {
    pub fn new(control: Arc<dyn LogLevelControl>) -> Self {
        Self { control }
    }
}

impl Factory for ObservabilityFactory {
    fn name(&self) -> &'static str {
        MODULE_NAME
    }

    fn new_module(&self, _: &ModuleConfig) -> Result<BuiltModule, ModuleError> {
        Ok(BuiltModule::Module(Arc::new(ObservabilityModule::new(Arc::clone(&self.control)))))
    }
}

#[cfg(any(test, feature = "test-support"))]
#[cfg_attr(coverage_nightly, coverage(off))]
mod fake {
    use super::*;
    use parking_lot::Mutex;

    /// Records every level set.
    #[derive(Clone, Default)]
    pub struct FakeLogLevel {
        levels: Arc<Mutex<Vec<LevelFilter>>>,
    }

    impl FakeLogLevel {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn levels(&self) -> Vec<LevelFilter> {
            self.levels.lock().clone()
        }
    }

    impl LogLevelControl for FakeLogLevel {
        fn set_level(&self, level: LevelFilter) -> Result<(), String> {
            self.levels.lock().push(level);
            Ok(())
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeLogLevel;

#[cfg(test)]
#[path = "observability_tests.rs"]
mod tests;
