// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration fan-out to modules.
//!
//! Each module is fed through its own pipe task holding at most one pending
//! configuration. A newer configuration replaces the pending one, so a slow
//! module only ever sees the latest configuration and never holds up the
//! others.

use std::sync::Arc;

use agentk_core::AgentConfiguration;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config_watcher::ConfigurationWatcher;
use crate::module::{ConfigSender, Module, ModuleError};
use crate::rendezvous;

type CfgReceiver = mpsc::Receiver<Arc<AgentConfiguration>>;

struct ModuleHolder {
    module: Arc<dyn Module>,
    cfg2pipe: mpsc::Sender<Arc<AgentConfiguration>>,
    pipe_rx: Mutex<Option<CfgReceiver>>,
}

pub struct ModuleRunner {
    holders: Vec<ModuleHolder>,
}

impl ModuleRunner {
    pub fn new(modules: Vec<Arc<dyn Module>>) -> Self {
        let holders = modules
            .into_iter()
            .map(|module| {
                let (cfg2pipe, pipe_rx) = mpsc::channel(1);
                ModuleHolder { module, cfg2pipe, pipe_rx: Mutex::new(Some(pipe_rx)) }
            })
            .collect();
        Self { holders }
    }

    /// Run every module until `cancel` fires or one of them fails.
    ///
    /// A failing module cancels the others; the first error is returned
    /// prefixed with the module name.
    pub async fn run_modules(&self, cancel: &CancellationToken) -> Result<(), ModuleError> {
        let cancel = cancel.child_token();
        let mut tasks = JoinSet::new();
        for holder in &self.holders {
            let Some(pipe_rx) = holder.pipe_rx.lock().take() else {
                return Err(ModuleError::Failed("modules are already running".to_string()));
            };
            let (to_module, module_rx) = rendezvous::channel();
            tasks.spawn(pipe(cancel.clone(), pipe_rx, to_module));

            let module = Arc::clone(&holder.module);
            let module_cancel = cancel.clone();
            tasks.spawn(async move {
                let name = module.name().to_string();
                tracing::debug!(module = %name, "starting module");
                let res = module.run(module_cancel, module_rx).await;
                res.map_err(|e| e.context(&name))
            });
        }

        let mut first_err = None;
        while let Some(joined) = tasks.join_next().await {
            let res = match joined {
                Ok(res) => res,
                Err(e) => Err(ModuleError::Failed(format!("module task failed: {e}"))),
            };
            match res {
                Ok(()) | Err(ModuleError::Cancelled) => {}
                Err(e) => {
                    tracing::error!(error = %e, "module failed");
                    cancel.cancel();
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Validate `cfg` with every module, then hand it to every module.
    ///
    /// A validation failure rejects the whole configuration.
    pub async fn apply_configuration(&self, commit_id: &str, mut cfg: AgentConfiguration) -> Result<(), ModuleError> {
        for holder in &self.holders {
            holder
                .module
                .default_and_validate(&mut cfg)
                .map_err(|e| e.context(holder.module.name()))?;
        }
        tracing::debug!(commit_id = %commit_id, "applying configuration");
        let cfg = Arc::new(cfg);
        for holder in &self.holders {
            // A closed pipe means modules are shutting down.
            let _ = holder.cfg2pipe.send(Arc::clone(&cfg)).await;
        }
        Ok(())
    }

    /// Apply every configuration `watcher` delivers until `cancel` fires.
    pub async fn run_configuration_refresh(&self, cancel: &CancellationToken, watcher: &ConfigurationWatcher) {
        watcher
            .watch(cancel, |data| async move {
                let commit_id = data.commit_id;
                match self.apply_configuration(&commit_id, data.config).await {
                    Ok(()) => {}
                    Err(ModuleError::InvalidConfiguration(e)) => {
                        tracing::info!(commit_id = %commit_id, error = %e, "invalid agent configuration");
                    }
                    Err(e) => {
                        tracing::error!(commit_id = %commit_id, error = %e, "failed to apply configuration");
                    }
                }
            })
            .await;
    }
}

/// Move configurations from the runner to one module, keeping only the newest.
async fn pipe(cancel: CancellationToken, mut from_runner: CfgReceiver, mut to_module: ConfigSender) -> Result<(), ModuleError> {
    let mut to_send: Option<Arc<AgentConfiguration>> = None;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            cfg = from_runner.recv() => match cfg {
                Some(cfg) => to_send = Some(cfg),
                None => return Ok(()),
            },
            permit = to_module.ready(), if to_send.is_some() => {
                let Some(permit) = permit else {
                    // Module stopped reading; keep absorbing configurations.
                    to_send = None;
                    continue;
                };
                if let Some(cfg) = to_send.take() {
                    if let Err(cfg) = permit.send(cfg) {
                        to_send = Some(cfg);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "module_runner_tests.rs"]
mod tests;
