// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote development: round-trips workspace state between the cluster and
//! the server.

pub mod messages;
mod reconciler;
mod trackers;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use agentk_adapters::{Applier, DeploymentInformer, NamespaceOps};
use agentk_core::{AgentConfiguration, RemoteDevelopmentCF};
use agentk_engine::{
    BuiltModule, ConfigReceiver, Factory, LeaderModule, Module, ModuleApi, ModuleConfig, ModuleError, Worker,
    WorkerHolder,
};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use worker::RemoteDevWorker;

pub const MODULE_NAME: &str = "remote_development";

pub const DEFAULT_PARTIAL_SYNC_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_FULL_SYNC_INTERVAL: Duration = Duration::from_secs(3600);

/// Label selecting the Deployments of this agent's workspaces.
pub(crate) const AGENT_ID_LABEL: &str = "agent.gitlab.com/id";

#[derive(Clone)]
pub struct RemoteDevBackends {
    pub namespaces: Arc<dyn NamespaceOps>,
    pub informer: Arc<dyn DeploymentInformer>,
    pub applier: Arc<dyn Applier>,
}

pub struct RemoteDevModule {
    api: ModuleApi,
    backends: RemoteDevBackends,
}

impl RemoteDevModule {
    pub fn new(api: ModuleApi, backends: RemoteDevBackends) -> Self {
        Self { api, backends }
    }
}

/// Worker for a disabled module.
struct IdleWorker;

#[async_trait]
impl Worker for IdleWorker {
    async fn run(&self, cancel: CancellationToken) {
        cancel.cancelled().await;
    }
}

fn default_interval(interval: &mut Option<Duration>, default: Duration) {
    if interval.is_none_or(|d| d.is_zero()) {
        *interval = Some(default);
    }
}

#[async_trait]
impl Module for RemoteDevModule {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn default_and_validate(&self, cfg: &mut AgentConfiguration) -> Result<(), ModuleError> {
        let rd = cfg.remote_development.get_or_insert_with(RemoteDevelopmentCF::default);
        default_interval(&mut rd.partial_sync_interval, DEFAULT_PARTIAL_SYNC_INTERVAL);
        default_interval(&mut rd.full_sync_interval, DEFAULT_FULL_SYNC_INTERVAL);
        Ok(())
    }

    async fn run(&self, cancel: CancellationToken, mut cfg: ConfigReceiver) -> Result<(), ModuleError> {
        let (api, backends) = (self.api.clone(), self.backends.clone());
        let mut holder = WorkerHolder::new(move |rd: &RemoteDevelopmentCF| -> Box<dyn Worker> {
            if !rd.enabled {
                return Box::new(IdleWorker);
            }
            Box::new(RemoteDevWorker {
                api: api.clone(),
                backends: backends.clone(),
                full_sync_interval: rd.full_sync_interval.unwrap_or(DEFAULT_FULL_SYNC_INTERVAL),
                partial_sync_interval: rd.partial_sync_interval.unwrap_or(DEFAULT_PARTIAL_SYNC_INTERVAL),
            })
        });
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = cfg.recv() => next,
            };
            let Some(next) = next else { break };
            holder.apply_config(next.remote_development.clone().unwrap_or_default()).await;
        }
        holder.stop_and_wait().await;
        Ok(())
    }
}

impl LeaderModule for RemoteDevModule {
    fn is_runnable_configuration(&self, cfg: &AgentConfiguration) -> bool {
        cfg.remote_development.as_ref().is_some_and(|rd| rd.enabled)
    }
}

pub struct RemoteDevFactory {
    backends: RemoteDevBackends,
}

impl RemoteDevFactory {
    pub fn new(backends: RemoteDevBackends) -> Self {
        Self { backends }
    }
}

impl Factory for RemoteDevFactory {
    fn name(&self) -> &'static str {
        MODULE_NAME
    }

    fn new_module(&self, cfg: &ModuleConfig) -> Result<BuiltModule, ModuleError> {
        Ok(BuiltModule::Leader(Arc::new(RemoteDevModule::new(
            cfg.api.for_module(MODULE_NAME),
            self.backends.clone(),
        ))))
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
