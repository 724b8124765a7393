// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodically announces this agent pod to the server.

use std::sync::Arc;
use std::time::Duration;

use agentk_adapters::rpc::{AgentRegistrarClient, RegisterRequest};
use agentk_adapters::ServerVersion;
use agentk_core::{poll_with_backoff, AgentConfiguration, AgentMeta, AttemptResult, BackoffConfig, PollConfig};
use agentk_engine::{BuiltModule, ConfigReceiver, Factory, Module, ModuleConfig, ModuleError};
use async_trait::async_trait;
use rand::Rng;
use tokio_util::sync::CancellationToken;

pub const MODULE_NAME: &str = "agent_registrar";

pub const REGISTER_INTERVAL: Duration = Duration::from_secs(300);
const REGISTER_BACKOFF: BackoffConfig =
    BackoffConfig::new(Duration::from_secs(10), Duration::from_secs(300), Duration::from_secs(600), 2.0, 1.0);

pub struct RegistrarModule {
    agent_meta: AgentMeta,
    pod_id: i64,
    poll: PollConfig,
    client: Arc<dyn AgentRegistrarClient>,
    version: Arc<dyn ServerVersion>,
}

impl RegistrarModule {
    pub fn new(
        agent_meta: AgentMeta,
        pod_id: i64,
        poll: PollConfig,
        client: Arc<dyn AgentRegistrarClient>,
        version: Arc<dyn ServerVersion>,
    ) -> Self {
        Self { agent_meta, pod_id, poll, client, version }
    }

    async fn register(&self, cancel: &CancellationToken) -> AttemptResult {
        let mut agent_meta = self.agent_meta.clone();
        match self.version.server_version().await {
            Ok(version) => agent_meta.kubernetes_version = version,
            Err(e) => tracing::warn!(error = %e, "Failed to fetch Kubernetes version"),
        }
        let req = RegisterRequest { agent_meta, pod_id: self.pod_id };
        let result = tokio::select! {
            _ = cancel.cancelled() => return AttemptResult::Backoff,
            result = self.client.register(req) => result,
        };
        match result {
            Ok(()) => AttemptResult::Continue,
            Err(e) => {
                if !e.is_canceled() {
                    tracing::error!(
                        error = %e,
                        "Failed to register agent pod. Please make sure the agent version matches the server version"
                    );
                }
                AttemptResult::Backoff
            }
        }
    }
}

#[async_trait]
impl Module for RegistrarModule {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn default_and_validate(&self, _: &mut AgentConfiguration) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn run(&self, cancel: CancellationToken, _cfg: ConfigReceiver) -> Result<(), ModuleError> {
        let _ = poll_with_backoff(&cancel, &self.poll, || self.register(&cancel)).await;
        Ok(())
    }
}

pub struct RegistrarFactory {
    client: Arc<dyn AgentRegistrarClient>,
    version: Arc<dyn ServerVersion>,
}

impl RegistrarFactory {
    pub fn new(client: Arc<dyn AgentRegistrarClient>, version: Arc<dyn ServerVersion>) -> Self {
        Self { client, version }
    }
}

impl Factory for RegistrarFactory {
    fn name(&self) -> &'static str {
        MODULE_NAME
    }

    fn new_module(&self, cfg: &ModuleConfig) -> Result<BuiltModule, ModuleError> {
        let pod_id = rand::thread_rng().gen_range(0..=i64::MAX);
        Ok(BuiltModule::Module(Arc::new(RegistrarModule::new(
            cfg.agent_meta.clone(),
            pod_id,
            REGISTER_BACKOFF.poll_config(REGISTER_INTERVAL),
            Arc::clone(&self.client),
            Arc::clone(&self.version),
        ))))
    }
}

#[cfg(test)]
#[path = "registrar_tests.rs"]
mod tests;
