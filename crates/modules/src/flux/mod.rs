// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Flux integration.
//!
//! Every Flux `GitRepository` hosted on this GitLab instance gets a companion
//! `Receiver`. When GitLab reports new commits for a project, the module pokes
//! the receivers of that project so Flux reconciles right away instead of
//! waiting for its next poll.

mod client;
mod controller;
mod queue;
mod trigger;

use std::sync::Arc;
use std::time::Duration;

use agentk_adapters::flux::{GIT_REPOSITORY_CRD, RECEIVER_CRD};
use agentk_adapters::rpc::FluxClient;
use agentk_adapters::{CrdProbe, FluxInformers, FluxObjects, HttpClient};
use agentk_core::{AgentConfiguration, FluxCF};
use agentk_engine::{
    BuiltModule, ConfigReceiver, Factory, LeaderModule, Module, ModuleApi, ModuleConfig, ModuleError, Worker,
    WorkerHolder,
};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use client::{indexed_projects, ProjectReconciler};
pub use controller::{gitlab_host, GitRepositoryController};
pub use trigger::ReconcileTrigger;

pub const MODULE_NAME: &str = "flux";

pub const DEFAULT_WEBHOOK_RECEIVER_URL: &str = "http://webhook-receiver.flux-system.svc.cluster.local";
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

pub(crate) const PROJECT_ANNOTATION: &str = "agent.gitlab.com/project";
pub(crate) const AGENT_ID_ANNOTATION: &str = "agent.gitlab.com/id";
pub(crate) const MANAGED_BY_ANNOTATION: &str = "app.kubernetes.io/managed-by";
pub(crate) const MANAGED_BY_VALUE: &str = "gitlab";

/// Cluster and server collaborators of the Flux module.
#[derive(Clone)]
pub struct FluxBackends {
    pub crds: Arc<dyn CrdProbe>,
    pub informers: Arc<dyn FluxInformers>,
    pub objects: Arc<dyn FluxObjects>,
    pub client: Arc<dyn FluxClient>,
    /// Used for receiver URLs outside the Kubernetes API server.
    pub http: Arc<dyn HttpClient>,
    /// Used for Kubernetes service proxy receiver URLs.
    pub kube_proxy: Arc<dyn HttpClient>,
}

pub struct FluxModule {
    api: ModuleApi,
    backends: FluxBackends,
    debounce: Duration,
}

impl FluxModule {
    pub fn new(api: ModuleApi, backends: FluxBackends, debounce: Duration) -> Self {
        Self { api, backends, debounce }
    }
}

#[async_trait]
impl Module for FluxModule {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn default_and_validate(&self, cfg: &mut AgentConfiguration) -> Result<(), ModuleError> {
        let flux = cfg.flux.get_or_insert_with(FluxCF::default);
        if flux.webhook_receiver_url.is_empty() {
            flux.webhook_receiver_url = DEFAULT_WEBHOOK_RECEIVER_URL.to_string();
        }
        Ok(())
    }

    async fn run(&self, cancel: CancellationToken, mut cfg: ConfigReceiver) -> Result<(), ModuleError> {
        let (api, backends, debounce) = (self.api.clone(), self.backends.clone(), self.debounce);
        let mut holder = WorkerHolder::new(move |flux: &FluxCF| -> Box<dyn Worker> {
            Box::new(FluxWorker {
                receiver_url: flux.webhook_receiver_url.clone(),
                api: api.clone(),
                backends: backends.clone(),
                debounce,
            })
        });
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = cfg.recv() => next,
            };
            let Some(next) = next else { break };
            holder.apply_config(next.flux.clone().unwrap_or_default()).await;
        }
        holder.stop_and_wait().await;
        Ok(())
    }
}

impl LeaderModule for FluxModule {
    fn is_runnable_configuration(&self, cfg: &AgentConfiguration) -> bool {
        cfg.flux.is_some()
    }
}

/// Runs the controller and the project reconciler for one receiver URL.
struct FluxWorker {
    receiver_url: String,
    api: ModuleApi,
    backends: FluxBackends,
    debounce: Duration,
}

impl FluxWorker {
    async fn flux_installed(&self) -> bool {
        for crd in [GIT_REPOSITORY_CRD, RECEIVER_CRD] {
            match self.backends.crds.crd_exists(crd).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!(crd, "Flux is not installed in the cluster, the Flux module is idle");
                    return false;
                }
                Err(e) => {
                    tracing::error!(crd, error = %e, "Unable to check for Flux CRD, the Flux module is idle");
                    return false;
                }
            }
        }
        true
    }

    async fn run_flux(&self, cancel: &CancellationToken) -> Result<(), String> {
        let agent_id = self.api.agent_id(cancel).await.map_err(|e| e.to_string())?;
        let external_url = self.api.gitlab_external_url(cancel).await.map_err(|e| e.to_string())?;
        let host = gitlab_host(&external_url)?;
        let trigger = ReconcileTrigger::new(
            &self.receiver_url,
            Arc::clone(&self.backends.http),
            Arc::clone(&self.backends.kube_proxy),
        )
        .map_err(|e| format!("unable to create receiver: {e}"))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cache = self
            .backends
            .informers
            .start(cancel.clone(), events_tx)
            .await
            .map_err(|e| format!("unable to start informers: {e}"))?;

        let (index_tx, index_rx) = mpsc::unbounded_channel();
        let reconciler = ProjectReconciler::new(
            Arc::clone(&self.backends.client),
            Arc::clone(&cache),
            Arc::new(trigger),
            self.debounce,
        );
        let controller =
            GitRepositoryController::new(agent_id, host, cache, Arc::clone(&self.backends.objects), index_tx);
        tokio::join!(reconciler.run(cancel, index_rx), controller.run(cancel, events_rx));
        Ok(())
    }
}

#[async_trait]
impl Worker for FluxWorker {
    async fn run(&self, cancel: CancellationToken) {
        if !self.flux_installed().await {
            cancel.cancelled().await;
            return;
        }
        if let Err(e) = self.run_flux(&cancel).await {
            if !cancel.is_cancelled() {
                tracing::error!(error = %e, "failed to run module");
            }
        }
    }
}

pub struct FluxFactory {
    backends: FluxBackends,
    debounce: Duration,
}

impl FluxFactory {
    pub fn new(backends: FluxBackends, debounce: Duration) -> Self {
        Self { backends, debounce }
    }
}

impl Factory for FluxFactory {
    fn name(&self) -> &'static str {
        MODULE_NAME
    }

    fn new_module(&self, cfg: &ModuleConfig) -> Result<BuiltModule, ModuleError> {
        Ok(BuiltModule::Leader(Arc::new(FluxModule::new(
            cfg.api.for_module(MODULE_NAME),
            self.backends.clone(),
            self.debounce,
        ))))
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
