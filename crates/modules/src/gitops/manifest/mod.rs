// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Synchronizes plain Kubernetes manifests from repositories.
//!
//! One worker runs per configured manifest project. It watches the project's
//! files, decodes them to objects and applies them with an inventory so that
//! objects removed from the repository are pruned.

mod worker;

use std::sync::Arc;
use std::time::Duration;

use agentk_adapters::rpc::GitopsClient;
use agentk_adapters::{Applier, DryRunStrategy, InventoryPolicy, PropagationPolicy};
use agentk_core::{AgentConfiguration, ManifestProjectCF, PathCF};
use agentk_engine::{
    BuiltModule, ConfigReceiver, Factory, LeaderModule, Module, ModuleConfig, ModuleError, WorkerManager,
};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use worker::ManifestWorkerFactory;

pub const MODULE_NAME: &str = "gitops";

const DEFAULT_NAMESPACE: &str = "default";
const DEFAULT_PATH_GLOB: &str = "**/*.{yaml,yml,json}";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

/// Fill in defaults for one project and check its option strings.
pub fn apply_defaults(project: &mut ManifestProjectCF) -> Result<(), String> {
    if project.default_namespace.is_empty() {
        project.default_namespace = DEFAULT_NAMESPACE.to_string();
    }
    if project.paths.is_empty() {
        project.paths = vec![PathCF { glob: DEFAULT_PATH_GLOB.to_string() }];
    }
    project.reconcile_timeout.get_or_insert(DEFAULT_TIMEOUT);
    if project.dry_run_strategy.is_empty() {
        project.dry_run_strategy = DryRunStrategy::default().to_string();
    }
    project.dry_run_strategy.parse::<DryRunStrategy>().map_err(|e| e.to_string())?;
    project.prune.get_or_insert(true);
    project.prune_timeout.get_or_insert(DEFAULT_TIMEOUT);
    if project.prune_propagation_policy.is_empty() {
        project.prune_propagation_policy = PropagationPolicy::default().to_string();
    }
    project.prune_propagation_policy.parse::<PropagationPolicy>().map_err(|e| e.to_string())?;
    if project.inventory_policy.is_empty() {
        project.inventory_policy = InventoryPolicy::default().to_string();
    }
    project.inventory_policy.parse::<InventoryPolicy>().map_err(|e| e.to_string())?;
    Ok(())
}

pub struct ManifestModule {
    gitops: Arc<dyn GitopsClient>,
    applier: Arc<dyn Applier>,
}

impl ManifestModule {
    pub fn new(gitops: Arc<dyn GitopsClient>, applier: Arc<dyn Applier>) -> Self {
        Self { gitops, applier }
    }
}

#[async_trait]
impl Module for ManifestModule {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn default_and_validate(&self, cfg: &mut AgentConfiguration) -> Result<(), ModuleError> {
        let Some(gitops) = cfg.gitops.as_mut() else {
            return Ok(());
        };
        for project in &mut gitops.manifest_projects {
            apply_defaults(project).map_err(|e| {
                ModuleError::invalid(format!("project {}: {e}", project.id.as_deref().unwrap_or_default()))
            })?;
        }
        Ok(())
    }

    async fn run(&self, cancel: CancellationToken, mut cfg: ConfigReceiver) -> Result<(), ModuleError> {
        let factory = ManifestWorkerFactory::new(Arc::clone(&self.gitops), Arc::clone(&self.applier));
        let mut workers = WorkerManager::new(Box::new(factory));
        super::run_workers(&cancel, &mut cfg, &mut workers, "manifest projects").await;
        Ok(())
    }
}

impl LeaderModule for ManifestModule {
    fn is_runnable_configuration(&self, cfg: &AgentConfiguration) -> bool {
        cfg.gitops.as_ref().is_some_and(|g| !g.manifest_projects.is_empty())
    }
}

pub struct ManifestFactory {
    gitops: Arc<dyn GitopsClient>,
    applier: Arc<dyn Applier>,
}

impl ManifestFactory {
    pub fn new(gitops: Arc<dyn GitopsClient>, applier: Arc<dyn Applier>) -> Self {
        Self { gitops, applier }
    }
}

impl Factory for ManifestFactory {
    fn name(&self) -> &'static str {
        MODULE_NAME
    }

    fn new_module(&self, _: &ModuleConfig) -> Result<BuiltModule, ModuleError> {
        Ok(BuiltModule::Leader(Arc::new(ManifestModule::new(
            Arc::clone(&self.gitops),
            Arc::clone(&self.applier),
        ))))
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
