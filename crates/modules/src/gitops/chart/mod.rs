// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Installs and upgrades Helm charts stored in repositories.
//!
//! One worker runs per release. It gathers the chart and every values source,
//! merges the values in declaration order and installs or upgrades the
//! release whenever any of them changes.

mod values;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use agentk_adapters::rpc::GitopsClient;
use agentk_adapters::{HelmActions, HttpClient};
use agentk_core::{AgentConfiguration, ChartCF, ChartSourceCF, ChartValuesCF};
use agentk_engine::{
    BuiltModule, ConfigReceiver, Factory, LeaderModule, Module, ModuleConfig, ModuleError, WorkerManager,
};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use values::merge_values;
pub use worker::ChartWorkerFactory;

pub const MODULE_NAME: &str = "gitops_chart";

const DEFAULT_NAMESPACE: &str = "default";
const DEFAULT_MAX_HISTORY: i32 = 1;
const DEFAULT_URL_POLL_PERIOD: Duration = Duration::from_secs(60);
const DEFAULT_URL_MAX_FILE_SIZE: u32 = 1024 * 1024;

pub fn apply_defaults(chart: &mut ChartCF) -> Result<(), String> {
    chart.namespace.get_or_insert_with(|| DEFAULT_NAMESPACE.to_string());
    chart.max_history.get_or_insert(DEFAULT_MAX_HISTORY);
    let ChartSourceCF::Project(project) = &chart.source;
    for value in &mut chart.values {
        match value {
            ChartValuesCF::File(file) => {
                if file.project_id.is_none() {
                    if project.id.is_empty() {
                        return Err(format!(
                            "from_file {:?} values must have project id specified when not fetching chart from a project",
                            file.file
                        ));
                    }
                    file.project_id = Some(project.id.clone());
                }
                if file.git_ref.is_none() {
                    file.git_ref.clone_from(&project.git_ref);
                }
            }
            ChartValuesCF::Url(url) => {
                url.poll_period.get_or_insert(DEFAULT_URL_POLL_PERIOD);
                url.max_file_size.get_or_insert(DEFAULT_URL_MAX_FILE_SIZE);
            }
            ChartValuesCF::Inline(_) => {}
        }
    }
    Ok(())
}

pub struct ChartModule {
    gitops: Arc<dyn GitopsClient>,
    helm: Arc<dyn HelmActions>,
    http: Arc<dyn HttpClient>,
}

impl ChartModule {
    pub fn new(gitops: Arc<dyn GitopsClient>, helm: Arc<dyn HelmActions>, http: Arc<dyn HttpClient>) -> Self {
        Self { gitops, helm, http }
    }
}

#[async_trait]
impl Module for ChartModule {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn default_and_validate(&self, cfg: &mut AgentConfiguration) -> Result<(), ModuleError> {
        let Some(gitops) = cfg.gitops.as_mut() else {
            return Ok(());
        };
        for chart in &mut gitops.charts {
            apply_defaults(chart).map_err(|e| ModuleError::invalid(format!("chart {}: {e}", chart.release_name)))?;
        }
        Ok(())
    }

    async fn run(&self, cancel: CancellationToken, mut cfg: ConfigReceiver) -> Result<(), ModuleError> {
        let factory =
            ChartWorkerFactory::new(Arc::clone(&self.gitops), Arc::clone(&self.helm), Arc::clone(&self.http));
        let mut workers = WorkerManager::new(Box::new(factory));
        super::run_workers(&cancel, &mut cfg, &mut workers, "chart synchronization").await;
        Ok(())
    }
}

impl LeaderModule for ChartModule {
    fn is_runnable_configuration(&self, cfg: &AgentConfiguration) -> bool {
        cfg.gitops.as_ref().is_some_and(|g| !g.charts.is_empty())
    }
}

pub struct ChartFactory {
    gitops: Arc<dyn GitopsClient>,
    helm: Arc<dyn HelmActions>,
    http: Arc<dyn HttpClient>,
}

impl ChartFactory {
    pub fn new(gitops: Arc<dyn GitopsClient>, helm: Arc<dyn HelmActions>, http: Arc<dyn HttpClient>) -> Self {
        Self { gitops, helm, http }
    }
}

impl Factory for ChartFactory {
    fn name(&self) -> &'static str {
        MODULE_NAME
    }

    fn new_module(&self, _: &ModuleConfig) -> Result<BuiltModule, ModuleError> {
        Ok(BuiltModule::Leader(Arc::new(ChartModule::new(
            Arc::clone(&self.gitops),
            Arc::clone(&self.helm),
            Arc::clone(&self.http),
        ))))
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
