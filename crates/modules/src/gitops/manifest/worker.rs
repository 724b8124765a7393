// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use agentk_adapters::manifest::{gvk_of, is_cluster_scoped_kind, INVENTORY_LABEL};
use agentk_adapters::rpc::{GitopsClient, ObjectSource, ObjectsToSynchronizeData, PathSpec};
use agentk_adapters::{parse_manifests, split_inventory, Applier, ApplyOptions, ApplyRequest, ManifestError};
use agentk_core::{AgentConfiguration, AgentId, AttemptResult, GitRefCF, ManifestProjectCF, WorkSource};
use agentk_engine::pipeline::{self, Decoded, PipelineConfig};
use agentk_engine::{Worker, WorkerFactory};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use kube::core::TypeMeta;
use tokio_util::sync::CancellationToken;

use crate::gitops::{ObjectsScope, ObjectsWatcher, REAPPLY_INTERVAL, SYNC_BACKOFF, WATCH_BACKOFF};

pub struct ManifestWorkerFactory {
    gitops: Arc<dyn GitopsClient>,
    applier: Arc<dyn Applier>,
}

impl ManifestWorkerFactory {
    pub fn new(gitops: Arc<dyn GitopsClient>, applier: Arc<dyn Applier>) -> Self {
        Self { gitops, applier }
    }
}

impl WorkerFactory<ManifestProjectCF> for ManifestWorkerFactory {
    fn new_worker(&self, agent_id: AgentId, source: &WorkSource<ManifestProjectCF>) -> Box<dyn Worker> {
        Box::new(ManifestWorker {
            agent_id,
            project: source.config.clone(),
            gitops: Arc::clone(&self.gitops),
            applier: Arc::clone(&self.applier),
        })
    }

    fn sources_from_configuration(&self, cfg: &AgentConfiguration) -> Vec<WorkSource<ManifestProjectCF>> {
        let Some(gitops) = &cfg.gitops else {
            return Vec::new();
        };
        gitops
            .manifest_projects
            .iter()
            .map(|p| WorkSource::new(p.id.clone().unwrap_or_default(), p.clone()))
            .collect()
    }
}

/// Objects of one commit, ready to apply.
#[derive(Debug)]
pub(crate) struct SyncJob {
    commit_id: String,
    request: ApplyRequest,
}

struct ManifestWorker {
    agent_id: AgentId,
    project: ManifestProjectCF,
    gitops: Arc<dyn GitopsClient>,
    applier: Arc<dyn Applier>,
}

impl ManifestWorker {
    fn project_id(&self) -> &str {
        self.project.id.as_deref().unwrap_or_default()
    }

    fn options(&self) -> Result<ApplyOptions, String> {
        let defaults = ApplyOptions::default();
        Ok(ApplyOptions {
            reconcile_timeout: self.project.reconcile_timeout.unwrap_or(defaults.reconcile_timeout),
            dry_run: self.project.dry_run_strategy.parse().map_err(|e| format!("{e}"))?,
            prune: self.project.prune.unwrap_or(defaults.prune),
            prune_timeout: self.project.prune_timeout.unwrap_or(defaults.prune_timeout),
            prune_propagation_policy: self.project.prune_propagation_policy.parse().map_err(|e| format!("{e}"))?,
            inventory_policy: self.project.inventory_policy.parse().map_err(|e| format!("{e}"))?,
        })
    }

    fn decode(&self, options: &ApplyOptions, data: &ObjectsToSynchronizeData) -> Result<Decoded<SyncJob>, String> {
        let objects = decode_sources(&data.sources, &self.project.default_namespace)
            .map_err(|e| format!("failed to decode GitOps objects at commit {}: {e}", data.commit_id))?;
        let (inventory, objects) = match split_inventory(objects) {
            Ok(split) => split,
            Err(e) => {
                tracing::error!(
                    project_id = %self.project_id(),
                    commit_id = %data.commit_id,
                    error = %e,
                    "Failed to locate inventory object in GitOps objects"
                );
                return Ok(Decoded::Wait);
            }
        };
        let inventory = inventory.unwrap_or_else(|| {
            default_inventory(self.agent_id, data.project_id, &self.project.default_namespace)
        });
        Ok(Decoded::Job(SyncJob {
            commit_id: data.commit_id.clone(),
            request: ApplyRequest { inventory, objects, options: options.clone() },
        }))
    }

    async fn apply(&self, cancel: CancellationToken, job: Arc<SyncJob>) -> AttemptResult {
        let project_id = self.project_id();
        tracing::info!(project_id, commit_id = %job.commit_id, "Synchronizing objects");
        match self.applier.apply(&cancel, &job.request).await {
            Ok(report) => {
                tracing::info!(
                    project_id,
                    commit_id = %job.commit_id,
                    applied = report.applied,
                    pruned = report.pruned,
                    "Objects synchronized"
                );
                AttemptResult::Continue
            }
            Err(e) if e.is_cancelled() || cancel.is_cancelled() => {
                tracing::info!(project_id, commit_id = %job.commit_id, "Synchronization was canceled");
                AttemptResult::Backoff
            }
            Err(e) => {
                tracing::warn!(project_id, commit_id = %job.commit_id, error = %e, "Synchronization failed");
                AttemptResult::Backoff
            }
        }
    }
}

#[async_trait]
impl Worker for ManifestWorker {
    async fn run(&self, cancel: CancellationToken) {
        let options = match self.options() {
            Ok(options) => options,
            Err(e) => {
                tracing::error!(project_id = %self.project_id(), error = %e, "invalid manifest project configuration");
                return;
            }
        };
        let scope = ObjectsScope {
            project_id: self.project_id().to_string(),
            git_ref: GitRefCF::resolve(self.project.git_ref.as_ref()),
            paths: self.project.paths.iter().map(|p| PathSpec::Glob(p.glob.clone())).collect(),
        };
        let watcher = ObjectsWatcher::new(Arc::clone(&self.gitops), WATCH_BACKOFF.poll_config(Duration::ZERO));
        let cfg = PipelineConfig {
            decode_backoff: SYNC_BACKOFF,
            apply_backoff: SYNC_BACKOFF,
            reapply_interval: REAPPLY_INTERVAL,
        };
        let (cancel, scope, watcher, options) = (&cancel, &scope, &watcher, &options);
        pipeline::run(
            cancel,
            &cfg,
            |desired| async move {
                watcher
                    .watch(cancel, scope, |data| {
                        let desired = desired.clone();
                        async move {
                            let _ = desired.send(data).await;
                        }
                    })
                    .await;
            },
            |data: &ObjectsToSynchronizeData| self.decode(options, data),
            |job_cancel, job| self.apply(job_cancel, job),
        )
        .await;
    }
}

/// Parse all sources, defaulting the namespace of namespaced objects.
pub(crate) fn decode_sources(
    sources: &[ObjectSource],
    default_namespace: &str,
) -> Result<Vec<DynamicObject>, ManifestError> {
    let mut objects = Vec::new();
    for source in sources {
        for mut obj in parse_manifests(&source.name, &source.data)? {
            let gvk = gvk_of(&obj)?;
            if obj.metadata.namespace.is_none() && !is_cluster_scoped_kind(&gvk.group, &gvk.kind) {
                obj.metadata.namespace = Some(default_namespace.to_string());
            }
            objects.push(obj);
        }
    }
    Ok(objects)
}

/// ConfigMap inventory used when the repository does not bring its own.
pub(crate) fn default_inventory(agent_id: AgentId, project_id: i64, namespace: &str) -> DynamicObject {
    let id = format!("{agent_id}-{project_id}");
    DynamicObject {
        types: Some(TypeMeta { api_version: "v1".to_string(), kind: "ConfigMap".to_string() }),
        metadata: ObjectMeta {
            name: Some(format!("inventory-{id}")),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(INVENTORY_LABEL.to_string(), id)])),
            ..Default::default()
        },
        data: serde_json::json!({}),
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
