// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One reconciler lives from one full sync to the next.
//!
//! Each cycle reports workspaces the server has not seen yet, then acts on
//! the server's answer: terminated workspaces lose their namespace, the rest
//! get their namespace and configuration applied. Applies run in the
//! background and their errors are reported on the following cycle.

use std::collections::BTreeMap;
use std::sync::Arc;

use agentk_adapters::manifest::{gvk_of, is_cluster_scoped_kind, INVENTORY_LABEL};
use agentk_adapters::{parse_manifests, split_inventory, ApplyOptions, ApplyRequest, ClusterError, DeploymentCache, ManifestError};
use agentk_core::AgentId;
use agentk_engine::ModuleApi;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use kube::core::TypeMeta;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::messages::{
    ErrorDetails, ErrorType, RequestPayload, ResponsePayload, TerminationProgress, UpdateType, WorkspaceAgentInfo,
    WorkspaceRailsInfo, STATE_TERMINATED,
};
use super::trackers::{ErrorTracker, OperationState, PersistedStateTracker, TerminatedTracker, WorkspaceKey};
use super::{RemoteDevBackends, AGENT_ID_LABEL};

pub(crate) const RECONCILE_PATH: &str = "/reconcile";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum ReconcileError {
    #[error("context canceled")]
    Cancelled,

    #[error("failed to start informer: {0}")]
    Informer(ClusterError),

    #[error("error making api request: {0}")]
    Request(String),

    #[error("unexpected status code: {0}")]
    Status(u16),

    #[error("error parsing response body: {0}")]
    Parse(String),
}

impl ReconcileError {
    pub(crate) fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub(crate) struct Reconciler {
    agent_id: AgentId,
    api: ModuleApi,
    backends: RemoteDevBackends,
    cache: Arc<dyn DeploymentCache>,
    /// Stops the informer and in-flight applies.
    cancel: CancellationToken,
    full_sync_done: bool,
    persisted: PersistedStateTracker,
    terminated: TerminatedTracker,
    errors: ErrorTracker,
    version: u64,
    applies: JoinSet<()>,
}

impl Reconciler {
    /// Start a Deployment informer for this agent's workspaces.
    pub(crate) async fn start(
        parent: &CancellationToken,
        agent_id: AgentId,
        api: ModuleApi,
        backends: RemoteDevBackends,
    ) -> Result<Self, ReconcileError> {
        let cancel = parent.child_token();
        let selector = format!("{AGENT_ID_LABEL}={agent_id}");
        let cache = backends.informer.start(cancel.clone(), &selector).await.map_err(|e| match e {
            ClusterError::Cancelled => ReconcileError::Cancelled,
            e => ReconcileError::Informer(e),
        })?;
        Ok(Self {
            agent_id,
            api,
            backends,
            cache,
            cancel,
            full_sync_done: false,
            persisted: PersistedStateTracker::default(),
            terminated: TerminatedTracker::default(),
            errors: ErrorTracker::default(),
            version: 0,
            applies: JoinSet::new(),
        })
    }

    /// One reconciliation cycle. The first successful cycle is a full sync.
    pub(crate) async fn run(&mut self) -> Result<(), ReconcileError> {
        tracing::debug!("Running reconciliation loop");
        while self.applies.try_join_next().is_some() {}

        let snapshot = self.errors.snapshot();
        let infos = self.agent_infos(&snapshot);
        let update_type = if self.full_sync_done { UpdateType::Partial } else { UpdateType::Full };
        let rails_infos = self.request(update_type, infos).await?;
        for info in &rails_infos {
            self.version += 1;
            self.apply_changes(info, &snapshot, self.version).await;
        }
        self.full_sync_done = true;
        tracing::debug!("Reconciliation loop ended");
        Ok(())
    }

    pub(crate) async fn stop(mut self) {
        self.cancel.cancel();
        while self.applies.join_next().await.is_some() {}
        tracing::debug!("informer stopped");
    }

    fn agent_infos(&self, errors: &BTreeMap<WorkspaceKey, OperationState>) -> Vec<WorkspaceAgentInfo> {
        let mut infos: BTreeMap<WorkspaceKey, WorkspaceAgentInfo> = BTreeMap::new();
        for deployment in self.cache.list() {
            let name = deployment.metadata.name.clone().unwrap_or_default();
            let namespace = deployment.metadata.namespace.clone().unwrap_or_default();
            let version = deployment.metadata.resource_version.as_deref().unwrap_or_default();
            if self.persisted.is_persisted(&name, version) {
                tracing::debug!(workspace = %name, "Skipping sending workspace info. GitLab already has the latest version");
                continue;
            }
            let info = WorkspaceAgentInfo {
                name: name.clone(),
                namespace: namespace.clone(),
                latest_k8s_deployment_info: serde_json::to_value(deployment.as_ref()).ok(),
                ..Default::default()
            };
            infos.insert((name, namespace), info);
        }

        for key in self.terminated.iter() {
            tracing::debug!(workspace = %key.0, "Sending workspace info for already-terminated workspace");
            let info = infos.entry(key.clone()).or_insert_with(|| empty_info(key));
            info.terminated = true;
            info.termination_progress = Some(TerminationProgress::Terminated);
        }

        for (key, state) in errors {
            if let Some(error) = &state.error {
                let info = infos.entry(key.clone()).or_insert_with(|| empty_info(key));
                info.error_details = Some(ErrorDetails { error_type: ErrorType::Applier, error_message: error.clone() });
            }
        }
        infos.into_values().collect()
    }

    async fn request(
        &self,
        update_type: UpdateType,
        infos: Vec<WorkspaceAgentInfo>,
    ) -> Result<Vec<WorkspaceRailsInfo>, ReconcileError> {
        let payload = RequestPayload { update_type, workspace_agent_infos: infos };
        let body = serde_json::to_vec(&payload).map_err(|e| ReconcileError::Request(e.to_string()))?;
        tracing::debug!("Making GitLab request");
        let response = tokio::select! {
            _ = self.cancel.cancelled() => return Err(ReconcileError::Cancelled),
            response = self.api.make_gitlab_request("POST", RECONCILE_PATH, body) => response,
        };
        let response = response.map_err(|e| {
            if e.is_canceled() {
                ReconcileError::Cancelled
            } else {
                ReconcileError::Request(e.to_string())
            }
        })?;
        tracing::debug!(status_code = response.status, "Made request to the Rails API");
        if response.status != 201 {
            return Err(ReconcileError::Status(response.status));
        }
        let payload: ResponsePayload =
            serde_json::from_slice(&response.body).map_err(|e| ReconcileError::Parse(e.to_string()))?;
        tracing::debug!(
            payload_size = response.body.len(),
            workspace_count = payload.workspace_rails_infos.len(),
            "Read body from the Rails API"
        );
        Ok(payload.workspace_rails_infos)
    }

    async fn apply_changes(
        &mut self,
        info: &WorkspaceRailsInfo,
        reported: &BTreeMap<WorkspaceKey, OperationState>,
        version: u64,
    ) {
        self.persisted.record(&info.name, &info.deployment_resource_version);
        let key = (info.name.clone(), info.namespace.clone());
        // The error in `reported` reached the server with this request.
        if let Some(state) = reported.get(&key) {
            if state.error.is_some() {
                self.errors.delete_if_version(&key, state.version);
            }
        }
        self.errors.mark(&key, version);

        let request = match self.workspace_changes(info).await {
            Ok(Some(request)) => request,
            Ok(None) => {
                self.errors.delete_if_version(&key, version);
                return;
            }
            Err(e) => {
                tracing::warn!(workspace = %info.name, namespace = %info.namespace, error = %e, "Error when applying workspace info");
                self.errors.save_error_if_version(&key, version, e);
                return;
            }
        };

        let (applier, errors, cancel) = (Arc::clone(&self.backends.applier), self.errors.clone(), self.cancel.clone());
        self.applies.spawn(async move {
            match applier.apply(&cancel, &request).await {
                Ok(_) => errors.delete_if_version(&key, version),
                Err(e) if e.is_cancelled() => errors.delete_if_version(&key, version),
                Err(e) => {
                    let message = format!(
                        "error applying workspace config (namespace {}, workspace name {}): {e}",
                        key.1, key.0
                    );
                    tracing::warn!(workspace = %key.0, namespace = %key.1, error = %message, "Error when applying workspace info");
                    errors.save_error_if_version(&key, version, message);
                }
            }
        });
    }

    /// Cluster changes for `info`. Returns the apply to run, if any.
    async fn workspace_changes(&mut self, info: &WorkspaceRailsInfo) -> Result<Option<ApplyRequest>, String> {
        if info.desired_state == STATE_TERMINATED {
            self.handle_terminated(info)
                .await
                .map_err(|e| format!("error when handling terminated state for workspace {}: {e}", info.name))?;
            return Ok(None);
        }

        self.backends
            .namespaces
            .ensure_namespace(&info.namespace, BTreeMap::new())
            .await
            .map_err(|e| format!("error creating namespace {}: {e}", info.namespace))?;

        if info.config_to_apply.is_empty() {
            return Ok(None);
        }
        workspace_request(self.agent_id, info)
            .map(Some)
            .map_err(|e| format!("error decoding workspace config for workspace {}: {e}", info.name))
    }

    async fn handle_terminated(&mut self, info: &WorkspaceRailsInfo) -> Result<(), String> {
        let (name, namespace) = (info.name.as_str(), info.namespace.as_str());
        if self.terminated.is_terminated(name, namespace) && info.actual_state == STATE_TERMINATED {
            tracing::debug!(namespace, "ActualState=Terminated, dropping the workspace from the trackers");
            self.terminated.delete(name, namespace);
            self.persisted.delete(name);
            return Ok(());
        }

        let exists = self.backends.namespaces.namespace_exists(namespace).await.map_err(|e| e.to_string())?;
        if exists {
            tracing::debug!(namespace, "Namespace for terminated workspace still exists, deleting the namespace");
            return self
                .backends
                .namespaces
                .delete_namespace(namespace)
                .await
                .map_err(|e| format!("failed to terminate workspace by deleting namespace: {e}"));
        }

        tracing::debug!(workspace = name, "Namespace no longer exists, reporting the workspace as terminated");
        self.terminated.add(name, namespace);
        Ok(())
    }
}

fn empty_info(key: &WorkspaceKey) -> WorkspaceAgentInfo {
    WorkspaceAgentInfo { name: key.0.clone(), namespace: key.1.clone(), ..Default::default() }
}

/// Apply request for the configuration the server sent for a workspace.
pub(crate) fn workspace_request(agent_id: AgentId, info: &WorkspaceRailsInfo) -> Result<ApplyRequest, ManifestError> {
    let mut objects = parse_manifests(&info.name, info.config_to_apply.as_bytes())?;
    for obj in &mut objects {
        let gvk = gvk_of(obj)?;
        if obj.metadata.namespace.is_none() && !is_cluster_scoped_kind(&gvk.group, &gvk.kind) {
            obj.metadata.namespace = Some(info.namespace.clone());
        }
    }
    let (inventory, objects) = split_inventory(objects)?;
    let inventory = inventory.unwrap_or_else(|| workspace_inventory(agent_id, info));
    Ok(ApplyRequest { inventory, objects, options: ApplyOptions::default() })
}

fn workspace_inventory(agent_id: AgentId, info: &WorkspaceRailsInfo) -> DynamicObject {
    DynamicObject {
        types: Some(TypeMeta { api_version: "v1".to_string(), kind: "ConfigMap".to_string() }),
        metadata: ObjectMeta {
            name: Some(format!("{}-workspace-inventory", info.name)),
            namespace: Some(info.namespace.clone()),
            labels: Some(BTreeMap::from([(INVENTORY_LABEL.to_string(), format!("{agent_id}-{}", info.name))])),
            ..Default::default()
        },
        data: serde_json::json!({}),
    }
}

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod tests;
