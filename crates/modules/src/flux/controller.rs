// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Keeps a Receiver and its token Secret next to every GitRepository that
//! points at this GitLab instance.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use agentk_adapters::flux::{
    GIT_REPOSITORY_API_VERSION, GIT_REPOSITORY_GROUP, GIT_REPOSITORY_KIND, RECEIVER_API_VERSION, RECEIVER_KIND,
};
use agentk_adapters::{ClusterError, FluxCache, FluxEvent, FluxObjects, GitRepository, NamespacedName, Receiver};
use agentk_core::AgentId;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use kube::api::DynamicObject;
use kube::core::TypeMeta;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::client::indexed_projects;
use super::queue::WorkQueue;
use super::{AGENT_ID_ANNOTATION, MANAGED_BY_ANNOTATION, MANAGED_BY_VALUE, PROJECT_ANNOTATION};

const OBJECT_NAME_PREFIX: &str = "gitlab-";
const RECEIVER_INTERVAL: &str = "5m0s";

#[derive(Debug, PartialEq)]
pub(crate) enum ReconcileError {
    /// Transient; the key is requeued with a delay.
    Retry(String),
    /// The object can never be reconciled as it is.
    Drop(String),
}

pub struct GitRepositoryController {
    agent_id: AgentId,
    gitlab_host: String,
    cache: Arc<dyn FluxCache>,
    objects: Arc<dyn FluxObjects>,
    index_updates: mpsc::UnboundedSender<BTreeSet<String>>,
}

impl GitRepositoryController {
    pub fn new(
        agent_id: AgentId,
        gitlab_host: String,
        cache: Arc<dyn FluxCache>,
        objects: Arc<dyn FluxObjects>,
        index_updates: mpsc::UnboundedSender<BTreeSet<String>>,
    ) -> Self {
        Self { agent_id, gitlab_host, cache, objects, index_updates }
    }

    pub async fn run(&self, cancel: &CancellationToken, mut events: mpsc::UnboundedReceiver<FluxEvent>) {
        tracing::info!("Starting GitRepository controller");
        let mut queue = WorkQueue::new();
        self.refresh_index();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(FluxEvent::GitRepository(key)) => queue.add(key),
                    Some(FluxEvent::Receiver(receiver)) => self.handle_receiver(&mut queue, &receiver),
                    None => break,
                },
                Some(key) = queue.next() => self.process(&mut queue, key).await,
            }
        }
        tracing::info!("Stopped GitRepository controller");
    }

    fn refresh_index(&self) {
        let _ = self.index_updates.send(indexed_projects(&self.cache.receivers()));
    }

    /// Requeue the GitRepository controlling `receiver`; the project index
    /// is refreshed either way.
    fn handle_receiver(&self, queue: &mut WorkQueue<NamespacedName>, receiver: &Receiver) {
        if let Some(owner) = &receiver.controller {
            let group = owner.api_version.split('/').next().unwrap_or_default();
            if group == GIT_REPOSITORY_GROUP && owner.kind == GIT_REPOSITORY_KIND {
                let key = NamespacedName::new(&receiver.namespace, &owner.name);
                if self.cache.git_repository(&key).is_some() {
                    queue.add(key);
                } else {
                    tracing::debug!(receiver = %receiver.name, namespace = %receiver.namespace, "Ignoring orphaned Receiver object");
                }
            }
        }
        self.refresh_index();
    }

    async fn process(&self, queue: &mut WorkQueue<NamespacedName>, key: NamespacedName) {
        match self.reconcile(&key).await {
            Ok(()) => {
                tracing::debug!(gitrepository = %key, "Successfully reconciled GitRepository");
                queue.forget(&key);
            }
            Err(ReconcileError::Retry(e)) => {
                tracing::error!(gitrepository = %key, error = %e, "Failed to reconcile GitRepository");
                queue.add_rate_limited(key);
            }
            Err(ReconcileError::Drop(e)) => {
                tracing::error!(gitrepository = %key, error = %e, "Failed to reconcile GitRepository");
                queue.forget(&key);
            }
        }
    }

    pub(crate) async fn reconcile(&self, key: &NamespacedName) -> Result<(), ReconcileError> {
        let Some(repo) = self.cache.git_repository(key) else {
            tracing::debug!(gitrepository = %key, "Queued GitRepository no longer exists, dropping it");
            return Ok(());
        };
        let uri: http::Uri = repo
            .url
            .parse()
            .map_err(|e| ReconcileError::Drop(format!("unable to parse GitRepository URL {:?}: {e}", repo.url)))?;
        let host = uri.host().unwrap_or_default();
        if host != self.gitlab_host {
            tracing::debug!(
                gitrepository = %key,
                gitlab_host = %self.gitlab_host,
                repository_host = host,
                "Dropping reconciliation for GitRepository that is not on configured GitLab host"
            );
            return Ok(());
        }
        let project = project_path(&uri);
        tracing::debug!(gitrepository = %key, url = %repo.url, project_id = %project, "Reconciling GitRepository");

        let secret = webhook_secret(self.agent_id, &repo);
        match self.objects.apply_secret(&secret).await {
            Ok(()) => {}
            Err(ClusterError::Conflict(_)) => {
                tracing::debug!(gitrepository = %key, "Unable to apply Secret, because there is a newer version of it available");
            }
            Err(e) => return Err(ReconcileError::Retry(format!("failed to apply Secret for Receiver: {e}"))),
        }

        let receiver = webhook_receiver(self.agent_id, &repo, &project);
        match self.objects.apply_receiver(&receiver).await {
            Ok(()) => {}
            Err(ClusterError::Conflict(_)) => {
                tracing::debug!(gitrepository = %key, "Unable to apply Receiver, because there is a newer version of it available");
            }
            Err(e) => return Err(ReconcileError::Retry(format!("failed to apply Receiver: {e}"))),
        }
        Ok(())
    }
}

/// Host of the GitLab external URL, compared against repository hosts.
pub fn gitlab_host(external_url: &str) -> Result<String, String> {
    let uri: http::Uri = external_url
        .parse()
        .map_err(|e| format!("unable to parse GitLab external URL {external_url:?}: {e}"))?;
    uri.host()
        .map(str::to_string)
        .ok_or_else(|| format!("GitLab external URL {external_url:?} has no host"))
}

/// `group/project` from a repository URL path such as `/group/project.git`.
pub(crate) fn project_path(uri: &http::Uri) -> String {
    let path = uri.path().trim_start_matches('/');
    path.strip_suffix(".git").unwrap_or(path).to_string()
}

fn object_name(repo: &GitRepository) -> String {
    format!("{OBJECT_NAME_PREFIX}{}", repo.name)
}

fn controller_ref(repo: &GitRepository) -> OwnerReference {
    OwnerReference {
        api_version: GIT_REPOSITORY_API_VERSION.to_string(),
        kind: GIT_REPOSITORY_KIND.to_string(),
        name: repo.name.clone(),
        uid: repo.uid.clone(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

fn managed_annotations(agent_id: AgentId) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_ANNOTATION.to_string(), MANAGED_BY_VALUE.to_string()),
        (AGENT_ID_ANNOTATION.to_string(), agent_id.to_string()),
    ])
}

pub(crate) fn webhook_secret(agent_id: AgentId, repo: &GitRepository) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(object_name(repo)),
            namespace: Some(repo.namespace.clone()),
            annotations: Some(managed_annotations(agent_id)),
            owner_references: Some(vec![controller_ref(repo)]),
            ..Default::default()
        },
        data: Some(BTreeMap::from([("token".to_string(), ByteString(Vec::new()))])),
        ..Default::default()
    }
}

pub(crate) fn webhook_receiver(agent_id: AgentId, repo: &GitRepository, project: &str) -> DynamicObject {
    let mut annotations = managed_annotations(agent_id);
    annotations.insert(PROJECT_ANNOTATION.to_string(), project.to_string());
    DynamicObject {
        types: Some(TypeMeta { api_version: RECEIVER_API_VERSION.to_string(), kind: RECEIVER_KIND.to_string() }),
        metadata: ObjectMeta {
            name: Some(object_name(repo)),
            namespace: Some(repo.namespace.clone()),
            annotations: Some(annotations),
            owner_references: Some(vec![controller_ref(repo)]),
            ..Default::default()
        },
        data: serde_json::json!({
            "spec": {
                "type": "generic",
                "interval": RECEIVER_INTERVAL,
                "resources": [{
                    "kind": GIT_REPOSITORY_KIND,
                    "name": repo.name,
                    "namespace": repo.namespace,
                }],
                "secretRef": { "name": object_name(repo) },
            }
        }),
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
