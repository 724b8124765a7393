// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::module_api;
use agentk_adapters::rpc::{FakeGitLabApi, GitLabResponse};
use agentk_adapters::{ApplyError, FakeApplier, FakeCluster};
use k8s_openapi::api::apps::v1::Deployment;

struct Fixture {
    cluster: FakeCluster,
    applier: FakeApplier,
    gitlab: FakeGitLabApi,
    reconciler: Reconciler,
}

impl Fixture {
    async fn new() -> Self {
        let (cluster, applier, gitlab) = (FakeCluster::new(), FakeApplier::new(), FakeGitLabApi::new());
        let backends = RemoteDevBackends {
            namespaces: Arc::new(cluster.clone()),
            informer: Arc::new(cluster.clone()),
            applier: Arc::new(applier.clone()),
        };
        let reconciler =
            Reconciler::start(&CancellationToken::new(), 42, module_api(gitlab.clone()), backends).await.unwrap();
        Self { cluster, applier, gitlab, reconciler }
    }

    fn respond(&self, infos: Vec<WorkspaceRailsInfo>) {
        let body = serde_json::to_vec(&ResponsePayload { workspace_rails_infos: infos }).unwrap();
        self.gitlab.push_response(Ok(GitLabResponse { status: 201, body }));
    }

    fn sent(&self, n: usize) -> RequestPayload {
        serde_json::from_slice(&self.gitlab.requests()[n].body).unwrap()
    }

    /// Run a cycle and wait for the applies it started.
    async fn cycle(&mut self) -> Result<(), ReconcileError> {
        let result = self.reconciler.run().await;
        while self.reconciler.applies.join_next().await.is_some() {}
        result
    }
}

fn deployment(name: &str, namespace: &str, version: &str) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            resource_version: Some(version.into()),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn rails_info(name: &str, version: &str, desired: &str, actual: &str) -> WorkspaceRailsInfo {
    WorkspaceRailsInfo {
        name: name.into(),
        namespace: format!("{name}-ns"),
        deployment_resource_version: version.into(),
        desired_state: desired.into(),
        actual_state: actual.into(),
        config_to_apply: String::new(),
    }
}

const CONFIG: &str = "
apiVersion: v1
kind: ConfigMap
metadata:
  name: ws-config
---
apiVersion: v1
kind: Namespace
metadata:
  name: ws-a-ns
";

#[tokio::test]
async fn informer_selects_this_agents_workspaces() {
    let f = Fixture::new().await;
    assert_eq!(f.cluster.informer_selectors(), vec!["agent.gitlab.com/id=42".to_string()]);
}

#[tokio::test]
async fn first_cycle_is_full_then_partial() {
    let mut f = Fixture::new().await;
    f.respond(vec![]);
    f.respond(vec![]);
    f.cycle().await.unwrap();
    f.cycle().await.unwrap();

    assert_eq!(f.sent(0).update_type, UpdateType::Full);
    assert_eq!(f.sent(1).update_type, UpdateType::Partial);
    let request = &f.gitlab.requests()[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/reconcile");
}

#[tokio::test]
async fn failed_full_sync_is_retried_as_full() {
    let mut f = Fixture::new().await;
    f.gitlab.push_response(Ok(GitLabResponse { status: 500, body: Vec::new() }));
    f.respond(vec![]);
    assert_eq!(f.cycle().await.unwrap_err(), ReconcileError::Status(500));
    f.cycle().await.unwrap();
    assert_eq!(f.sent(1).update_type, UpdateType::Full);
}

#[tokio::test]
async fn request_errors_are_reported() {
    let mut f = Fixture::new().await;
    assert!(matches!(f.cycle().await.unwrap_err(), ReconcileError::Request(_)));

    f.gitlab.push_response(Ok(GitLabResponse { status: 201, body: b"not json".to_vec() }));
    assert!(matches!(f.cycle().await.unwrap_err(), ReconcileError::Parse(_)));
}

#[tokio::test]
async fn acknowledged_deployments_are_not_resent() {
    let mut f = Fixture::new().await;
    f.cluster.set_deployments(vec![deployment("ws-a", "ws-a-ns", "7")]);
    f.respond(vec![rails_info("ws-a", "7", "Running", "Running")]);
    f.respond(vec![]);
    f.respond(vec![]);

    f.cycle().await.unwrap();
    let first = f.sent(0).workspace_agent_infos;
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].name, "ws-a");
    assert_eq!(first[0].namespace, "ws-a-ns");
    assert_eq!(first[0].latest_k8s_deployment_info.as_ref().unwrap()["metadata"]["resourceVersion"], "7");

    f.cycle().await.unwrap();
    assert!(f.sent(1).workspace_agent_infos.is_empty());

    f.cluster.set_deployments(vec![deployment("ws-a", "ws-a-ns", "8")]);
    f.cycle().await.unwrap();
    assert_eq!(f.sent(2).workspace_agent_infos.len(), 1);
}

#[tokio::test]
async fn running_workspace_gets_namespace_and_config() {
    let mut f = Fixture::new().await;
    let mut info = rails_info("ws-a", "1", "Running", "Creating");
    info.config_to_apply = CONFIG.into();
    f.respond(vec![info]);
    f.cycle().await.unwrap();

    assert!(f.cluster.has_namespace("ws-a-ns"));
    let requests = f.applier.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.inventory.metadata.name.as_deref(), Some("ws-a-workspace-inventory"));
    assert_eq!(request.inventory.metadata.namespace.as_deref(), Some("ws-a-ns"));
    assert_eq!(request.objects.len(), 2);
    assert_eq!(request.objects[0].metadata.namespace.as_deref(), Some("ws-a-ns"));
    assert_eq!(request.objects[1].metadata.namespace, None);
}

#[tokio::test]
async fn workspace_without_config_applies_nothing() {
    let mut f = Fixture::new().await;
    f.respond(vec![rails_info("ws-a", "1", "Running", "Running")]);
    f.cycle().await.unwrap();
    assert!(f.cluster.has_namespace("ws-a-ns"));
    assert_eq!(f.applier.call_count(), 0);
}

#[tokio::test]
async fn apply_errors_are_reported_once() {
    let mut f = Fixture::new().await;
    f.applier.push_result(Err(ApplyError::Kube { object: "ws-config".into(), message: "denied".into() }));
    let mut info = rails_info("ws-a", "1", "Running", "Creating");
    info.config_to_apply = CONFIG.into();
    f.respond(vec![info.clone()]);
    f.respond(vec![info]);
    f.respond(vec![]);

    f.cycle().await.unwrap();
    f.cycle().await.unwrap();
    let reported = f.sent(1).workspace_agent_infos;
    assert_eq!(reported.len(), 1);
    let details = reported[0].error_details.as_ref().unwrap();
    assert_eq!(details.error_type, ErrorType::Applier);
    assert!(details.error_message.contains("denied"), "{}", details.error_message);

    f.cycle().await.unwrap();
    assert!(f.sent(2).workspace_agent_infos.is_empty());
}

#[tokio::test]
async fn invalid_config_is_reported_as_applier_error() {
    let mut f = Fixture::new().await;
    let mut info = rails_info("ws-a", "1", "Running", "Creating");
    info.config_to_apply = "kind: [".into();
    f.respond(vec![info]);
    f.respond(vec![]);
    f.cycle().await.unwrap();
    f.cycle().await.unwrap();
    assert_eq!(f.applier.call_count(), 0);
    assert!(f.sent(1).workspace_agent_infos[0].error_details.is_some());
}

#[tokio::test]
async fn terminated_workspace_round_trip() {
    let mut f = Fixture::new().await;
    f.cluster.add_namespace("ws-a-ns");
    f.cluster.set_deployments(vec![deployment("ws-a", "ws-a-ns", "1")]);

    // server asks for termination while the workspace still runs
    f.respond(vec![rails_info("ws-a", "1", STATE_TERMINATED, "Running")]);
    f.cycle().await.unwrap();
    assert_eq!(f.cluster.deleted_namespaces(), vec!["ws-a-ns".to_string()]);
    f.cluster.set_deployments(vec![]);

    // namespace is gone now
    f.respond(vec![rails_info("ws-a", "1", STATE_TERMINATED, "Running")]);
    f.cycle().await.unwrap();
    assert!(f.sent(1).workspace_agent_infos.is_empty());

    f.respond(vec![rails_info("ws-a", "1", STATE_TERMINATED, STATE_TERMINATED)]);
    f.cycle().await.unwrap();
    let reported = f.sent(2).workspace_agent_infos;
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].name, "ws-a");
    assert!(reported[0].terminated);
    assert_eq!(reported[0].termination_progress, Some(TerminationProgress::Terminated));

    f.respond(vec![]);
    f.cycle().await.unwrap();
    assert!(f.sent(3).workspace_agent_infos.is_empty());
    assert_eq!(f.cluster.deleted_namespaces().len(), 1);
}

#[test]
fn config_inventory_is_used_when_present() {
    let mut info = rails_info("ws-a", "1", "Running", "Running");
    info.config_to_apply = "
apiVersion: v1
kind: ConfigMap
metadata:
  name: own-inventory
  labels:
    cli-utils.sigs.k8s.io/inventory-id: ws-a-inv
"
    .into();
    let request = workspace_request(42, &info).unwrap();
    assert_eq!(request.inventory.metadata.name.as_deref(), Some("own-inventory"));
    assert!(request.objects.is_empty());
}
