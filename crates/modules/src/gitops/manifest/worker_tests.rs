// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use agentk_adapters::manifest::inventory_id;
use agentk_adapters::rpc::{FakeGitopsClient, RpcError};
use agentk_adapters::{ApplyError, FakeApplier};
use agentk_core::PathCF;
use tokio::sync::mpsc;

const CONFIG_MAP: &str = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: settings\ndata:\n  a: b\n";
const NAMESPACE: &str = "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: apps\n";

fn project() -> ManifestProjectCF {
    let mut p = ManifestProjectCF {
        id: Some("group/app".to_string()),
        git_ref: Some(GitRefCF::Branch("main".to_string())),
        paths: vec![PathCF { glob: "k8s/**".to_string() }],
        ..Default::default()
    };
    super::super::apply_defaults(&mut p).unwrap();
    p
}

struct Harness {
    gitops: FakeGitopsClient,
    applier: FakeApplier,
    stream: mpsc::UnboundedSender<Result<ObjectsToSynchronizeData, RpcError>>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl Harness {
    fn start(project: ManifestProjectCF) -> Self {
        let gitops = FakeGitopsClient::new();
        let stream = gitops.push_channel();
        let applier = FakeApplier::new();
        let factory = ManifestWorkerFactory::new(Arc::new(gitops.clone()), Arc::new(applier.clone()));
        let worker = factory.new_worker(5, &WorkSource::new("group/app", project));
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { worker.run(cancel).await }
        });
        Self { gitops, applier, stream, cancel, task }
    }

    fn deliver(&self, commit: &str, files: &[(&str, &str)]) {
        let sources = files
            .iter()
            .map(|(name, data)| ObjectSource { name: name.to_string(), data: data.as_bytes().to_vec() })
            .collect();
        let data = ObjectsToSynchronizeData { commit_id: commit.to_string(), project_id: 7, sources };
        self.stream.send(Ok(data)).unwrap();
    }

    async fn stop(self) {
        self.cancel.cancel();
        self.task.await.unwrap();
    }
}

#[test]
fn sources_are_keyed_by_project_id() {
    let factory = ManifestWorkerFactory::new(Arc::new(FakeGitopsClient::new()), Arc::new(FakeApplier::new()));
    let cfg = AgentConfiguration {
        gitops: Some(agentk_core::GitopsCF { manifest_projects: vec![project()], charts: Vec::new() }),
        ..Default::default()
    };
    let sources = factory.sources_from_configuration(&cfg);
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].id, "group/app");
    assert!(factory.sources_from_configuration(&AgentConfiguration::default()).is_empty());
}

#[test]
fn namespaced_objects_get_the_default_namespace() {
    let sources = vec![
        ObjectSource { name: "k8s/cm.yaml".into(), data: CONFIG_MAP.as_bytes().to_vec() },
        ObjectSource { name: "k8s/ns.yaml".into(), data: NAMESPACE.as_bytes().to_vec() },
    ];
    let objects = decode_sources(&sources, "apps").unwrap();
    assert_eq!(objects.len(), 2);
    assert_eq!(objects[0].metadata.namespace.as_deref(), Some("apps"));
    assert_eq!(objects[1].metadata.namespace, None);
}

#[test]
fn default_inventory_is_named_after_agent_and_project() {
    let inv = default_inventory(5, 7, "apps");
    assert_eq!(inv.metadata.name.as_deref(), Some("inventory-5-7"));
    assert_eq!(inv.metadata.namespace.as_deref(), Some("apps"));
    assert_eq!(inventory_id(&inv), Some("5-7"));
}

#[tokio::test(start_paused = true)]
async fn watches_the_project_and_applies_each_commit() {
    let h = Harness::start(project());
    h.deliver("c1", &[("k8s/cm.yaml", CONFIG_MAP)]);
    h.applier.wait_for_calls(1).await;

    let req = &h.gitops.requests()[0];
    assert_eq!(req.project_id, "group/app");
    assert_eq!(req.git_ref, "refs/heads/main");
    assert_eq!(req.paths, vec![PathSpec::Glob("k8s/**".to_string())]);

    let applied = &h.applier.requests()[0];
    assert_eq!(applied.inventory.metadata.name.as_deref(), Some("inventory-5-7"));
    assert_eq!(applied.objects.len(), 1);
    assert_eq!(applied.objects[0].metadata.namespace.as_deref(), Some("default"));
    assert!(applied.options.prune);
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn repository_inventory_replaces_the_default() {
    let h = Harness::start(project());
    let inventory = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: inv\n  namespace: apps\n  labels:\n    cli-utils.sigs.k8s.io/inventory-id: custom\n";
    h.deliver("c1", &[("k8s/cm.yaml", CONFIG_MAP), ("k8s/inv.yaml", inventory)]);
    h.applier.wait_for_calls(1).await;

    let applied = &h.applier.requests()[0];
    assert_eq!(inventory_id(&applied.inventory), Some("custom"));
    assert_eq!(applied.objects.len(), 1);
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn two_inventories_skip_the_commit() {
    let h = Harness::start(project());
    let inv = |name: &str| {
        format!("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {name}\n  labels:\n    cli-utils.sigs.k8s.io/inventory-id: {name}\n")
    };
    let (a, b) = (inv("a"), inv("b"));
    h.deliver("c1", &[("k8s/a.yaml", &a), ("k8s/b.yaml", &b)]);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.applier.call_count(), 0);

    h.deliver("c2", &[("k8s/cm.yaml", CONFIG_MAP)]);
    h.applier.wait_for_calls(1).await;
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failed_apply_backs_off_and_success_reapplies_after_interval() {
    let h = Harness::start(project());
    h.applier.push_result(Err(ApplyError::Kube { object: "x".into(), message: "boom".into() }));
    h.deliver("c1", &[("k8s/cm.yaml", CONFIG_MAP)]);
    h.applier.wait_for_calls(1).await;
    let failed_at = tokio::time::Instant::now();

    h.applier.wait_for_calls(2).await;
    assert!(failed_at.elapsed() >= Duration::from_secs(10));
    let succeeded_at = tokio::time::Instant::now();

    h.applier.wait_for_calls(3).await;
    assert!(succeeded_at.elapsed() >= REAPPLY_INTERVAL);
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn newer_commit_cancels_a_running_apply() {
    let h = Harness::start(project());
    h.applier.set_hang(true);
    h.deliver("c1", &[("k8s/cm.yaml", CONFIG_MAP)]);
    h.applier.wait_for_calls(1).await;

    h.applier.set_hang(false);
    h.deliver("c2", &[("k8s/ns.yaml", NAMESPACE)]);
    h.applier.wait_for_calls(2).await;
    let second = &h.applier.requests()[1];
    assert_eq!(second.objects[0].metadata.name.as_deref(), Some("apps"));
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn undecodable_commit_is_retried_until_superseded() {
    let h = Harness::start(project());
    h.deliver("c1", &[("k8s/bad.yaml", "kind: [unclosed")]);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.applier.call_count(), 0);

    h.deliver("c2", &[("k8s/cm.yaml", CONFIG_MAP)]);
    h.applier.wait_for_calls(1).await;
    h.stop().await;
}
