// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A terminated workspace is cleaned up and reported exactly once.

use crate::prelude::*;
use agentk_adapters::rpc::{FakeGitLabApi, GitLabResponse};
use agentk_adapters::{FakeApplier, FakeCluster};
use agentk_core::RemoteDevelopmentCF;
use agentk_modules::remote_dev::messages::{
    RequestPayload, ResponsePayload, TerminationProgress, UpdateType, WorkspaceRailsInfo,
};
use agentk_modules::remote_dev::RemoteDevModule;
use agentk_modules::RemoteDevBackends;

fn ws_a(actual: &str) -> WorkspaceRailsInfo {
    WorkspaceRailsInfo {
        name: "ws-a".into(),
        namespace: "ws-a-ns".into(),
        deployment_resource_version: "1".into(),
        actual_state: actual.into(),
        desired_state: "Terminated".into(),
        config_to_apply: String::new(),
    }
}

fn respond(gitlab: &FakeGitLabApi, infos: Vec<WorkspaceRailsInfo>) {
    let body = serde_json::to_vec(&ResponsePayload { workspace_rails_infos: infos }).unwrap();
    gitlab.push_response(Ok(GitLabResponse { status: 201, body }));
}

#[tokio::test(start_paused = true)]
async fn terminated_workspace_round_trip() {
    let cluster = FakeCluster::new();
    cluster.add_namespace("ws-a-ns");
    let gitlab = FakeGitLabApi::new();
    respond(&gitlab, vec![ws_a("Running")]);
    respond(&gitlab, vec![ws_a("Running")]);
    respond(&gitlab, vec![ws_a("Terminated")]);
    respond(&gitlab, vec![]);

    let backends = RemoteDevBackends {
        namespaces: Arc::new(cluster.clone()),
        informer: Arc::new(cluster.clone()),
        applier: Arc::new(FakeApplier::new()),
    };
    let module = Arc::new(RemoteDevModule::new(module_api(gitlab.clone()), backends));
    let mut config = AgentConfiguration {
        remote_development: Some(RemoteDevelopmentCF {
            enabled: true,
            partial_sync_interval: Some(Duration::from_secs(10)),
            full_sync_interval: Some(Duration::from_secs(3600)),
        }),
        ..Default::default()
    };
    module.default_and_validate(&mut config).unwrap();

    let (mut tx, rx) = config_channel();
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let (module, cancel) = (Arc::clone(&module), cancel.clone());
        async move { module.run(cancel, rx).await }
    });
    send_config(&mut tx, config).await;

    // one full sync, then partial syncs at 10s, 20s and 30s
    tokio::time::sleep(Duration::from_secs(35)).await;

    let sent: Vec<RequestPayload> =
        gitlab.requests().iter().map(|r| serde_json::from_slice(&r.body).unwrap()).collect();
    assert_eq!(sent.len(), 4);
    assert!(gitlab.requests().iter().all(|r| r.module_name == "remote_development" && r.path == "/reconcile"));
    assert_eq!(sent[0].update_type, UpdateType::Full);
    assert_eq!(sent[1].update_type, UpdateType::Partial);

    // the namespace was deleted on the first cycle, so nothing to report yet
    assert_eq!(cluster.deleted_namespaces(), vec!["ws-a-ns".to_string()]);
    assert!(sent[1].workspace_agent_infos.is_empty());

    let reported = &sent[2].workspace_agent_infos;
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].name, "ws-a");
    assert!(reported[0].terminated);
    assert_eq!(reported[0].termination_progress, Some(TerminationProgress::Terminated));

    // both trackers dropped the workspace
    assert!(sent[3].workspace_agent_infos.is_empty());
    assert_eq!(cluster.deleted_namespaces().len(), 1);

    cancel.cancel();
    task.await.unwrap().unwrap();
    drop(tx);
}
