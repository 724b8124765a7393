// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Manifest projects must have distinct ids.

use crate::prelude::*;
use agentk_adapters::rpc::FakeGitopsClient;
use agentk_adapters::FakeApplier;
use agentk_core::{GitopsCF, ManifestProjectCF};
use agentk_engine::{WorkerError, WorkerManager};
use agentk_modules::gitops::manifest::{ManifestModule, ManifestWorkerFactory};

fn project(id: &str) -> ManifestProjectCF {
    ManifestProjectCF { id: Some(id.into()), ..Default::default() }
}

#[tokio::test]
async fn duplicate_project_id_starts_no_workers() {
    let gitops = FakeGitopsClient::new();
    let applier = FakeApplier::new();
    let mut cfg = AgentConfiguration {
        agent_id: AGENT_ID,
        gitops: Some(GitopsCF { manifest_projects: vec![project("p/q"), project("p/q")], ..Default::default() }),
        ..Default::default()
    };
    ManifestModule::new(Arc::new(gitops.clone()), Arc::new(applier.clone()))
        .default_and_validate(&mut cfg)
        .unwrap();

    let factory = ManifestWorkerFactory::new(Arc::new(gitops.clone()), Arc::new(applier.clone()));
    let mut workers = WorkerManager::new(Box::new(factory));
    let err = workers.apply_configuration(AGENT_ID, &cfg).await.unwrap_err();

    assert_eq!(err, WorkerError::DuplicateSourceId("p/q".into()));
    assert_eq!(err.to_string(), "duplicate source id: p/q");
    assert!(workers.worker_ids().is_empty());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(gitops.call_count(), 0);
    assert_eq!(applier.call_count(), 0);
}
