// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The project event stream follows the set of indexed receivers.

use std::collections::BTreeMap;

use crate::prelude::*;
use agentk_adapters::flux::{GIT_REPOSITORY_CRD, RECEIVER_CRD};
use agentk_adapters::rpc::{FakeFluxClient, FakeGitLabApi};
use agentk_adapters::{FakeCluster, FakeFlux, FakeHttpClient, NamespacedName, Receiver};
use agentk_modules::flux::{FluxModule, DEFAULT_DEBOUNCE};
use agentk_modules::FluxBackends;

fn receiver(name: &str, project: &str) -> Receiver {
    Receiver {
        namespace: "flux-system".into(),
        name: name.into(),
        annotations: BTreeMap::from([("agent.gitlab.com/project".to_string(), project.to_string())]),
        webhook_path: Some(format!("/hook/{name}")),
        controller: None,
    }
}

struct Harness {
    flux: FakeFlux,
    client: FakeFluxClient,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<Result<(), ModuleError>>,
    _config: ConfigSender,
}

impl Harness {
    async fn start(flux: FakeFlux, client: FakeFluxClient) -> Self {
        let cluster = FakeCluster::new();
        cluster.add_crd(GIT_REPOSITORY_CRD);
        cluster.add_crd(RECEIVER_CRD);
        let backends = FluxBackends {
            crds: Arc::new(cluster),
            informers: Arc::new(flux.clone()),
            objects: Arc::new(flux.clone()),
            client: Arc::new(client.clone()),
            http: Arc::new(FakeHttpClient::new()),
            kube_proxy: Arc::new(FakeHttpClient::new()),
        };
        let module = Arc::new(FluxModule::new(module_api(FakeGitLabApi::new()), backends, DEFAULT_DEBOUNCE));
        let mut config = AgentConfiguration::default();
        module.default_and_validate(&mut config).unwrap();

        let (mut tx, rx) = config_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let (module, cancel) = (Arc::clone(&module), cancel.clone());
            async move { module.run(cancel, rx).await }
        });
        send_config(&mut tx, config).await;
        Self { flux, client, cancel, task, _config: tx }
    }

    fn projects(&self, call: usize) -> Vec<String> {
        let mut projects = self.client.requests()[call].projects.clone();
        projects.sort();
        projects
    }

    async fn stop(self) {
        self.cancel.cancel();
        self.task.await.unwrap().unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn unchanged_index_keeps_the_stream() {
    let flux = FakeFlux::new();
    flux.upsert_receiver(receiver("gitlab-a", "a"));
    flux.upsert_receiver(receiver("gitlab-b", "b"));
    let h = Harness::start(flux, FakeFluxClient::new()).await;
    h.client.wait_for_calls(1).await;
    assert_eq!(h.projects(0), vec!["a", "b"]);

    // a receiver update that leaves the project set as it was
    h.flux.upsert_receiver(receiver("gitlab-a", "a"));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.client.call_count(), 1);
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn changed_index_replaces_the_stream() {
    let flux = FakeFlux::new();
    flux.upsert_receiver(receiver("gitlab-a", "a"));
    flux.upsert_receiver(receiver("gitlab-b", "b"));
    let client = FakeFluxClient::new();
    let first = client.push_channel();
    let h = Harness::start(flux, client).await;
    h.client.wait_for_calls(1).await;

    h.flux.delete_receiver(&NamespacedName::new("flux-system", "gitlab-a"));
    h.flux.upsert_receiver(receiver("gitlab-c", "c"));
    h.client.wait_for_calls(2).await;

    assert!(first.is_closed(), "the previous stream must be cancelled");
    assert_eq!(h.projects(1), vec!["b", "c"]);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.client.call_count(), 2);
    h.stop().await;
}
