// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use agentk_adapters::rpc::{FakeFluxClient, ProjectEvent};
use agentk_adapters::{FakeFlux, FakeHttpClient, HttpResponse};
use std::collections::BTreeMap;

const DEBOUNCE: Duration = Duration::from_millis(500);
const RECEIVER_URL: &str = "http://webhook-receiver.flux-system.svc.cluster.local";

fn receiver(name: &str, project: &str, webhook_path: Option<&str>) -> Receiver {
    Receiver {
        namespace: "flux-system".to_string(),
        name: name.to_string(),
        annotations: BTreeMap::from([(PROJECT_ANNOTATION.to_string(), project.to_string())]),
        webhook_path: webhook_path.map(str::to_string),
        controller: None,
    }
}

fn set(projects: &[&str]) -> BTreeSet<String> {
    projects.iter().map(|p| p.to_string()).collect()
}

struct Harness {
    client: FakeFluxClient,
    http: FakeHttpClient,
    updates: mpsc::UnboundedSender<BTreeSet<String>>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl Harness {
    fn start(flux: FakeFlux) -> Self {
        let client = FakeFluxClient::new();
        let http = FakeHttpClient::new();
        let trigger = ReconcileTrigger::new(RECEIVER_URL, Arc::new(http.clone()), Arc::new(FakeHttpClient::new())).unwrap();
        let reconciler = ProjectReconciler::new(Arc::new(client.clone()), Arc::new(flux), Arc::new(trigger), DEBOUNCE);
        let (updates, updates_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { reconciler.run(&cancel, updates_rx).await }
        });
        Self { client, http, updates, cancel, task }
    }

    async fn stop(self) {
        self.cancel.cancel();
        self.task.await.unwrap();
    }
}

#[test]
fn index_holds_distinct_annotated_projects() {
    let mut unannotated = receiver("c", "x", None);
    unannotated.annotations.clear();
    let receivers = vec![receiver("a", "group/app", Some("/a")), receiver("b", "group/app", None), unannotated];
    assert_eq!(indexed_projects(&receivers), set(&["group/app"]));
    assert_eq!(webhook_paths(&receivers, "group/app"), vec!["/a".to_string()]);
    assert!(webhook_paths(&receivers, "group/other").is_empty());
}

#[tokio::test(start_paused = true)]
async fn unchanged_project_set_keeps_the_stream() {
    let h = Harness::start(FakeFlux::new());
    h.updates.send(set(&["a", "b"])).unwrap();
    h.client.wait_for_calls(1).await;
    assert_eq!(h.client.requests()[0].projects, vec!["a".to_string(), "b".to_string()]);

    h.updates.send(set(&["b", "a"])).unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.client.call_count(), 1);
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn changed_project_set_reopens_the_stream() {
    let h = Harness::start(FakeFlux::new());
    let first = h.client.push_channel();
    h.updates.send(set(&["a", "b"])).unwrap();
    h.client.wait_for_calls(1).await;

    h.updates.send(set(&["b", "c"])).unwrap();
    h.client.wait_for_calls(2).await;
    assert!(first.is_closed());
    let mut projects = h.client.requests()[1].projects.clone();
    projects.sort();
    assert_eq!(projects, vec!["b".to_string(), "c".to_string()]);
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn rapid_updates_are_coalesced() {
    let h = Harness::start(FakeFlux::new());
    h.updates.send(set(&["a"])).unwrap();
    tokio::time::sleep(DEBOUNCE / 2).await;
    h.updates.send(set(&["a", "b"])).unwrap();
    h.client.wait_for_calls(1).await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.client.call_count(), 1);
    assert_eq!(h.client.requests()[0].projects, vec!["a".to_string(), "b".to_string()]);
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn steady_updates_are_applied_within_the_max_wait() {
    let h = Harness::start(FakeFlux::new());
    let start = Instant::now();
    for i in 0..30 {
        let projects = if i % 2 == 0 { set(&["a"]) } else { set(&["a", "b"]) };
        h.updates.send(projects).unwrap();
        tokio::time::sleep(DEBOUNCE * 4 / 5).await;
        if h.client.call_count() > 0 {
            break;
        }
    }
    assert_eq!(h.client.call_count(), 1);
    assert!(start.elapsed() <= DEBOUNCE * (MAX_WAIT_WINDOWS + 1));
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn empty_project_set_opens_no_stream() {
    let h = Harness::start(FakeFlux::new());
    h.updates.send(BTreeSet::new()).unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.client.call_count(), 0);
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn project_event_triggers_ready_receivers() {
    let flux = FakeFlux::new();
    flux.upsert_receiver(receiver("gitlab-app", "group/app", Some("/hook/123")));
    flux.upsert_receiver(receiver("gitlab-pending", "group/app", None));
    flux.upsert_receiver(receiver("gitlab-other", "group/other", Some("/hook/999")));
    let h = Harness::start(flux);
    let hook = format!("{RECEIVER_URL}/hook/123");
    h.http.respond(&hook, Ok(HttpResponse { status: 200, content_type: None, body: Vec::new() }));
    let events = h.client.push_channel();
    h.updates.send(set(&["group/app", "group/other"])).unwrap();
    h.client.wait_for_calls(1).await;

    events.send(Ok(ProjectEvent { project_id: "group/app".to_string() })).unwrap();
    h.http.wait_for_calls(1).await;
    let calls = h.http.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].url, hook);
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn ended_stream_is_reopened() {
    let h = Harness::start(FakeFlux::new());
    let first = h.client.push_channel();
    h.updates.send(set(&["a"])).unwrap();
    h.client.wait_for_calls(1).await;
    drop(first);
    h.client.wait_for_calls(2).await;
    assert_eq!(h.client.requests()[1].projects, vec!["a".to_string()]);
    h.stop().await;
}
