// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use agentk_adapters::{FakeHttpClient, HttpResponse};

const SERVICE_URL: &str = "http://webhook-receiver.flux-system.svc.cluster.local";

fn clients() -> (FakeHttpClient, FakeHttpClient) {
    (FakeHttpClient::new(), FakeHttpClient::new())
}

#[tokio::test]
async fn posts_to_the_service_url() {
    let (default_http, proxy) = clients();
    default_http.respond(
        &format!("{SERVICE_URL}/hook/abc"),
        Ok(HttpResponse { status: 200, content_type: None, body: Vec::new() }),
    );
    let trigger = ReconcileTrigger::new(SERVICE_URL, Arc::new(default_http.clone()), Arc::new(proxy.clone())).unwrap();
    trigger.reconcile("/hook/abc").await.unwrap();

    let calls = default_http.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, "POST");
    assert!(proxy.calls().is_empty());
}

#[yare::parameterized(
    bare_path = { "/api/v1/namespaces/flux-system/services/webhook-receiver:80/proxy" },
    full_url = { "https://kube.local/api/v1/namespaces/flux-system/services/webhook-receiver:80/proxy" },
)]
fn kube_proxy_urls_go_through_the_api_server(url: &str) {
    let (default_http, proxy) = clients();
    let trigger = ReconcileTrigger::new(url, Arc::new(default_http), Arc::new(proxy)).unwrap();
    assert_eq!(
        trigger.url_for("/hook/abc"),
        "/api/v1/namespaces/flux-system/services/webhook-receiver:80/proxy/hook/abc"
    );
}

#[tokio::test]
async fn kube_proxy_trigger_uses_the_proxy_client() {
    let (default_http, proxy) = clients();
    let base = "/api/v1/namespaces/flux-system/services/webhook-receiver/proxy";
    proxy.respond(&format!("{base}/hook/x"), Ok(HttpResponse { status: 200, content_type: None, body: Vec::new() }));
    let trigger = ReconcileTrigger::new(base, Arc::new(default_http.clone()), Arc::new(proxy.clone())).unwrap();
    trigger.reconcile("hook/x").await.unwrap();
    assert_eq!(proxy.calls().len(), 1);
    assert!(default_http.calls().is_empty());
}

#[tokio::test]
async fn non_ok_status_is_an_error() {
    let (default_http, proxy) = clients();
    let trigger = ReconcileTrigger::new(SERVICE_URL, Arc::new(default_http), Arc::new(proxy)).unwrap();
    let err = trigger.reconcile("/hook/missing").await.unwrap_err();
    assert_eq!(err, format!("trigger to \"{SERVICE_URL}/hook/missing\" returned status \"404 Not Found\""));
}

#[test]
fn relative_url_without_proxy_path_is_rejected() {
    let (default_http, proxy) = clients();
    assert!(ReconcileTrigger::new("webhook-receiver", Arc::new(default_http), Arc::new(proxy)).is_err());
}
