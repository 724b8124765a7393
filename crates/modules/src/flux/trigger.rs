// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pokes Flux Receiver webhooks.

use std::sync::{Arc, LazyLock};

use agentk_adapters::HttpClient;
use regex::Regex;

/// Largest response body read back from a webhook.
const DRAIN_LIMIT: usize = 8 * 1024;

/// Service proxy paths are sent through the Kubernetes API server.
#[allow(clippy::expect_used)]
static KUBE_PROXY_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("/api/v1/namespaces/[^/]+/services/[^/]+/proxy").expect("constant regex pattern is valid")
});

pub struct ReconcileTrigger {
    base_url: String,
    http: Arc<dyn HttpClient>,
}

impl ReconcileTrigger {
    /// Pick the transport for the configured receiver URL.
    pub fn new(
        receiver_url: &str,
        default_http: Arc<dyn HttpClient>,
        kube_proxy: Arc<dyn HttpClient>,
    ) -> Result<Self, String> {
        if let Some(m) = KUBE_PROXY_PATH.find(receiver_url) {
            return Ok(Self { base_url: receiver_url[m.start()..].to_string(), http: kube_proxy });
        }
        let uri: http::Uri = receiver_url
            .parse()
            .map_err(|e| format!("invalid webhook receiver URL {receiver_url:?}: {e}"))?;
        if uri.scheme().is_none() || uri.host().is_none() {
            return Err(format!("invalid webhook receiver URL {receiver_url:?}: absolute URL required"));
        }
        Ok(Self { base_url: receiver_url.to_string(), http: default_http })
    }

    pub fn url_for(&self, webhook_path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), webhook_path.trim_start_matches('/'))
    }

    pub async fn reconcile(&self, webhook_path: &str) -> Result<(), String> {
        let url = self.url_for(webhook_path);
        let resp = self.http.post_empty(&url, DRAIN_LIMIT).await.map_err(|e| e.to_string())?;
        if resp.status != 200 {
            return Err(format!("trigger to {url:?} returned status {:?}", status_text(resp.status)));
        }
        Ok(())
    }
}

fn status_text(status: u16) -> String {
    match http::StatusCode::from_u16(status).ok().and_then(|s| s.canonical_reason()) {
        Some(reason) => format!("{status} {reason}"),
        None => status.to_string(),
    }
}

#[cfg(test)]
#[path = "trigger_tests.rs"]
mod tests;
