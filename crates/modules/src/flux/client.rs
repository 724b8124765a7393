// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Project reconciliation: a server stream of project events for every
//! project that has an indexed Receiver, turned into webhook pokes.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use agentk_adapters::rpc::{FluxClient, ReconcileProjectsRequest};
use agentk_adapters::{FluxCache, Receiver};
use agentk_core::{poll_with_backoff, AttemptResult, BackoffConfig};
use agentk_engine::{Worker, WorkerHolder};
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::trigger::ReconcileTrigger;
use super::PROJECT_ANNOTATION;

const RECONCILE_BACKOFF: BackoffConfig =
    BackoffConfig::new(Duration::from_secs(10), Duration::from_secs(300), Duration::from_secs(600), 2.0, 1.0);

/// A burst of updates is applied at most this many debounce windows after its first update.
const MAX_WAIT_WINDOWS: u32 = 10;

/// Distinct projects named by Receiver project annotations.
pub fn indexed_projects(receivers: &[Receiver]) -> BTreeSet<String> {
    receivers.iter().filter_map(|r| r.annotations.get(PROJECT_ANNOTATION).cloned()).collect()
}

/// Webhook paths of the ready Receivers of `project`.
pub fn webhook_paths(receivers: &[Receiver], project: &str) -> Vec<String> {
    receivers
        .iter()
        .filter(|r| r.annotations.get(PROJECT_ANNOTATION).map(String::as_str) == Some(project))
        .filter_map(|r| r.webhook_path.clone())
        .collect()
}

pub struct ProjectReconciler {
    client: Arc<dyn FluxClient>,
    cache: Arc<dyn FluxCache>,
    trigger: Arc<ReconcileTrigger>,
    debounce: Duration,
}

impl ProjectReconciler {
    pub fn new(
        client: Arc<dyn FluxClient>,
        cache: Arc<dyn FluxCache>,
        trigger: Arc<ReconcileTrigger>,
        debounce: Duration,
    ) -> Self {
        Self { client, cache, trigger, debounce }
    }

    /// Keep one stream open for the latest project set. Updates arriving
    /// within the debounce window are coalesced, up to a bounded wait; an
    /// equal set keeps the current stream.
    pub async fn run(&self, cancel: &CancellationToken, mut updates: mpsc::UnboundedReceiver<BTreeSet<String>>) {
        let (client, cache, trigger) = (Arc::clone(&self.client), Arc::clone(&self.cache), Arc::clone(&self.trigger));
        let mut holder = WorkerHolder::new(move |projects: &BTreeSet<String>| -> Box<dyn Worker> {
            Box::new(ReconcileProjectsWorker {
                projects: projects.clone(),
                client: Arc::clone(&client),
                cache: Arc::clone(&cache),
                trigger: Arc::clone(&trigger),
            })
        });
        let mut latest: Option<BTreeSet<String>> = None;
        let mut deadline: Option<Instant> = None;
        let mut burst_start: Option<Instant> = None;
        loop {
            let debounced = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                update = updates.recv() => match update {
                    Some(projects) => {
                        tracing::debug!(projects = ?projects, "Reconcile project update");
                        latest = Some(projects);
                        let now = Instant::now();
                        let first = *burst_start.get_or_insert(now);
                        deadline = Some((now + self.debounce).min(first + self.debounce * MAX_WAIT_WINDOWS));
                    }
                    None => break,
                },
                _ = debounced => {
                    deadline = None;
                    burst_start = None;
                    if let Some(projects) = latest.take() {
                        holder.apply_config(projects).await;
                    }
                }
            }
        }
        holder.stop_and_wait().await;
    }
}

struct ReconcileProjectsWorker {
    projects: BTreeSet<String>,
    client: Arc<dyn FluxClient>,
    cache: Arc<dyn FluxCache>,
    trigger: Arc<ReconcileTrigger>,
}

impl ReconcileProjectsWorker {
    async fn reconcile_project(&self, project: &str) {
        for path in webhook_paths(&self.cache.receivers(), project) {
            if let Err(e) = self.trigger.reconcile(&path).await {
                tracing::error!(project_id = project, error = %e, "Unable to trigger Receiver");
            }
        }
    }
}

#[async_trait]
impl Worker for ReconcileProjectsWorker {
    async fn run(&self, cancel: CancellationToken) {
        if self.projects.is_empty() {
            return;
        }
        tracing::debug!(projects = ?self.projects, "Started watching projects for reconciliation");
        let poll = RECONCILE_BACKOFF.poll_config(Duration::ZERO);
        let _ = poll_with_backoff(&cancel, &poll, || async {
            let req = ReconcileProjectsRequest { projects: self.projects.iter().cloned().collect() };
            let mut stream = match self.client.reconcile_projects(req).await {
                Ok(stream) => stream,
                Err(e) => {
                    if !e.is_canceled() {
                        tracing::error!(error = %e, "Failed to reconcile projects");
                    }
                    return AttemptResult::<()>::Backoff;
                }
            };
            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => return AttemptResult::Backoff,
                    next = stream.next() => next,
                };
                match next {
                    None => return AttemptResult::ContinueImmediately,
                    Some(Ok(event)) => self.reconcile_project(&event.project_id).await,
                    Some(Err(e)) if e.is_canceled() => {
                        tracing::debug!("ReconcileProjects request has been canceled");
                        return AttemptResult::Backoff;
                    }
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "Failed to receive project to reconcile");
                        return AttemptResult::Backoff;
                    }
                }
            }
        })
        .await;
        tracing::debug!(projects = ?self.projects, "Stopped watching projects for reconciliation");
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
