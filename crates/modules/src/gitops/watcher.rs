// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Long-lived watch of the files a GitOps worker synchronizes.

use std::future::Future;
use std::sync::Arc;

use agentk_adapters::rpc::{GitopsClient, ObjectsToSynchronizeData, ObjectsToSynchronizeRequest, PathSpec};
use agentk_core::{poll_with_backoff, AttemptResult, PollConfig};
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// What to watch: a project at a ref, restricted to some paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectsScope {
    pub project_id: String,
    pub git_ref: String,
    pub paths: Vec<PathSpec>,
}

pub struct ObjectsWatcher {
    client: Arc<dyn GitopsClient>,
    poll: PollConfig,
}

impl ObjectsWatcher {
    pub fn new(client: Arc<dyn GitopsClient>, poll: PollConfig) -> Self {
        Self { client, poll }
    }

    /// Deliver every new commit of `scope` to `callback` until `cancel` fires.
    ///
    /// Reconnects pass the last delivered commit so the server only answers
    /// once something changed.
    pub async fn watch<F, Fut>(&self, cancel: &CancellationToken, scope: &ObjectsScope, callback: F)
    where
        F: Fn(ObjectsToSynchronizeData) -> Fut,
        Fut: Future<Output = ()>,
    {
        let last_commit_id = Mutex::new(String::new());
        let last_commit_id = &last_commit_id;
        let callback = &callback;
        let _ = poll_with_backoff(cancel, &self.poll, || async move {
            let req = ObjectsToSynchronizeRequest {
                project_id: scope.project_id.clone(),
                git_ref: scope.git_ref.clone(),
                commit_id: last_commit_id.lock().clone(),
                paths: scope.paths.clone(),
            };
            let mut stream = match self.client.objects_to_synchronize(req).await {
                Ok(stream) => stream,
                Err(e) => {
                    if !e.is_canceled() {
                        tracing::warn!(project_id = %scope.project_id, error = %e, "failed to open objects stream");
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
                    Some(Ok(data)) => {
                        *last_commit_id.lock() = data.commit_id.clone();
                        callback(data).await;
                    }
                    Some(Err(e)) => {
                        if !e.is_canceled() {
                            tracing::warn!(project_id = %scope.project_id, error = %e, "objects stream failed");
                        }
                        return AttemptResult::Backoff;
                    }
                }
            }
        })
        .await;
    }
}

#[cfg(test)]
#[path = "watcher_tests.rs"]
mod tests;
