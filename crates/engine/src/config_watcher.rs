// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Long-lived watch of the agent configuration.

use std::future::Future;
use std::sync::Arc;

use agentk_adapters::rpc::{ConfigurationClient, ConfigurationRequest};
use agentk_core::{poll_with_backoff, AgentConfiguration, AgentMeta, AttemptResult, PollConfig};
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationData {
    pub commit_id: String,
    pub config: AgentConfiguration,
}

type PreProcessor = Box<dyn Fn(&mut ConfigurationData) -> Result<(), String> + Send + Sync>;

pub struct ConfigurationWatcher {
    client: Arc<dyn ConfigurationClient>,
    agent_meta: AgentMeta,
    poll: PollConfig,
    last_commit_id: Mutex<String>,
    pre_process: Option<PreProcessor>,
}

impl ConfigurationWatcher {
    pub fn new(client: Arc<dyn ConfigurationClient>, agent_meta: AgentMeta, poll: PollConfig) -> Self {
        Self { client, agent_meta, poll, last_commit_id: Mutex::new(String::new()), pre_process: None }
    }

    /// Run `f` on every delivery before the callback. An error skips the
    /// delivery without advancing the last processed commit.
    pub fn with_pre_processor(
        mut self,
        f: impl Fn(&mut ConfigurationData) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.pre_process = Some(Box::new(f));
        self
    }

    pub fn last_commit_id(&self) -> String {
        self.last_commit_id.lock().clone()
    }

    /// Deliver each new configuration to `callback` until `cancel` fires.
    ///
    /// The callback runs inline; deliveries are not queued behind it.
    pub async fn watch<F, Fut>(&self, cancel: &CancellationToken, callback: F)
    where
        F: Fn(ConfigurationData) -> Fut,
        Fut: Future<Output = ()>,
    {
        let callback = &callback;
        let _ = poll_with_backoff(cancel, &self.poll, || async move {
            let req = ConfigurationRequest { commit_id: self.last_commit_id(), agent_meta: self.agent_meta.clone() };
            let mut stream = match self.client.get_configuration(req).await {
                Ok(stream) => stream,
                Err(e) => {
                    if !e.is_canceled() {
                        tracing::warn!(error = %e, "failed to open configuration stream");
                    }
                    return AttemptResult::<()>::Backoff;
                }
            };
            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => return AttemptResult::Backoff,
                    next = stream.next() => next,
                };
                let resp = match next {
                    None => return AttemptResult::ContinueImmediately,
                    Some(Ok(resp)) => resp,
                    Some(Err(e)) => {
                        if !e.is_canceled() {
                            tracing::warn!(error = %e, "configuration stream failed");
                        }
                        return AttemptResult::Backoff;
                    }
                };
                let mut data = ConfigurationData { commit_id: resp.commit_id, config: resp.configuration };
                if let Some(pre) = &self.pre_process {
                    if let Err(e) = pre(&mut data) {
                        tracing::error!(commit_id = %data.commit_id, error = %e, "failed to process configuration");
                        continue;
                    }
                }
                *self.last_commit_id.lock() = data.commit_id.clone();
                callback(data).await;
            }
        })
        .await;
    }
}

#[cfg(test)]
#[path = "config_watcher_tests.rs"]
mod tests;
