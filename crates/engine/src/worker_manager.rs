// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Keeps one worker running per work source found in the configuration.

use std::collections::{BTreeMap, BTreeSet};

use agentk_core::{AgentConfiguration, AgentId, WorkSource};
use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait Worker: Send + Sync {
    /// Run until `cancel` fires.
    async fn run(&self, cancel: CancellationToken);
}

pub trait WorkerFactory<C>: Send + Sync {
    fn new_worker(&self, agent_id: AgentId, source: &WorkSource<C>) -> Box<dyn Worker>;

    fn sources_from_configuration(&self, cfg: &AgentConfiguration) -> Vec<WorkSource<C>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    #[error("duplicate source id: {0}")]
    DuplicateSourceId(String),
}

struct RunningWorker<C> {
    source: WorkSource<C>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct WorkerManager<C> {
    factory: Box<dyn WorkerFactory<C>>,
    workers: BTreeMap<String, RunningWorker<C>>,
}

impl<C: Clone + PartialEq + Send + Sync + 'static> WorkerManager<C> {
    pub fn new(factory: Box<dyn WorkerFactory<C>>) -> Self {
        Self { factory, workers: BTreeMap::new() }
    }

    pub fn worker_ids(&self) -> Vec<String> {
        self.workers.keys().cloned().collect()
    }

    /// Reconcile running workers with the sources in `cfg`.
    ///
    /// Unchanged sources keep their worker. Changed and removed sources are
    /// stopped, and every stop completes before any new worker starts.
    pub async fn apply_configuration(&mut self, agent_id: AgentId, cfg: &AgentConfiguration) -> Result<(), WorkerError> {
        let sources = self.factory.sources_from_configuration(cfg);
        let mut seen: BTreeSet<String> = BTreeSet::new();
        for source in &sources {
            if !seen.insert(source.id.clone()) {
                return Err(WorkerError::DuplicateSourceId(source.id.clone()));
            }
        }

        let mut to_stop = Vec::new();
        let mut to_start = Vec::new();
        for source in sources {
            match self.workers.get(&source.id) {
                None => to_start.push(source),
                Some(current) if current.source == source => {}
                Some(_) => {
                    tracing::info!(worker_id = %source.id, "Configuration has been updated, restarting worker");
                    if let Some(old) = self.workers.remove(&source.id) {
                        to_stop.push(old);
                    }
                    to_start.push(source);
                }
            }
        }
        let stale: Vec<String> = self.workers.keys().filter(|id| !seen.contains(*id)).cloned().collect();
        for id in stale {
            if let Some(old) = self.workers.remove(&id) {
                tracing::info!(worker_id = %id, "Stopping worker");
                to_stop.push(old);
            }
        }

        stop_and_wait(to_stop).await;

        for source in to_start {
            tracing::info!(worker_id = %source.id, "Starting worker");
            let worker = self.factory.new_worker(agent_id, &source);
            let cancel = CancellationToken::new();
            let task = tokio::spawn({
                let cancel = cancel.clone();
                async move { worker.run(cancel).await }
            });
            self.workers.insert(source.id.clone(), RunningWorker { source, cancel, task });
        }
        Ok(())
    }

    pub async fn stop_all_workers(&mut self) {
        let all = std::mem::take(&mut self.workers).into_values().collect();
        stop_and_wait(all).await;
    }
}

/// Cancel every worker first, then wait for each in order.
async fn stop_and_wait<C>(workers: Vec<RunningWorker<C>>) {
    for w in &workers {
        w.cancel.cancel();
    }
    for w in workers {
        tracing::info!(worker_id = %w.source.id, "Waiting for worker to stop");
        if let Err(e) = w.task.await {
            tracing::error!(worker_id = %w.source.id, error = %e, "worker task failed");
        }
    }
}

#[cfg(test)]
#[path = "worker_manager_tests.rs"]
mod tests;
