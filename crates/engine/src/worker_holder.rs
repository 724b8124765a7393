// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One restartable worker keyed on its configuration.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::worker_manager::Worker;

type NewWorker<C> = Box<dyn Fn(&C) -> Box<dyn Worker> + Send + Sync>;

struct Current<C> {
    config: C,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct WorkerHolder<C> {
    new_worker: NewWorker<C>,
    current: Option<Current<C>>,
}

impl<C: PartialEq> WorkerHolder<C> {
    pub fn new(new_worker: impl Fn(&C) -> Box<dyn Worker> + Send + Sync + 'static) -> Self {
        Self { new_worker: Box::new(new_worker), current: None }
    }

    pub fn config(&self) -> Option<&C> {
        self.current.as_ref().map(|c| &c.config)
    }

    /// Restart the worker unless it already runs with an equal `config`.
    /// Returns whether a new worker was started.
    pub async fn apply_config(&mut self, config: C) -> bool {
        if self.current.as_ref().is_some_and(|c| c.config == config) {
            return false;
        }
        self.stop_and_wait().await;
        let worker = (self.new_worker)(&config);
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { worker.run(cancel).await }
        });
        self.current = Some(Current { config, cancel, task });
        true
    }

    pub async fn stop_and_wait(&mut self) {
        if let Some(current) = self.current.take() {
            current.cancel.cancel();
            if let Err(e) = current.task.await {
                tracing::error!(error = %e, "worker task failed");
            }
        }
    }
}

#[cfg(test)]
#[path = "worker_holder_tests.rs"]
mod tests;
