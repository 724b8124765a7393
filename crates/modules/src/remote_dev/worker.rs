// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use agentk_engine::{ModuleApi, Worker};
use async_trait::async_trait;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::reconciler::Reconciler;
use super::RemoteDevBackends;

/// Drives reconcilers on two timers.
///
/// The full sync timer fires at start and then every full interval; each
/// firing replaces the reconciler with a fresh one, dropping all of its
/// in-memory state. The partial sync timer runs another cycle on the current
/// reconciler.
pub(crate) struct RemoteDevWorker {
    pub(crate) api: ModuleApi,
    pub(crate) backends: RemoteDevBackends,
    pub(crate) full_sync_interval: Duration,
    pub(crate) partial_sync_interval: Duration,
}

impl RemoteDevWorker {
    async fn cycle(reconciler: &mut Reconciler, sync: &'static str) {
        if let Err(e) = reconciler.run().await {
            if !e.is_cancelled() {
                tracing::error!(sync, error = %e, "Error running reconciliation");
            }
        }
    }
}

#[async_trait]
impl Worker for RemoteDevWorker {
    async fn run(&self, cancel: CancellationToken) {
        tracing::debug!("Remote Development - starting reconciler run");
        let Ok(agent_id) = self.api.agent_id(&cancel).await else {
            return;
        };

        let mut full = tokio::time::interval(self.full_sync_interval);
        full.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut partial =
            tokio::time::interval_at(Instant::now() + self.partial_sync_interval, self.partial_sync_interval);
        partial.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut active: Option<Reconciler> = None;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = full.tick() => {
                    if let Some(previous) = active.take() {
                        previous.stop().await;
                    }
                    match Reconciler::start(&cancel, agent_id, self.api.clone(), self.backends.clone()).await {
                        Ok(mut reconciler) => {
                            Self::cycle(&mut reconciler, "full").await;
                            active = Some(reconciler);
                        }
                        Err(e) if e.is_cancelled() => break,
                        Err(e) => tracing::error!(error = %e, "Error starting reconciler"),
                    }
                    partial.reset();
                }
                _ = partial.tick() => {
                    if let Some(reconciler) = active.as_mut() {
                        Self::cycle(reconciler, "partial").await;
                    }
                }
            }
        }
        if let Some(reconciler) = active.take() {
            reconciler.stop().await;
        }
        tracing::debug!("Remote Development - reconciler run ended");
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
