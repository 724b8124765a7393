// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! GitOps: synchronizing plain manifests and Helm charts from repositories.

pub mod chart;
pub mod manifest;
mod watcher;

pub use watcher::{ObjectsScope, ObjectsWatcher};

use std::time::Duration;

use agentk_core::BackoffConfig;
use agentk_engine::{ConfigReceiver, WorkerManager};
use tokio_util::sync::CancellationToken;

/// Backoff of the objects-to-synchronize watch.
pub(crate) const WATCH_BACKOFF: BackoffConfig =
    BackoffConfig::new(Duration::from_secs(10), Duration::from_secs(300), Duration::from_secs(600), 2.0, 1.0);

/// Backoff shared by decode retries and failed applies.
pub(crate) const SYNC_BACKOFF: BackoffConfig =
    BackoffConfig::new(Duration::from_secs(10), Duration::from_secs(60), Duration::from_secs(120), 2.0, 1.0);

pub(crate) const REAPPLY_INTERVAL: Duration = Duration::from_secs(300);

/// Feed every configuration to `workers` until `cancel` fires or the stream
/// ends, then stop all workers.
pub(crate) async fn run_workers<C>(
    cancel: &CancellationToken,
    cfg_rx: &mut ConfigReceiver,
    workers: &mut WorkerManager<C>,
    what: &'static str,
) where
    C: Clone + PartialEq + Send + Sync + 'static,
{
    loop {
        let cfg = tokio::select! {
            _ = cancel.cancelled() => break,
            cfg = cfg_rx.recv() => cfg,
        };
        let Some(cfg) = cfg else { break };
        if let Err(e) = workers.apply_configuration(cfg.agent_id, &cfg).await {
            tracing::error!(error = %e, "Failed to apply {what} configuration");
        }
    }
    workers.stop_all_workers().await;
}
