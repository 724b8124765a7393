// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Leader election.
//!
//! - [`lease`]: `coordination.k8s.io/v1` Lease based elector

pub mod lease;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use lease::{LeaseElector, LeaseElectorConfig};

/// Callbacks handed to [`LeaderElector::run`].
///
/// Each callback delivers one event to the consumer and waits until it is
/// accepted, so transitions are observed in order.
#[derive(Clone)]
pub struct LeaderCallbacks {
    started: mpsc::Sender<()>,
    stopped: mpsc::Sender<()>,
}

impl LeaderCallbacks {
    pub fn new(started: mpsc::Sender<()>, stopped: mpsc::Sender<()>) -> Self {
        Self { started, stopped }
    }

    pub async fn started_leading(&self) {
        let _ = self.started.send(()).await;
    }

    pub async fn stopped_leading(&self) {
        let _ = self.stopped.send(()).await;
    }
}

#[async_trait]
pub trait LeaderElector: Send + Sync {
    /// Campaign for leadership until `cancel` fires.
    ///
    /// Implementations must call [`LeaderCallbacks::stopped_leading`] when
    /// they return, even if leadership was never acquired.
    async fn run(&self, cancel: CancellationToken, callbacks: LeaderCallbacks);
}

#[cfg(any(test, feature = "test-support"))]
#[cfg_attr(coverage_nightly, coverage(off))]
mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeElectorState {
        callbacks: Option<LeaderCallbacks>,
        runs: usize,
    }

    /// Elector driven by the test through [`FakeElector::start_leading`] and
    /// [`FakeElector::stop_leading`].
    #[derive(Clone, Default)]
    pub struct FakeElector {
        inner: Arc<Mutex<FakeElectorState>>,
        running: Arc<tokio::sync::Notify>,
    }

    impl FakeElector {
        pub fn new() -> Self {
            Self::default()
        }

        /// Number of times `run` was entered.
        pub fn runs(&self) -> usize {
            self.inner.lock().runs
        }

        /// Wait until `run` has been entered.
        pub async fn wait_running(&self) {
            loop {
                let notified = self.running.notified();
                if self.inner.lock().callbacks.is_some() {
                    return;
                }
                notified.await;
            }
        }

        fn callbacks(&self) -> Option<LeaderCallbacks> {
            self.inner.lock().callbacks.clone()
        }

        pub async fn start_leading(&self) {
            self.wait_running().await;
            if let Some(cb) = self.callbacks() {
                cb.started_leading().await;
            }
        }

        pub async fn stop_leading(&self) {
            self.wait_running().await;
            if let Some(cb) = self.callbacks() {
                cb.stopped_leading().await;
            }
        }
    }

    #[async_trait]
    impl LeaderElector for FakeElector {
        async fn run(&self, cancel: CancellationToken, callbacks: LeaderCallbacks) {
            {
                let mut inner = self.inner.lock();
                inner.runs += 1;
                inner.callbacks = Some(callbacks.clone());
            }
            self.running.notify_waiters();
            cancel.cancelled().await;
            self.inner.lock().callbacks = None;
            callbacks.stopped_leading().await;
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeElector;
