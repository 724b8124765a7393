// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deduplicating work queue with per-key exponential requeue delays, driven
//! by the kube-runtime scheduler.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use futures_util::stream::{self, BoxStream, StreamExt};
use kube::runtime::scheduler::{scheduler, ScheduleRequest};
use tokio::sync::mpsc;
use tokio::time::Instant;

const BASE_DELAY: Duration = Duration::from_millis(5);
const MAX_DELAY: Duration = Duration::from_secs(1000);

/// A key is emitted once per pending schedule; rescheduling a pending key
/// keeps the earlier run time.
pub struct WorkQueue<K> {
    requests: mpsc::UnboundedSender<ScheduleRequest<K>>,
    scheduled: BoxStream<'static, K>,
    failures: HashMap<K, u32>,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    pub fn new() -> Self {
        let (requests, rx) = mpsc::unbounded_channel();
        let requests_stream = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|req| (req, rx)) });
        Self { requests, scheduled: scheduler(requests_stream).boxed(), failures: HashMap::new() }
    }

    /// Queue `key` now. A key waiting out a requeue delay is pulled forward.
    pub fn add(&mut self, key: K) {
        self.schedule(key, Instant::now());
    }

    /// Queue `key` again after a delay that doubles with every failure.
    pub fn add_rate_limited(&mut self, key: K) {
        let failures = self.failures.entry(key.clone()).or_insert(0);
        let delay = rate_limit_delay(*failures);
        *failures = failures.saturating_add(1);
        self.schedule(key, Instant::now() + delay);
    }

    /// Clear the failure history of `key`.
    pub fn forget(&mut self, key: &K) {
        self.failures.remove(key);
    }

    /// Next key that is due.
    pub async fn next(&mut self) -> Option<K> {
        self.scheduled.next().await
    }

    fn schedule(&self, message: K, run_at: Instant) {
        let _ = self.requests.send(ScheduleRequest { message, run_at });
    }
}

impl<K> Default for WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn rate_limit_delay(failures: u32) -> Duration {
    let factor = 2u32.checked_pow(failures).unwrap_or(u32::MAX);
    BASE_DELAY.saturating_mul(factor).min(MAX_DELAY)
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
