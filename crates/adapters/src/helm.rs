// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Helm release actions.
//!
//! The release engine itself is provided by the embedder; the chart module
//! only needs to know whether a release exists and how to install or upgrade it.

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartFile {
    /// Path relative to the chart root, e.g. `templates/deployment.yaml`.
    pub name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChartMetadata {
    pub name: String,
    pub version: String,
}

/// Chart loaded from a set of files, sorted by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chart {
    files: Vec<ChartFile>,
    metadata: ChartMetadata,
}

impl Chart {
    pub fn load(mut files: Vec<ChartFile>) -> Result<Self, HelmError> {
        files.sort_by(|a, b| a.name.cmp(&b.name));
        let chart_yaml = files
            .iter()
            .find(|f| f.name == "Chart.yaml")
            .ok_or_else(|| HelmError::InvalidChart("Chart.yaml file is missing".to_string()))?;
        let metadata: ChartMetadata = serde_yaml::from_slice(&chart_yaml.data)
            .map_err(|e| HelmError::InvalidChart(format!("Chart.yaml: {e}")))?;
        Ok(Self { files, metadata })
    }

    pub fn metadata(&self) -> &ChartMetadata {
        &self.metadata
    }

    pub fn files(&self) -> &[ChartFile] {
        &self.files
    }

    /// Content digest over file names and data.
    pub fn digest(files: &[ChartFile]) -> String {
        let mut sorted: Vec<&ChartFile> = files.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));
        let mut hasher = Sha256::new();
        for f in sorted {
            hasher.update((f.name.len() as u64).to_le_bytes());
            hasher.update(f.name.as_bytes());
            hasher.update((f.data.len() as u64).to_le_bytes());
            hasher.update(&f.data);
        }
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseRequest {
    pub release_name: String,
    pub namespace: String,
    pub max_history: i32,
    pub chart: std::sync::Arc<Chart>,
    pub values: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HelmError {
    #[error("helm action canceled")]
    Cancelled,

    #[error("invalid chart: {0}")]
    InvalidChart(String),

    #[error("{action} of release {release:?} failed: {message}")]
    Action { action: &'static str, release: String, message: String },
}

impl HelmError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[async_trait]
pub trait HelmActions: Send + Sync {
    /// Whether the release has any history in `namespace`.
    async fn is_installed(&self, cancel: &CancellationToken, release: &str, namespace: &str) -> Result<bool, HelmError>;

    async fn install(&self, cancel: &CancellationToken, req: &ReleaseRequest) -> Result<(), HelmError>;

    async fn upgrade(&self, cancel: &CancellationToken, req: &ReleaseRequest) -> Result<(), HelmError>;
}

#[cfg(any(test, feature = "test-support"))]
#[cfg_attr(coverage_nightly, coverage(off))]
mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::{BTreeSet, VecDeque};
    use std::sync::Arc;
    use tokio::sync::watch;

    #[derive(Debug, Clone, PartialEq)]
    pub enum HelmCall {
        Install(ReleaseRequest),
        Upgrade(ReleaseRequest),
    }

    #[derive(Default)]
    struct FakeHelmState {
        installed: BTreeSet<(String, String)>,
        calls: Vec<HelmCall>,
        failures: VecDeque<HelmError>,
    }

    /// In-memory release store.
    #[derive(Clone)]
    pub struct FakeHelm {
        inner: Arc<Mutex<FakeHelmState>>,
        count: Arc<watch::Sender<usize>>,
    }

    impl Default for FakeHelm {
        fn default() -> Self {
            let (count, _) = watch::channel(0);
            Self { inner: Arc::default(), count: Arc::new(count) }
        }
    }

    impl FakeHelm {
        pub fn new() -> Self {
            Self::default()
        }

        /// Fail the next install or upgrade with `err`.
        pub fn push_failure(&self, err: HelmError) {
            self.inner.lock().failures.push_back(err);
        }

        pub fn calls(&self) -> Vec<HelmCall> {
            self.inner.lock().calls.clone()
        }

        pub async fn wait_for_calls(&self, n: usize) {
            let mut rx = self.count.subscribe();
            let _ = rx.wait_for(|c| *c >= n).await;
        }

        fn record(&self, call: HelmCall, req: &ReleaseRequest) -> Result<(), HelmError> {
            let result = {
                let mut inner = self.inner.lock();
                inner.calls.push(call);
                match inner.failures.pop_front() {
                    Some(err) => Err(err),
                    None => {
                        inner.installed.insert((req.namespace.clone(), req.release_name.clone()));
                        Ok(())
                    }
                }
            };
            self.count.send_modify(|c| *c += 1);
            result
        }
    }

    #[async_trait]
    impl HelmActions for FakeHelm {
        async fn is_installed(&self, _: &CancellationToken, release: &str, namespace: &str) -> Result<bool, HelmError> {
            Ok(self.inner.lock().installed.contains(&(namespace.to_string(), release.to_string())))
        }

        async fn install(&self, _: &CancellationToken, req: &ReleaseRequest) -> Result<(), HelmError> {
            self.record(HelmCall::Install(req.clone()), req)
        }

        async fn upgrade(&self, _: &CancellationToken, req: &ReleaseRequest) -> Result<(), HelmError> {
            self.record(HelmCall::Upgrade(req.clone()), req)
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeHelm, HelmCall};

#[cfg(test)]
#[path = "helm_tests.rs"]
mod tests;
