// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconciler memory between cycles.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

/// Workspace identity: `(name, namespace)`.
pub(crate) type WorkspaceKey = (String, String);

/// Deployment resource versions the server has acknowledged, by workspace name.
#[derive(Debug, Default)]
pub(crate) struct PersistedStateTracker {
    versions: HashMap<String, String>,
}

impl PersistedStateTracker {
    pub(crate) fn is_persisted(&self, name: &str, resource_version: &str) -> bool {
        self.versions.get(name).is_some_and(|v| v == resource_version)
    }

    pub(crate) fn record(&mut self, name: &str, resource_version: &str) {
        self.versions.insert(name.to_string(), resource_version.to_string());
    }

    pub(crate) fn delete(&mut self, name: &str) {
        self.versions.remove(name);
    }
}

/// Workspaces whose namespace is gone but whose termination the server has
/// not confirmed yet.
#[derive(Debug, Default)]
pub(crate) struct TerminatedTracker {
    entries: BTreeSet<WorkspaceKey>,
}

impl TerminatedTracker {
    pub(crate) fn add(&mut self, name: &str, namespace: &str) {
        self.entries.insert((name.to_string(), namespace.to_string()));
    }

    pub(crate) fn is_terminated(&self, name: &str, namespace: &str) -> bool {
        self.entries.contains(&(name.to_string(), namespace.to_string()))
    }

    pub(crate) fn delete(&mut self, name: &str, namespace: &str) {
        self.entries.remove(&(name.to_string(), namespace.to_string()));
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &WorkspaceKey> {
        self.entries.iter()
    }
}

/// State of the latest asynchronous operation on a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OperationState {
    pub(crate) version: u64,
    /// `None` while the operation is running or after it succeeded.
    pub(crate) error: Option<String>,
}

/// Errors of asynchronous applies, keyed by workspace.
///
/// Every operation carries a version from a monotonic counter. Writes for a
/// version older than the tracked one are dropped, so a slow earlier apply can
/// never overwrite the outcome of a later one.
#[derive(Debug, Clone, Default)]
pub(crate) struct ErrorTracker {
    store: Arc<Mutex<HashMap<WorkspaceKey, OperationState>>>,
}

impl ErrorTracker {
    /// Start tracking `version` unless a newer version is already tracked.
    pub(crate) fn mark(&self, key: &WorkspaceKey, version: u64) {
        let mut store = self.store.lock();
        if store.get(key).is_some_and(|s| s.version > version) {
            return;
        }
        store.insert(key.clone(), OperationState { version, error: None });
    }

    /// Record `error` if `version` is still the tracked one.
    pub(crate) fn save_error_if_version(&self, key: &WorkspaceKey, version: u64, error: String) {
        let mut store = self.store.lock();
        if let Some(state) = store.get_mut(key) {
            if state.version == version {
                state.error = Some(error);
            }
        }
    }

    pub(crate) fn delete_if_version(&self, key: &WorkspaceKey, version: u64) {
        let mut store = self.store.lock();
        if store.get(key).is_some_and(|s| s.version == version) {
            store.remove(key);
        }
    }

    pub(crate) fn snapshot(&self) -> BTreeMap<WorkspaceKey, OperationState> {
        self.store.lock().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

#[cfg(test)]
#[path = "trackers_tests.rs"]
mod tests;
