// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Applying sets of Kubernetes objects tracked by an inventory.
//!
//! An apply request carries the desired objects and the inventory object that
//! records what a previous apply created. Objects that were in the inventory
//! but are no longer desired are pruned.

mod ssa;

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::DynamicObject;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::manifest::ManifestError;

pub use ssa::ServerSideApplier;

/// Option value that does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {what}: {value:?}")]
pub struct InvalidOption {
    pub what: &'static str,
    pub value: String,
}

macro_rules! option_enum {
    ($name:ident, $what:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub enum $name {
            #[default]
            $($variant),+
        }

        agentk_core::simple_display! {
            $name {
                $($variant => $text),+
            }
        }

        impl FromStr for $name {
            type Err = InvalidOption;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(InvalidOption { what: $what, value: s.to_string() }),
                }
            }
        }
    };
}

option_enum!(DryRunStrategy, "dry-run strategy", {
    None => "none",
    Client => "client",
    Server => "server",
});

option_enum!(PropagationPolicy, "prune propagation policy", {
    Foreground => "foreground",
    Background => "background",
    Orphan => "orphan",
});

option_enum!(InventoryPolicy, "inventory policy", {
    MustMatch => "must_match",
    AdoptIfNoInventory => "adopt_if_no_inventory",
    AdoptAll => "adopt_all",
});

#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOptions {
    pub reconcile_timeout: Duration,
    pub dry_run: DryRunStrategy,
    pub prune: bool,
    pub prune_timeout: Duration,
    pub prune_propagation_policy: PropagationPolicy,
    pub inventory_policy: InventoryPolicy,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            reconcile_timeout: Duration::from_secs(3600),
            dry_run: DryRunStrategy::None,
            prune: true,
            prune_timeout: Duration::from_secs(3600),
            prune_propagation_policy: PropagationPolicy::Foreground,
            inventory_policy: InventoryPolicy::MustMatch,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApplyRequest {
    pub inventory: DynamicObject,
    pub objects: Vec<DynamicObject>,
    pub options: ApplyOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: usize,
    pub pruned: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("apply canceled")]
    Cancelled,

    #[error("apply timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    InvalidObject(#[from] ManifestError),

    #[error("unknown resource type {gvk}: {message}")]
    Discovery { gvk: String, message: String },

    #[error("{object} is owned by inventory {owner:?}; inventory policy forbids adopting it")]
    InventoryConflict { object: String, owner: String },

    #[error("{object}: {message}")]
    Kube { object: String, message: String },
}

impl ApplyError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[async_trait]
pub trait Applier: Send + Sync {
    /// Apply `req`, returning once every object is written and stale
    /// inventory members are pruned.
    async fn apply(&self, cancel: &CancellationToken, req: &ApplyRequest) -> Result<ApplyReport, ApplyError>;
}

#[cfg(any(test, feature = "test-support"))]
#[cfg_attr(coverage_nightly, coverage(off))]
mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use tokio::sync::watch;

    #[derive(Default)]
    struct FakeApplierState {
        requests: Vec<ApplyRequest>,
        results: VecDeque<Result<ApplyReport, ApplyError>>,
        hang: bool,
    }

    /// Records apply requests. Scripted results are returned first, then
    /// success. While hanging, calls block until cancelled.
    #[derive(Clone)]
    pub struct FakeApplier {
        inner: Arc<Mutex<FakeApplierState>>,
        calls: Arc<watch::Sender<usize>>,
    }

    impl Default for FakeApplier {
        fn default() -> Self {
            let (calls, _) = watch::channel(0);
            Self { inner: Arc::default(), calls: Arc::new(calls) }
        }
    }

    impl FakeApplier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_result(&self, result: Result<ApplyReport, ApplyError>) {
            self.inner.lock().results.push_back(result);
        }

        pub fn set_hang(&self, hang: bool) {
            self.inner.lock().hang = hang;
        }

        pub fn requests(&self) -> Vec<ApplyRequest> {
            self.inner.lock().requests.clone()
        }

        pub fn call_count(&self) -> usize {
            *self.calls.borrow()
        }

        pub async fn wait_for_calls(&self, n: usize) {
            let mut rx = self.calls.subscribe();
            let _ = rx.wait_for(|count| *count >= n).await;
        }
    }

    #[async_trait]
    impl Applier for FakeApplier {
        async fn apply(&self, cancel: &CancellationToken, req: &ApplyRequest) -> Result<ApplyReport, ApplyError> {
            let (result, hang) = {
                let mut inner = self.inner.lock();
                inner.requests.push(req.clone());
                (inner.results.pop_front(), inner.hang)
            };
            self.calls.send_modify(|count| *count += 1);
            if hang {
                cancel.cancelled().await;
                return Err(ApplyError::Cancelled);
            }
            result.unwrap_or_else(|| Ok(ApplyReport { applied: req.objects.len(), pruned: 0 }))
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeApplier;

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
