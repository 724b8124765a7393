// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Set-once cell readable before or after it is set.

use std::fmt::Debug;

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueHolderError {
    #[error("value is already set to a different value: old {old}, new {new}")]
    AlreadySet { old: String, new: String },

    #[error("context canceled")]
    Cancelled,
}

impl From<crate::Cancelled> for ValueHolderError {
    fn from(_: crate::Cancelled) -> Self {
        Self::Cancelled
    }
}

/// Single-slot cell: set at most once to a real value, read blocking.
///
/// Used for the agent id, the server's external URL and leader-module
/// registration ids. Concurrent `set` calls are not coordinated beyond the
/// watch channel's internal lock.
pub struct ValueHolder<T> {
    slot: watch::Sender<Option<T>>,
}

impl<T> Default for ValueHolder<T> {
    fn default() -> Self {
        let (slot, _) = watch::channel(None);
        Self { slot }
    }
}

impl<T: Clone + PartialEq + Debug> ValueHolder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` if unset. Setting the same value again is a no-op.
    pub fn set(&self, value: T) -> Result<(), ValueHolderError> {
        let mut result = Ok(());
        self.slot.send_if_modified(|slot| match slot {
            None => {
                *slot = Some(value);
                true
            }
            Some(old) if *old == value => false,
            Some(old) => {
                result = Err(ValueHolderError::AlreadySet {
                    old: format!("{old:?}"),
                    new: format!("{value:?}"),
                });
                false
            }
        });
        result
    }

    /// Block until the value is set or `cancel` fires.
    pub async fn get(&self, cancel: &CancellationToken) -> Result<T, ValueHolderError> {
        let mut rx = self.slot.subscribe();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ValueHolderError::Cancelled),
            res = rx.wait_for(Option::is_some) => {
                // The sender lives in `self`, so the channel cannot close here.
                res.ok().and_then(|v| v.as_ref().cloned()).ok_or(ValueHolderError::Cancelled)
            }
        }
    }

    pub fn try_get(&self) -> Option<T> {
        self.slot.borrow().clone()
    }
}

#[cfg(test)]
#[path = "value_holder_tests.rs"]
mod tests;
