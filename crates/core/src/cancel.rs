// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cancellation error shared by every blocking operation.

use std::future::Future;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// The enclosing context finished before the operation completed.
///
/// Never logged as an error; it simply terminates the current operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("context canceled")]
pub struct Cancelled;

/// Run `fut` until it completes or `cancel` fires.
pub async fn or_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output, Cancelled> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Cancelled),
        out = fut => Ok(out),
    }
}
