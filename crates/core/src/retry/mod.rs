// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Poll loop with exponential backoff and an external poke.
//!
//! Every network or Kubernetes call of the agent runs inside
//! [`poll_with_backoff`]. The attempt function decides what happens next by
//! returning an [`AttemptResult`]; the loop only ends on [`AttemptResult::Done`]
//! or when the cancellation token fires.

mod backoff;

pub use backoff::{BackoffConfig, ExponentialBackoff};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::Cancelled;

/// Outcome of one poll attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult<T = ()> {
    /// No error, sleep one interval and poll again.
    Continue,
    /// No error, poll again right away.
    ContinueImmediately,
    /// Retriable error, sleep for the current backoff.
    Backoff,
    /// Stop polling with this result.
    Done(T),
}

/// Handle that interrupts the current sleep of a poll loop.
#[derive(Debug, Clone, Default)]
pub struct Poker {
    notify: Arc<Notify>,
}

impl Poker {
    /// At most one poke is remembered while the loop is not sleeping.
    pub fn poke(&self) {
        self.notify.notify_one();
    }
}

#[derive(Debug, Clone)]
pub struct PollConfig {
    pub backoff: BackoffConfig,
    pub interval: Duration,
    /// When set, the backoff timer starts after the attempt returns.
    pub sliding: bool,
    poker: Poker,
}

impl PollConfig {
    pub fn new(interval: Duration, backoff: BackoffConfig) -> Self {
        Self { backoff, interval, sliding: true, poker: Poker::default() }
    }

    crate::setters! {
        set { sliding: bool }
    }

    pub fn poke(&self) {
        self.poker.poke();
    }

    pub fn poker(&self) -> Poker {
        self.poker.clone()
    }
}

impl BackoffConfig {
    /// Sliding poll configuration with this backoff.
    pub fn poll_config(&self, interval: Duration) -> PollConfig {
        PollConfig::new(interval, *self)
    }
}

/// Run `f` until it returns `Done` or `cancel` fires.
///
/// Returns [`Cancelled`] when the token fires, otherwise the value carried by
/// `Done`. A poke cuts both the interval sleep and the backoff sleep short.
pub async fn poll_with_backoff<T, F, Fut>(
    cancel: &CancellationToken,
    cfg: &PollConfig,
    mut f: F,
) -> Result<T, Cancelled>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AttemptResult<T>>,
{
    let mut backoff = cfg.backoff.start();
    loop {
        let fixed_deadline = (!cfg.sliding).then(|| Instant::now() + backoff.next_delay());

        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }
            match f().await {
                AttemptResult::Continue => {
                    sleep_or_poke(cancel, &cfg.poker, Instant::now() + cfg.interval).await?;
                }
                AttemptResult::ContinueImmediately => {}
                AttemptResult::Backoff => break,
                AttemptResult::Done(value) => return Ok(value),
            }
        }

        let deadline = match fixed_deadline {
            Some(deadline) => deadline,
            None => Instant::now() + backoff.next_delay(),
        };
        sleep_or_poke(cancel, &cfg.poker, deadline).await?;
    }
}

async fn sleep_or_poke(cancel: &CancellationToken, poker: &Poker, deadline: Instant) -> Result<(), Cancelled> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Cancelled),
        _ = poker.notify.notified() => Ok(()),
        _ = tokio::time::sleep_until(deadline) => Ok(()),
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
