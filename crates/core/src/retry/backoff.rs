// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Exponential backoff with jitter and idle reset.

use std::time::Duration;

use tokio::time::Instant;
use tokio_retry::strategy::{jitter, ExponentialBackoff as Strategy};

/// Backoff parameters. Each poll loop creates its own [`ExponentialBackoff`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    pub init: Duration,
    pub max: Duration,
    /// Idle period after which the delay returns to `init`.
    pub reset: Duration,
    /// Growth per attempt, rounded to a whole multiplier. Values of 1 or less keep the delay constant.
    pub factor: f64,
    /// Extra random delay as a fraction of the current delay.
    pub jitter: f64,
}

impl BackoffConfig {
    pub const fn new(init: Duration, max: Duration, reset: Duration, factor: f64, jitter: f64) -> Self {
        Self { init, max, reset, factor, jitter }
    }

    pub fn start(&self) -> ExponentialBackoff {
        ExponentialBackoff { cfg: *self, delays: self.strategy(), last_start: Instant::now() }
    }

    /// `base^n * mult` milliseconds with `base * mult == init`, capped at `max`.
    fn strategy(&self) -> Strategy {
        let base = if self.factor > 1.0 { self.factor.round() as u64 } else { 1 };
        let init_ms = u64::try_from(self.init.as_millis()).unwrap_or(u64::MAX);
        Strategy::from_millis(base).factor((init_ms / base).max(1)).max_delay(self.max)
    }
}

#[derive(Debug)]
pub struct ExponentialBackoff {
    cfg: BackoffConfig,
    delays: Strategy,
    last_start: Instant,
}

impl ExponentialBackoff {
    /// Delay to sleep before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let now = Instant::now();
        if now.duration_since(self.last_start) > self.cfg.reset {
            self.delays = self.cfg.strategy();
        }
        self.last_start = now;

        let delay = self.delays.next().unwrap_or(self.cfg.max);
        if self.cfg.jitter <= 0.0 {
            return delay;
        }
        delay + jitter(delay.mul_f64(self.cfg.jitter))
    }
}
