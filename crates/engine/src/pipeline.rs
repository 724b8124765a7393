// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Decode and apply stages of a watch → decode → apply reconciliation loop.
//!
//! The watch stage is module specific and feeds desired states into the
//! decode stage in order. Decode turns each one into a [`Job`], cancelling the
//! previous job first. Apply consumes jobs one at a time and re-applies the
//! current job every interval until it is superseded.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use agentk_core::{poll_with_backoff, AttemptResult, BackoffConfig, PollConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A unit of apply work. `cancel` fires when a newer job supersedes it.
#[derive(Debug)]
pub struct Job<J> {
    pub cancel: CancellationToken,
    pub spec: Arc<J>,
}

/// What the decode function made of one desired state.
#[derive(Debug)]
pub enum Decoded<J> {
    /// Emit a job for this desired state.
    Job(J),
    /// Not enough input yet; wait for the next desired state.
    Wait,
}

enum Outcome<J> {
    Decoded(Decoded<J>),
    Superseded,
    Stop,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub decode_backoff: BackoffConfig,
    pub apply_backoff: BackoffConfig,
    pub reapply_interval: Duration,
}

/// Run `watch`, the decode stage and the apply stage until `cancel` fires.
///
/// `watch` receives the sender for desired states and must return once
/// `cancel` fires.
pub async fn run<I, J, W, WFut, D, A, AFut>(
    cancel: &CancellationToken,
    cfg: &PipelineConfig,
    watch: W,
    decode: D,
    apply: A,
) where
    I: Send,
    J: Send + Sync,
    W: FnOnce(mpsc::Sender<I>) -> WFut,
    WFut: Future<Output = ()>,
    D: FnMut(&I) -> Result<Decoded<J>, String>,
    A: FnMut(CancellationToken, Arc<J>) -> AFut,
    AFut: Future<Output = AttemptResult<()>>,
{
    let (desired_tx, desired_rx) = mpsc::channel(1);
    let (jobs_tx, jobs_rx) = mpsc::channel(1);
    let apply_poll = cfg.apply_backoff.poll_config(cfg.reapply_interval);
    tokio::join!(
        watch(desired_tx),
        decode_stage(cancel, cfg.decode_backoff, desired_rx, jobs_tx, decode),
        apply_stage(cancel, &apply_poll, jobs_rx, apply),
    );
}

/// Decode desired states in arrival order.
///
/// A decode error is retried with `backoff` until it succeeds or a newer
/// desired state arrives. The previous job is cancelled before the next one
/// is sent.
pub async fn decode_stage<I, J, D>(
    cancel: &CancellationToken,
    backoff: BackoffConfig,
    mut input: mpsc::Receiver<I>,
    jobs: mpsc::Sender<Job<J>>,
    mut decode: D,
) where
    D: FnMut(&I) -> Result<Decoded<J>, String>,
{
    let mut last_job: Option<CancellationToken> = None;
    let mut next: Option<I> = None;
    loop {
        let current = match next.take() {
            Some(current) => current,
            None => tokio::select! {
                _ = cancel.cancelled() => break,
                item = input.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            },
        };

        let mut retry = backoff.start();
        let outcome = loop {
            match decode(&current) {
                Ok(decoded) => break Outcome::Decoded(decoded),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to decode desired state, retrying");
                    let delay = retry.next_delay();
                    tokio::select! {
                        _ = cancel.cancelled() => break Outcome::Stop,
                        item = input.recv() => match item {
                            Some(item) => {
                                next = Some(item);
                                break Outcome::Superseded;
                            }
                            None => break Outcome::Stop,
                        },
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        };
        let spec = match outcome {
            Outcome::Stop => break,
            Outcome::Superseded | Outcome::Decoded(Decoded::Wait) => continue,
            Outcome::Decoded(Decoded::Job(spec)) => spec,
        };

        if let Some(prev) = last_job.take() {
            prev.cancel();
        }
        let job_cancel = cancel.child_token();
        last_job = Some(job_cancel.clone());
        let job = Job { cancel: job_cancel, spec: Arc::new(spec) };
        tokio::select! {
            _ = cancel.cancelled() => break,
            res = jobs.send(job) => {
                if res.is_err() {
                    break;
                }
            }
        }
    }
    if let Some(prev) = last_job {
        prev.cancel();
    }
}

/// Apply jobs serially. Each job runs under `poll`: the apply function
/// returns `Continue` on success to re-apply after the interval and `Backoff`
/// on a transient error. A cancelled job is abandoned for the next one.
pub async fn apply_stage<J, A, AFut>(
    cancel: &CancellationToken,
    poll: &PollConfig,
    mut jobs: mpsc::Receiver<Job<J>>,
    mut apply: A,
) where
    A: FnMut(CancellationToken, Arc<J>) -> AFut,
    AFut: Future<Output = AttemptResult<()>>,
{
    loop {
        let job = tokio::select! {
            _ = cancel.cancelled() => return,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => return,
            },
        };
        let job_cancel = job.cancel.clone();
        let _ = poll_with_backoff(&job_cancel, poll, || apply(job.cancel.clone(), Arc::clone(&job.spec))).await;
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
