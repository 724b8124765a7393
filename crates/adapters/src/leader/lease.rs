// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lease based leader election.
//!
//! Mirrors the client-go algorithm: a candidate may take the lease when it is
//! free, already held by itself, or when the current holder's record has not
//! changed for a full lease duration (measured on the local clock). Holders
//! renew every retry period and give up once renewals fail past the renew
//! deadline. After losing the lease the elector campaigns again.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{LeaderCallbacks, LeaderElector};

const JITTER_FACTOR: f64 = 1.2;

#[derive(Debug, Clone)]
pub struct LeaseElectorConfig {
    pub namespace: String,
    pub name: String,
    pub identity: String,
    pub lease_duration: Duration,
    pub renew_deadline: Duration,
    pub retry_period: Duration,
    pub release_on_cancel: bool,
}

impl LeaseElectorConfig {
    /// Standard timings: 15s lease, 10s renew deadline, 2s retry period.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            identity: identity.into(),
            lease_duration: Duration::from_secs(15),
            renew_deadline: Duration::from_secs(10),
            retry_period: Duration::from_secs(2),
            release_on_cancel: true,
        }
    }
}

/// Last lease record seen and when it was first seen locally.
#[derive(Debug, Clone, PartialEq)]
struct Observed {
    holder: Option<String>,
    renew_time: Option<MicroTime>,
    at: Instant,
}

pub struct LeaseElector {
    client: Client,
    cfg: LeaseElectorConfig,
}

impl LeaseElector {
    pub fn new(client: Client, cfg: LeaseElectorConfig) -> Self {
        Self { client, cfg }
    }

    fn api(&self) -> Api<Lease> {
        Api::namespaced(self.client.clone(), &self.cfg.namespace)
    }

    /// Campaign until the lease is ours. Returns false when cancelled.
    async fn acquire(&self, cancel: &CancellationToken, observed: &mut Option<Observed>) -> bool {
        loop {
            if self.try_acquire_or_renew(observed).await {
                tracing::info!(lease = %self.cfg.name, identity = %self.cfg.identity, "acquired leader lease");
                return true;
            }
            let wait = self.cfg.retry_period.mul_f64(1.0 + rand::thread_rng().gen_range(0.0..JITTER_FACTOR));
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Keep renewing until a renewal misses the deadline or `cancel` fires.
    async fn renew(&self, cancel: &CancellationToken, observed: &mut Option<Observed>) {
        let mut last_renew = Instant::now();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.cfg.retry_period) => {}
            }
            if self.try_acquire_or_renew(observed).await {
                last_renew = Instant::now();
            } else if last_renew.elapsed() >= self.cfg.renew_deadline {
                tracing::warn!(lease = %self.cfg.name, "failed to renew leader lease, leadership lost");
                return;
            }
        }
    }

    async fn try_acquire_or_renew(&self, observed: &mut Option<Observed>) -> bool {
        let api = self.api();
        let now = MicroTime(Utc::now());
        let existing = match api.get_opt(&self.cfg.name).await {
            Ok(existing) => existing,
            Err(e) => {
                tracing::warn!(lease = %self.cfg.name, error = %e, "failed to get leader lease");
                return false;
            }
        };

        let Some(mut lease) = existing else {
            let lease = Lease {
                metadata: ObjectMeta {
                    name: Some(self.cfg.name.clone()),
                    namespace: Some(self.cfg.namespace.clone()),
                    ..Default::default()
                },
                spec: Some(next_spec(None, &self.cfg, now)),
            };
            return match api.create(&PostParams::default(), &lease).await {
                Ok(_) => true,
                Err(e) => {
                    tracing::debug!(lease = %self.cfg.name, error = %e, "failed to create leader lease");
                    false
                }
            };
        };

        let spec = lease.spec.clone().unwrap_or_default();
        let record = Observed {
            holder: spec.holder_identity.clone(),
            renew_time: spec.renew_time.clone(),
            at: Instant::now(),
        };
        let unchanged = matches!(
            observed.as_ref(),
            Some(prev) if prev.holder == record.holder && prev.renew_time == record.renew_time
        );
        let observed_at = if unchanged {
            observed.as_ref().map_or(record.at, |prev| prev.at)
        } else {
            let at = record.at;
            *observed = Some(record);
            at
        };
        let lease_duration = spec
            .lease_duration_seconds
            .map(|s| Duration::from_secs(s.max(0) as u64))
            .unwrap_or(self.cfg.lease_duration);
        if !can_acquire(spec.holder_identity.as_deref(), &self.cfg.identity, observed_at, lease_duration, Instant::now()) {
            return false;
        }

        lease.spec = Some(next_spec(Some(&spec), &self.cfg, now));
        match api.replace(&self.cfg.name, &PostParams::default(), &lease).await {
            Ok(updated) => {
                *observed = Some(Observed {
                    holder: Some(self.cfg.identity.clone()),
                    renew_time: updated.spec.and_then(|s| s.renew_time),
                    at: Instant::now(),
                });
                true
            }
            Err(e) => {
                tracing::debug!(lease = %self.cfg.name, error = %e, "failed to update leader lease");
                false
            }
        }
    }

    async fn release(&self) {
        let api = self.api();
        let Ok(Some(mut lease)) = api.get_opt(&self.cfg.name).await else {
            return;
        };
        let Some(spec) = lease.spec.as_mut() else {
            return;
        };
        if spec.holder_identity.as_deref() != Some(self.cfg.identity.as_str()) {
            return;
        }
        spec.holder_identity = None;
        spec.lease_duration_seconds = Some(1);
        spec.renew_time = Some(MicroTime(Utc::now()));
        if let Err(e) = api.replace(&self.cfg.name, &PostParams::default(), &lease).await {
            tracing::warn!(lease = %self.cfg.name, error = %e, "failed to release leader lease");
        }
    }
}

#[async_trait]
impl LeaderElector for LeaseElector {
    async fn run(&self, cancel: CancellationToken, callbacks: LeaderCallbacks) {
        let mut observed = None;
        while self.acquire(&cancel, &mut observed).await {
            callbacks.started_leading().await;
            self.renew(&cancel, &mut observed).await;
            if cancel.is_cancelled() {
                if self.cfg.release_on_cancel {
                    self.release().await;
                }
                break;
            }
            callbacks.stopped_leading().await;
        }
        callbacks.stopped_leading().await;
    }
}

/// Whether `identity` may write the lease given the current holder.
fn can_acquire(
    holder: Option<&str>,
    identity: &str,
    observed_at: Instant,
    lease_duration: Duration,
    now: Instant,
) -> bool {
    match holder {
        None | Some("") => true,
        Some(h) if h == identity => true,
        Some(_) => observed_at + lease_duration <= now,
    }
}

/// Spec written when `identity` takes or renews the lease.
fn next_spec(current: Option<&LeaseSpec>, cfg: &LeaseElectorConfig, now: MicroTime) -> LeaseSpec {
    let held_by_us = current.and_then(|s| s.holder_identity.as_deref()) == Some(cfg.identity.as_str());
    let transitions = current.and_then(|s| s.lease_transitions).unwrap_or(0);
    LeaseSpec {
        holder_identity: Some(cfg.identity.clone()),
        lease_duration_seconds: Some(cfg.lease_duration.as_secs() as i32),
        acquire_time: if held_by_us {
            current.and_then(|s| s.acquire_time.clone())
        } else {
            Some(now.clone())
        },
        renew_time: Some(now),
        lease_transitions: Some(if held_by_us || current.is_none() { transitions } else { transitions + 1 }),
        ..Default::default()
    }
}

#[cfg(test)]
#[path = "lease_tests.rs"]
mod tests;
