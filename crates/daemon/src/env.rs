// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::time::Duration;

use thiserror::Error;

/// Agent version (from Cargo.toml)
pub const AGENT_VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"));

/// Commit the agent was built from
pub const AGENT_COMMIT: &str = env!("AGENTK_GIT_COMMIT");

pub const DEFAULT_LEASE_NAME: &str = "agentk-leader";
pub const DEFAULT_AGENT_NAME: &str = "agentk";
pub const DEFAULT_FLUX_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),
}

fn non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn required(name: &'static str) -> Result<String, EnvError> {
    non_empty(name).ok_or(EnvError::Missing(name))
}

/// Namespace the agent pod runs in. Also holds the leader lease.
pub fn pod_namespace() -> Result<String, EnvError> {
    required("POD_NAMESPACE")
}

/// Pod name, used as the leader election identity.
pub fn pod_name() -> Result<String, EnvError> {
    required("POD_NAME")
}

pub fn service_account_name() -> Option<String> {
    non_empty("SERVICE_ACCOUNT_NAME")
}

pub fn lease_name() -> String {
    non_empty("AGENTK_LEASE_NAME").unwrap_or_else(|| DEFAULT_LEASE_NAME.to_string())
}

/// Name used in the user agent and as the server-side field manager prefix.
pub fn agent_name() -> String {
    non_empty("AGENTK_AGENT_NAME").unwrap_or_else(|| DEFAULT_AGENT_NAME.to_string())
}

/// Flux project-set debounce window (default 500ms, configurable via
/// `AGENTK_FLUX_DEBOUNCE_MS`).
pub fn flux_debounce() -> Duration {
    std::env::var("AGENTK_FLUX_DEBOUNCE_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_FLUX_DEBOUNCE)
}

/// Process settings read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub pod_namespace: String,
    pub pod_name: String,
    pub service_account_name: Option<String>,
    pub lease_name: String,
    pub agent_name: String,
    pub flux_debounce: Duration,
}

impl Settings {
    pub fn from_env() -> Result<Self, EnvError> {
        Ok(Self {
            pod_namespace: pod_namespace()?,
            pod_name: pod_name()?,
            service_account_name: service_account_name(),
            lease_name: lease_name(),
            agent_name: agent_name(),
            flux_debounce: flux_debounce(),
        })
    }
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
