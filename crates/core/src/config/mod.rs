// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent configuration as delivered by the server.
//!
//! Every delivery is a full snapshot that supersedes the previous one. Modules
//! fill in defaults in `default_and_validate` and treat the result as
//! immutable afterwards. Equality is structural, which is what decides whether
//! a worker must be restarted.

mod gitops;
mod secs;

pub use gitops::{
    ChartCF, ChartSourceCF, ChartValuesCF, GitRefCF, GitopsCF, ManifestProjectCF, PathCF,
    ProjectSourceCF, ValuesFileCF, ValuesUrlCF,
};

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::AgentId;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfiguration {
    pub agent_id: AgentId,
    /// Project that holds the agent's configuration file.
    pub project_id: i64,
    pub project_path: String,
    pub gitlab_external_url: String,
    pub observability: Option<ObservabilityCF>,
    pub gitops: Option<GitopsCF>,
    pub flux: Option<FluxCF>,
    pub remote_development: Option<RemoteDevelopmentCF>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityCF {
    pub logging: Option<LoggingCF>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingCF {
    pub level: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FluxCF {
    pub webhook_receiver_url: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteDevelopmentCF {
    pub enabled: bool,
    #[serde(with = "secs")]
    pub partial_sync_interval: Option<Duration>,
    #[serde(with = "secs")]
    pub full_sync_interval: Option<Duration>,
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
