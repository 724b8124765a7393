// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! agentk-core: shared building blocks of the cluster agent.
//!
//! Holds the configuration model delivered by the server, the agent identity,
//! the set-once [`ValueHolder`] and the [`retry`] loop every external call is
//! wrapped in.

pub mod macros;

pub mod cancel;
pub mod config;
pub mod meta;
pub mod retry;
pub mod value_holder;
pub mod work_source;

pub use cancel::Cancelled;
pub use config::{
    AgentConfiguration, ChartCF, ChartSourceCF, ChartValuesCF, FluxCF, GitRefCF, GitopsCF,
    LoggingCF, ManifestProjectCF, ObservabilityCF, PathCF, ProjectSourceCF, RemoteDevelopmentCF,
    ValuesFileCF, ValuesUrlCF,
};
pub use meta::{AgentMeta, KubernetesVersion};
pub use retry::{
    poll_with_backoff, AttemptResult, BackoffConfig, ExponentialBackoff, PollConfig, Poker,
};
pub use value_holder::{ValueHolder, ValueHolderError};
pub use work_source::WorkSource;

/// Numeric identity assigned to this agent by the server.
pub type AgentId = i64;

/// Field manager used for server-side apply of every object the agent writes.
pub const FIELD_MANAGER: &str = "agentk";
