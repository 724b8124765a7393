// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! agentk-modules: the modules an agent runs.
//!
//! Each module comes with a [`Factory`](agentk_engine::Factory) that the
//! daemon registers with the module runner. Leader-only modules (GitOps, Helm
//! charts, Flux, remote development) run on one replica at a time; the
//! registrar and observability modules run everywhere.

pub mod flux;
pub mod gitops;
pub mod observability;
pub mod registrar;
pub mod remote_dev;

#[cfg(test)]
mod test_support;

pub use flux::{FluxBackends, FluxFactory};
pub use gitops::chart::ChartFactory;
pub use gitops::manifest::ManifestFactory;
pub use observability::{LogLevelControl, ObservabilityFactory};
pub use registrar::RegistrarFactory;
pub use remote_dev::{RemoteDevBackends, RemoteDevFactory};

#[cfg(any(test, feature = "test-support"))]
pub use observability::FakeLogLevel;
