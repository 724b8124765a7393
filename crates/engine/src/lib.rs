// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! agentk-engine: the machinery that drives modules.
//!
//! The configuration watcher feeds the [`ModuleRunner`], which fans every
//! configuration out to all modules. Leader-only modules are wrapped so that
//! they run only while the [`LeaderRunner`] holds the lease. Modules use the
//! [`WorkerManager`] and the reconciliation [`pipeline`] to do their work.

pub mod config_watcher;
pub mod leader_module_wrapper;
pub mod leader_runner;
pub mod module;
pub mod module_runner;
pub mod pipeline;
pub mod rendezvous;
pub mod worker_holder;
pub mod worker_manager;

#[cfg(test)]
mod test_support;

pub use config_watcher::{ConfigurationData, ConfigurationWatcher};
pub use leader_module_wrapper::{maybe_wrap, LeaderModuleWrapper};
pub use leader_runner::{LeaderElectionState, LeaderRunner, StartFn, StopFn, StopWaiter, Unregister};
pub use module::{
    BuiltModule, ConfigReceiver, ConfigSender, Factory, LeaderModule, Module, ModuleApi, ModuleConfig,
    ModuleError,
};
pub use module_runner::ModuleRunner;
pub use pipeline::{Decoded, Job, PipelineConfig};
pub use worker_holder::WorkerHolder;
pub use worker_manager::{Worker, WorkerError, WorkerFactory, WorkerManager};
