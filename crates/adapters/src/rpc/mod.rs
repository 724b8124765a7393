// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server RPC surface consumed by the agent.
//!
//! The transport is supplied by the embedder; the agent only depends on these
//! traits. Server-streaming calls return an [`RpcStream`] that ends with
//! `None` on a clean end-of-stream.
//!
//! # Module layout
//!
//! - [`configuration`]: `AgentConfiguration.Watch`
//! - [`gitops`]: `Gitops.ObjectsToSynchronize`
//! - [`flux`]: `Flux.ReconcileProjects`
//! - [`registrar`]: `AgentRegistrar.Register`
//! - [`gitlab`]: generic `GitLabRequest` passthrough

pub mod configuration;
pub mod flux;
pub mod gitlab;
pub mod gitops;
pub mod registrar;

#[cfg(any(test, feature = "test-support"))]
mod fake;

use futures_util::stream::BoxStream;
use thiserror::Error;

pub use configuration::{ConfigurationClient, ConfigurationRequest, ConfigurationResponse};
pub use flux::{FluxClient, ProjectEvent, ReconcileProjectsRequest};
pub use gitlab::{GitLabApi, GitLabRequest, GitLabResponse};
pub use gitops::{GitopsClient, ObjectSource, ObjectsToSynchronizeData, ObjectsToSynchronizeRequest, PathSpec};
pub use registrar::{AgentRegistrarClient, RegisterRequest};

#[cfg(any(test, feature = "test-support"))]
pub use fake::{
    FakeAgentRegistrarClient, FakeConfigurationClient, FakeFluxClient, FakeGitLabApi,
    FakeGitopsClient, FakeStreamingRpc, StreamScript,
};

/// Server-streaming response.
pub type RpcStream<T> = BoxStream<'static, Result<T, RpcError>>;

/// Errors from server calls
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("rpc canceled")]
    Canceled,

    #[error("rpc unavailable: {0}")]
    Unavailable(String),

    #[error("rpc failed with status {code}: {message}")]
    Status { code: i32, message: String },
}

impl RpcError {
    /// Request was canceled or timed out; not worth logging as a failure.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}
