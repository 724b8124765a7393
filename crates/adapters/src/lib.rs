// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! agentk-adapters: typed interfaces to everything outside the agent process.
//!
//! Server RPCs, leader election, applying objects, Helm releases, plain HTTP,
//! Flux resources and cluster lookups. Every trait has an in-memory fake behind the
//! `test-support` feature.

pub mod apply;
pub mod cluster;
pub mod flux;
pub mod helm;
pub mod http;
pub mod leader;
pub mod manifest;
pub mod rpc;

pub use apply::{
    Applier, ApplyError, ApplyOptions, ApplyReport, ApplyRequest, DryRunStrategy, InvalidOption,
    InventoryPolicy, PropagationPolicy, ServerSideApplier,
};
pub use cluster::{
    ClusterError, CrdProbe, DeploymentCache, DeploymentInformer, KubeCluster, NamespaceOps, ServerVersion,
};
pub use flux::{FluxCache, FluxEvent, FluxInformers, FluxObjects, GitRepository, KubeProxyClient, NamespacedName, Receiver};
pub use helm::{Chart, ChartFile, ChartMetadata, HelmActions, HelmError, ReleaseRequest};
pub use http::{HttpClient, HttpError, HttpResponse, ReqwestClient};
pub use leader::{LeaderCallbacks, LeaderElector, LeaseElector, LeaseElectorConfig};
pub use manifest::{parse_manifests, split_inventory, ManifestError};
pub use rpc::{RpcError, RpcStream};

#[cfg(any(test, feature = "test-support"))]
pub use apply::FakeApplier;
#[cfg(any(test, feature = "test-support"))]
pub use cluster::FakeCluster;
#[cfg(any(test, feature = "test-support"))]
pub use flux::FakeFlux;
#[cfg(any(test, feature = "test-support"))]
pub use helm::{FakeHelm, HelmCall};
#[cfg(any(test, feature = "test-support"))]
pub use http::{FakeHttpClient, HttpCall};
#[cfg(any(test, feature = "test-support"))]
pub use leader::FakeElector;
