// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster operations used by the remote development and Flux modules.

use std::collections::BTreeMap;
use std::sync::Arc;

use agentk_core::{KubernetesVersion, FIELD_MANAGER};
use async_trait::async_trait;
use futures_util::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::runtime::{reflector, watcher, WatchStreamExt};
use kube::Client;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
    #[error("canceled")]
    Cancelled,

    /// A newer version of the object exists on the server.
    #[error("conflict applying {0:?}")]
    Conflict(String),

    #[error("{op} {name:?}: {message}")]
    Kube { op: &'static str, name: String, message: String },
}

impl ClusterError {
    pub(crate) fn kube(op: &'static str, name: &str, e: kube::Error) -> Self {
        Self::Kube { op, name: name.to_string(), message: e.to_string() }
    }
}

#[async_trait]
pub trait NamespaceOps: Send + Sync {
    async fn namespace_exists(&self, name: &str) -> Result<bool, ClusterError>;

    /// Create the namespace if it does not exist.
    async fn ensure_namespace(&self, name: &str, labels: BTreeMap<String, String>) -> Result<(), ClusterError>;

    /// Request deletion. Deleting a missing namespace succeeds.
    async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError>;
}

/// Read side of a running Deployment informer.
pub trait DeploymentCache: Send + Sync {
    fn list(&self) -> Vec<Arc<Deployment>>;
}

impl DeploymentCache for reflector::Store<Deployment> {
    fn list(&self) -> Vec<Arc<Deployment>> {
        self.state()
    }
}

#[async_trait]
pub trait DeploymentInformer: Send + Sync {
    /// Start watching Deployments matching `label_selector` in all namespaces.
    /// Returns once the initial list is in the cache. The watch stops when
    /// `cancel` fires.
    async fn start(&self, cancel: CancellationToken, label_selector: &str) -> Result<Arc<dyn DeploymentCache>, ClusterError>;
}

#[async_trait]
pub trait CrdProbe: Send + Sync {
    /// Whether the CustomResourceDefinition `name` is installed.
    async fn crd_exists(&self, name: &str) -> Result<bool, ClusterError>;
}

#[async_trait]
pub trait ServerVersion: Send + Sync {
    async fn server_version(&self) -> Result<KubernetesVersion, ClusterError>;
}

#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl NamespaceOps for KubeCluster {
    async fn namespace_exists(&self, name: &str) -> Result<bool, ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = api.get_opt(name).await.map_err(|e| ClusterError::kube("get namespace", name, e))?;
        Ok(ns.is_some())
    }

    async fn ensure_namespace(&self, name: &str, labels: BTreeMap<String, String>) -> Result<(), ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta { name: Some(name.to_string()), labels: Some(labels), ..Default::default() },
            ..Default::default()
        };
        api.patch(name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&ns))
            .await
            .map_err(|e| ClusterError::kube("apply namespace", name, e))?;
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(ClusterError::kube("delete namespace", name, e)),
        }
    }
}

#[async_trait]
impl DeploymentInformer for KubeCluster {
    async fn start(&self, cancel: CancellationToken, label_selector: &str) -> Result<Arc<dyn DeploymentCache>, ClusterError> {
        let api: Api<Deployment> = Api::all(self.client.clone());
        let (reader, writer) = reflector::store();
        let stream = reflector(writer, watcher(api, watcher::Config::default().labels(label_selector)))
            .default_backoff()
            .touched_objects();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let drive = stream.for_each(|event| async move {
                if let Err(e) = event {
                    tracing::warn!(error = %e, "deployment watch error");
                }
            });
            tokio::select! {
                _ = task_cancel.cancelled() => {}
                _ = drive => {}
            }
        });
        tokio::select! {
            _ = cancel.cancelled() => Err(ClusterError::Cancelled),
            ready = reader.wait_until_ready() => match ready {
                Ok(()) => Ok(Arc::new(reader) as Arc<dyn DeploymentCache>),
                Err(e) => Err(ClusterError::Kube {
                    op: "watch deployments",
                    name: label_selector.to_string(),
                    message: e.to_string(),
                }),
            },
        }
    }
}

#[async_trait]
impl CrdProbe for KubeCluster {
    async fn crd_exists(&self, name: &str) -> Result<bool, ClusterError> {
        let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        let crd = api.get_opt(name).await.map_err(|e| ClusterError::kube("get crd", name, e))?;
        Ok(crd.is_some())
    }
}

#[async_trait]
impl ServerVersion for KubeCluster {
    async fn server_version(&self) -> Result<KubernetesVersion, ClusterError> {
        let info = self
            .client
            .apiserver_version()
            .await
            .map_err(|e| ClusterError::kube("get version", "apiserver", e))?;
        Ok(KubernetesVersion {
            major: info.major,
            minor: info.minor,
            git_version: info.git_version,
            platform: info.platform,
        })
    }
}

#[cfg(any(test, feature = "test-support"))]
#[cfg_attr(coverage_nightly, coverage(off))]
mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::BTreeSet;

    #[derive(Default)]
    struct FakeClusterState {
        namespaces: BTreeSet<String>,
        deleted: Vec<String>,
        crds: BTreeSet<String>,
        selectors: Vec<String>,
        version: Option<KubernetesVersion>,
    }

    #[derive(Clone, Default)]
    struct SharedDeployments(Arc<Mutex<Vec<Arc<Deployment>>>>);

    impl DeploymentCache for SharedDeployments {
        fn list(&self) -> Vec<Arc<Deployment>> {
            self.0.lock().clone()
        }
    }

    /// In-memory cluster. Namespaces vanish immediately when deleted.
    #[derive(Clone, Default)]
    pub struct FakeCluster {
        inner: Arc<Mutex<FakeClusterState>>,
        deployments: SharedDeployments,
    }

    impl FakeCluster {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_namespace(&self, name: &str) {
            self.inner.lock().namespaces.insert(name.to_string());
        }

        pub fn has_namespace(&self, name: &str) -> bool {
            self.inner.lock().namespaces.contains(name)
        }

        pub fn deleted_namespaces(&self) -> Vec<String> {
            self.inner.lock().deleted.clone()
        }

        pub fn add_crd(&self, name: &str) {
            self.inner.lock().crds.insert(name.to_string());
        }

        pub fn set_deployments(&self, deployments: Vec<Deployment>) {
            *self.deployments.0.lock() = deployments.into_iter().map(Arc::new).collect();
        }

        /// Report `version` from [`ServerVersion`]; unset versions fail.
        pub fn set_version(&self, version: KubernetesVersion) {
            self.inner.lock().version = Some(version);
        }

        /// Label selectors of every informer started, in order.
        pub fn informer_selectors(&self) -> Vec<String> {
            self.inner.lock().selectors.clone()
        }
    }

    #[async_trait]
    impl NamespaceOps for FakeCluster {
        async fn namespace_exists(&self, name: &str) -> Result<bool, ClusterError> {
            Ok(self.has_namespace(name))
        }

        async fn ensure_namespace(&self, name: &str, _: BTreeMap<String, String>) -> Result<(), ClusterError> {
            self.add_namespace(name);
            Ok(())
        }

        async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError> {
            let mut inner = self.inner.lock();
            if inner.namespaces.remove(name) {
                inner.deleted.push(name.to_string());
            }
            Ok(())
        }
    }

    #[async_trait]
    impl DeploymentInformer for FakeCluster {
        async fn start(&self, _: CancellationToken, label_selector: &str) -> Result<Arc<dyn DeploymentCache>, ClusterError> {
            self.inner.lock().selectors.push(label_selector.to_string());
            Ok(Arc::new(self.deployments.clone()))
        }
    }

    #[async_trait]
    impl CrdProbe for FakeCluster {
        async fn crd_exists(&self, name: &str) -> Result<bool, ClusterError> {
            Ok(self.inner.lock().crds.contains(name))
        }
    }

    #[async_trait]
    impl ServerVersion for FakeCluster {
        async fn server_version(&self) -> Result<KubernetesVersion, ClusterError> {
            self.inner.lock().version.clone().ok_or_else(|| ClusterError::Kube {
                op: "get version",
                name: "apiserver".to_string(),
                message: "version not set".to_string(),
            })
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeCluster;
