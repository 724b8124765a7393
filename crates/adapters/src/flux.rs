// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Flux `GitRepository` and `Receiver` resources.
//!
//! Both kinds are watched as dynamic objects; [`GitRepository`] and
//! [`Receiver`] carry only the fields the Flux module reads.

use std::collections::BTreeMap;
use std::sync::Arc;

use agentk_core::FIELD_MANAGER;
use async_trait::async_trait;
use futures_util::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, DynamicObject, Patch, PatchParams};
use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cluster::{ClusterError, KubeCluster};
use crate::http::{HttpClient, HttpError, HttpResponse};

pub const GIT_REPOSITORY_GROUP: &str = "source.toolkit.fluxcd.io";
pub const GIT_REPOSITORY_KIND: &str = "GitRepository";
pub const GIT_REPOSITORY_API_VERSION: &str = "source.toolkit.fluxcd.io/v1";
pub const GIT_REPOSITORY_CRD: &str = "gitrepositories.source.toolkit.fluxcd.io";

pub const RECEIVER_KIND: &str = "Receiver";
pub const RECEIVER_API_VERSION: &str = "notification.toolkit.fluxcd.io/v1";
pub const RECEIVER_CRD: &str = "receivers.notification.toolkit.fluxcd.io";

pub fn git_repository_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk(GIT_REPOSITORY_GROUP, "v1", GIT_REPOSITORY_KIND),
        "gitrepositories",
    )
}

pub fn receiver_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("notification.toolkit.fluxcd.io", "v1", RECEIVER_KIND),
        "receivers",
    )
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }
}

impl std::fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GitRepository {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    /// `spec.url`.
    pub url: String,
}

impl GitRepository {
    /// `None` when the object has no name or namespace.
    pub fn from_object(obj: &DynamicObject) -> Option<Self> {
        Some(Self {
            namespace: obj.metadata.namespace.clone()?,
            name: obj.metadata.name.clone()?,
            uid: obj.metadata.uid.clone().unwrap_or_default(),
            url: obj.data["spec"]["url"].as_str().unwrap_or_default().to_string(),
        })
    }

    pub fn key(&self) -> NamespacedName {
        NamespacedName::new(&self.namespace, &self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Receiver {
    pub namespace: String,
    pub name: String,
    pub annotations: BTreeMap<String, String>,
    /// `status.webhookPath`, set by Flux once the receiver is ready.
    pub webhook_path: Option<String>,
    /// Owner reference marked as controller.
    pub controller: Option<OwnerReference>,
}

impl Receiver {
    pub fn from_object(obj: &DynamicObject) -> Option<Self> {
        let controller = obj
            .metadata
            .owner_references
            .iter()
            .flatten()
            .find(|r| r.controller == Some(true))
            .cloned();
        Some(Self {
            namespace: obj.metadata.namespace.clone()?,
            name: obj.metadata.name.clone()?,
            annotations: obj.metadata.annotations.clone().unwrap_or_default(),
            webhook_path: obj.data["status"]["webhookPath"]
                .as_str()
                .filter(|p| !p.is_empty())
                .map(str::to_string),
            controller,
        })
    }
}

/// A watched object was added, changed or (for receivers) deleted.
#[derive(Debug, Clone, PartialEq)]
pub enum FluxEvent {
    GitRepository(NamespacedName),
    Receiver(Receiver),
}

/// Read side of the running Flux informers.
pub trait FluxCache: Send + Sync {
    fn git_repository(&self, key: &NamespacedName) -> Option<GitRepository>;

    fn receivers(&self) -> Vec<Receiver>;
}

#[async_trait]
pub trait FluxInformers: Send + Sync {
    /// Watch GitRepositories and Receivers in all namespaces, sending every
    /// change to `events`. Returns once both caches hold the initial list.
    async fn start(
        &self,
        cancel: CancellationToken,
        events: mpsc::UnboundedSender<FluxEvent>,
    ) -> Result<Arc<dyn FluxCache>, ClusterError>;
}

#[async_trait]
pub trait FluxObjects: Send + Sync {
    /// Server-side apply; a 409 is reported as [`ClusterError::Conflict`].
    async fn apply_secret(&self, secret: &Secret) -> Result<(), ClusterError>;

    async fn apply_receiver(&self, receiver: &DynamicObject) -> Result<(), ClusterError>;
}

struct KubeFluxCache {
    repositories: Store<DynamicObject>,
    receivers: Store<DynamicObject>,
}

impl FluxCache for KubeFluxCache {
    fn git_repository(&self, key: &NamespacedName) -> Option<GitRepository> {
        let obj_ref = ObjectRef::new_with(&key.name, git_repository_resource()).within(&key.namespace);
        self.repositories.get(&obj_ref).and_then(|obj| GitRepository::from_object(&obj))
    }

    fn receivers(&self) -> Vec<Receiver> {
        self.receivers.state().iter().filter_map(|obj| Receiver::from_object(obj)).collect()
    }
}

fn spawn_watch(
    cancel: CancellationToken,
    api: Api<DynamicObject>,
    writer: reflector::store::Writer<DynamicObject>,
    mut on_event: impl FnMut(watcher::Event<DynamicObject>) + Send + 'static,
) {
    tokio::spawn(async move {
        let mut stream = reflector::reflector(writer, watcher(api, watcher::Config::default())).default_backoff().boxed();
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return,
                next = stream.next() => next,
            };
            match next {
                None => return,
                Some(Ok(event)) => on_event(event),
                Some(Err(e)) => tracing::warn!(error = %e, "flux watch error"),
            }
        }
    });
}

#[async_trait]
impl FluxInformers for KubeCluster {
    async fn start(
        &self,
        cancel: CancellationToken,
        events: mpsc::UnboundedSender<FluxEvent>,
    ) -> Result<Arc<dyn FluxCache>, ClusterError> {
        let repo_ar = git_repository_resource();
        let repo_writer = reflector::store::Writer::new(repo_ar.clone());
        let repositories = repo_writer.as_reader();
        let repo_events = events.clone();
        spawn_watch(
            cancel.clone(),
            Api::all_with(self.client().clone(), &repo_ar),
            repo_writer,
            move |event| {
                if let watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) = event {
                    if let Some(repo) = GitRepository::from_object(&obj) {
                        let _ = repo_events.send(FluxEvent::GitRepository(repo.key()));
                    }
                }
            },
        );

        let receiver_ar = receiver_resource();
        let receiver_writer = reflector::store::Writer::new(receiver_ar.clone());
        let receivers = receiver_writer.as_reader();
        spawn_watch(
            cancel.clone(),
            Api::all_with(self.client().clone(), &receiver_ar),
            receiver_writer,
            move |event| {
                if let watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) | watcher::Event::Delete(obj) = event {
                    if let Some(receiver) = Receiver::from_object(&obj) {
                        let _ = events.send(FluxEvent::Receiver(receiver));
                    }
                }
            },
        );

        let ready = async {
            repositories.wait_until_ready().await?;
            receivers.wait_until_ready().await
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(ClusterError::Cancelled),
            ready = ready => match ready {
                Ok(()) => Ok(Arc::new(KubeFluxCache { repositories, receivers }) as Arc<dyn FluxCache>),
                Err(e) => Err(ClusterError::Kube {
                    op: "watch",
                    name: "flux resources".to_string(),
                    message: e.to_string(),
                }),
            },
        }
    }
}

fn apply_error(op: &'static str, name: &str, e: kube::Error) -> ClusterError {
    match e {
        kube::Error::Api(ae) if ae.code == 409 => ClusterError::Conflict(name.to_string()),
        e => ClusterError::kube(op, name, e),
    }
}

#[async_trait]
impl FluxObjects for KubeCluster {
    async fn apply_secret(&self, secret: &Secret) -> Result<(), ClusterError> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        let ns = secret.metadata.namespace.clone().unwrap_or_default();
        let api: Api<Secret> = Api::namespaced(self.client().clone(), &ns);
        api.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(secret))
            .await
            .map_err(|e| apply_error("apply secret", &name, e))?;
        Ok(())
    }

    async fn apply_receiver(&self, receiver: &DynamicObject) -> Result<(), ClusterError> {
        let name = receiver.metadata.name.clone().unwrap_or_default();
        let ns = receiver.metadata.namespace.clone().unwrap_or_default();
        let api: Api<DynamicObject> = Api::namespaced_with(self.client().clone(), &ns, &receiver_resource());
        api.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(receiver))
            .await
            .map_err(|e| apply_error("apply receiver", &name, e))?;
        Ok(())
    }
}

/// Sends requests through the Kubernetes API server with the agent's
/// credentials. URLs are paths relative to the API server.
#[derive(Clone)]
pub struct KubeProxyClient {
    client: Client,
}

impl KubeProxyClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn send(&self, method: http::Method, url: &str, limit: usize) -> Result<HttpResponse, HttpError> {
        let req = http::Request::builder()
            .method(method)
            .uri(url)
            .body(Vec::new())
            .map_err(|e| HttpError::Request { url: url.to_string(), message: e.to_string() })?;
        match self.client.request_text(req).await {
            Ok(text) => {
                let mut body = text.into_bytes();
                body.truncate(limit);
                Ok(HttpResponse { status: 200, content_type: None, body })
            }
            Err(kube::Error::Api(ae)) => Ok(HttpResponse {
                status: ae.code,
                content_type: None,
                body: ae.message.into_bytes(),
            }),
            Err(e) => Err(HttpError::Request { url: url.to_string(), message: e.to_string() }),
        }
    }
}

#[async_trait]
impl HttpClient for KubeProxyClient {
    async fn get(&self, url: &str, limit: usize) -> Result<HttpResponse, HttpError> {
        let resp = self.send(http::Method::GET, url, usize::MAX).await?;
        if resp.body.len() > limit {
            return Err(HttpError::TooLarge { url: url.to_string(), limit });
        }
        Ok(resp)
    }

    async fn post_empty(&self, url: &str, drain_limit: usize) -> Result<HttpResponse, HttpError> {
        self.send(http::Method::POST, url, drain_limit).await
    }
}

#[cfg(any(test, feature = "test-support"))]
#[cfg_attr(coverage_nightly, coverage(off))]
mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tokio::sync::watch;

    #[derive(Default)]
    struct FakeFluxState {
        repositories: BTreeMap<NamespacedName, GitRepository>,
        receivers: BTreeMap<NamespacedName, Receiver>,
        events: Option<mpsc::UnboundedSender<FluxEvent>>,
        secrets: Vec<Secret>,
        applied_receivers: Vec<DynamicObject>,
        failures: VecDeque<ClusterError>,
    }

    /// In-memory Flux resources. Changes made after `start` are reported as
    /// events.
    #[derive(Clone)]
    pub struct FakeFlux {
        inner: Arc<Mutex<FakeFluxState>>,
        applies: Arc<watch::Sender<usize>>,
    }

    impl Default for FakeFlux {
        fn default() -> Self {
            let (applies, _) = watch::channel(0);
            Self { inner: Arc::default(), applies: Arc::new(applies) }
        }
    }

    impl FakeFlux {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn upsert_git_repository(&self, repo: GitRepository) {
            let mut inner = self.inner.lock();
            let key = repo.key();
            inner.repositories.insert(key.clone(), repo);
            if let Some(events) = &inner.events {
                let _ = events.send(FluxEvent::GitRepository(key));
            }
        }

        pub fn upsert_receiver(&self, receiver: Receiver) {
            let mut inner = self.inner.lock();
            let key = NamespacedName::new(&receiver.namespace, &receiver.name);
            inner.receivers.insert(key, receiver.clone());
            if let Some(events) = &inner.events {
                let _ = events.send(FluxEvent::Receiver(receiver));
            }
        }

        pub fn delete_receiver(&self, key: &NamespacedName) {
            let mut inner = self.inner.lock();
            if let Some(receiver) = inner.receivers.remove(key) {
                if let Some(events) = &inner.events {
                    let _ = events.send(FluxEvent::Receiver(receiver));
                }
            }
        }

        /// Fail the next apply (secret or receiver) with `err`.
        pub fn fail_next_apply(&self, err: ClusterError) {
            self.inner.lock().failures.push_back(err);
        }

        pub fn applied_secrets(&self) -> Vec<Secret> {
            self.inner.lock().secrets.clone()
        }

        pub fn applied_receivers(&self) -> Vec<DynamicObject> {
            self.inner.lock().applied_receivers.clone()
        }

        /// Wait until at least `n` apply calls were made, failed ones included.
        pub async fn wait_for_applies(&self, n: usize) {
            let mut rx = self.applies.subscribe();
            let _ = rx.wait_for(|count| *count >= n).await;
        }

        fn record(&self, f: impl FnOnce(&mut FakeFluxState)) -> Result<(), ClusterError> {
            let result = {
                let mut inner = self.inner.lock();
                match inner.failures.pop_front() {
                    Some(err) => Err(err),
                    None => {
                        f(&mut inner);
                        Ok(())
                    }
                }
            };
            self.applies.send_modify(|count| *count += 1);
            result
        }
    }

    impl FluxCache for FakeFlux {
        fn git_repository(&self, key: &NamespacedName) -> Option<GitRepository> {
            self.inner.lock().repositories.get(key).cloned()
        }

        fn receivers(&self) -> Vec<Receiver> {
            self.inner.lock().receivers.values().cloned().collect()
        }
    }

    #[async_trait]
    impl FluxInformers for FakeFlux {
        async fn start(
            &self,
            _: CancellationToken,
            events: mpsc::UnboundedSender<FluxEvent>,
        ) -> Result<Arc<dyn FluxCache>, ClusterError> {
            let mut inner = self.inner.lock();
            for key in inner.repositories.keys() {
                let _ = events.send(FluxEvent::GitRepository(key.clone()));
            }
            for receiver in inner.receivers.values() {
                let _ = events.send(FluxEvent::Receiver(receiver.clone()));
            }
            inner.events = Some(events);
            Ok(Arc::new(self.clone()))
        }
    }

    #[async_trait]
    impl FluxObjects for FakeFlux {
        async fn apply_secret(&self, secret: &Secret) -> Result<(), ClusterError> {
            self.record(|inner| inner.secrets.push(secret.clone()))
        }

        async fn apply_receiver(&self, receiver: &DynamicObject) -> Result<(), ClusterError> {
            self.record(|inner| inner.applied_receivers.push(receiver.clone()))
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeFlux;

#[cfg(test)]
#[path = "flux_tests.rs"]
mod tests;
