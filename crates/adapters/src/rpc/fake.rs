// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(coverage_nightly, coverage(off))]

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use super::*;

/// What the next call of a streaming RPC returns.
pub enum StreamScript<T> {
    /// Opening the stream fails.
    Fail(RpcError),
    /// Stream yields these items, then ends.
    Items(Vec<Result<T, RpcError>>),
    /// Stream driven by the test; ends when the sender is dropped.
    Channel(mpsc::UnboundedReceiver<Result<T, RpcError>>),
}

struct StreamState<Req, T> {
    requests: Vec<Req>,
    scripts: VecDeque<StreamScript<T>>,
}

/// Scripted server-streaming RPC. Unscripted calls return a stream that
/// never yields.
pub struct FakeStreamingRpc<Req, T> {
    inner: Arc<Mutex<StreamState<Req, T>>>,
    calls: Arc<watch::Sender<usize>>,
}

impl<Req, T> Clone for FakeStreamingRpc<Req, T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner), calls: Arc::clone(&self.calls) }
    }
}

impl<Req, T> Default for FakeStreamingRpc<Req, T> {
    fn default() -> Self {
        let (calls, _) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(StreamState { requests: Vec::new(), scripts: VecDeque::new() })),
            calls: Arc::new(calls),
        }
    }
}

impl<Req: Clone, T: Send + 'static> FakeStreamingRpc<Req, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, script: StreamScript<T>) {
        self.inner.lock().scripts.push_back(script);
    }

    /// Script the next call with a stream fed through the returned sender.
    pub fn push_channel(&self) -> mpsc::UnboundedSender<Result<T, RpcError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(StreamScript::Channel(rx));
        tx
    }

    pub fn requests(&self) -> Vec<Req> {
        self.inner.lock().requests.clone()
    }

    pub fn call_count(&self) -> usize {
        *self.calls.borrow()
    }

    /// Wait until at least `n` calls were made.
    pub async fn wait_for_calls(&self, n: usize) {
        let mut rx = self.calls.subscribe();
        let _ = rx.wait_for(|count| *count >= n).await;
    }

    pub fn open(&self, req: Req) -> Result<RpcStream<T>, RpcError> {
        let script = {
            let mut inner = self.inner.lock();
            inner.requests.push(req);
            inner.scripts.pop_front()
        };
        self.calls.send_modify(|count| *count += 1);
        match script {
            None => Ok(stream::pending().boxed()),
            Some(StreamScript::Fail(e)) => Err(e),
            Some(StreamScript::Items(items)) => Ok(stream::iter(items).boxed()),
            Some(StreamScript::Channel(rx)) => Ok(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed()),
        }
    }
}

pub type FakeConfigurationClient = FakeStreamingRpc<ConfigurationRequest, ConfigurationResponse>;
pub type FakeGitopsClient = FakeStreamingRpc<ObjectsToSynchronizeRequest, ObjectsToSynchronizeData>;
pub type FakeFluxClient = FakeStreamingRpc<ReconcileProjectsRequest, ProjectEvent>;

#[async_trait]
impl ConfigurationClient for FakeConfigurationClient {
    async fn get_configuration(
        &self,
        req: ConfigurationRequest,
    ) -> Result<RpcStream<ConfigurationResponse>, RpcError> {
        self.open(req)
    }
}

#[async_trait]
impl GitopsClient for FakeGitopsClient {
    async fn objects_to_synchronize(
        &self,
        req: ObjectsToSynchronizeRequest,
    ) -> Result<RpcStream<ObjectsToSynchronizeData>, RpcError> {
        self.open(req)
    }
}

#[async_trait]
impl FluxClient for FakeFluxClient {
    async fn reconcile_projects(
        &self,
        req: ReconcileProjectsRequest,
    ) -> Result<RpcStream<ProjectEvent>, RpcError> {
        self.open(req)
    }
}

type GitLabHandler = Arc<dyn Fn(&GitLabRequest) -> Result<GitLabResponse, RpcError> + Send + Sync>;

#[derive(Default)]
struct GitLabState {
    requests: Vec<GitLabRequest>,
    responses: VecDeque<Result<GitLabResponse, RpcError>>,
    handler: Option<GitLabHandler>,
}

/// Scripted `GitLabRequest` endpoint. Scripted responses are used first,
/// then the handler; with neither the call fails as unavailable.
#[derive(Clone, Default)]
pub struct FakeGitLabApi {
    inner: Arc<Mutex<GitLabState>>,
}

impl FakeGitLabApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: Result<GitLabResponse, RpcError>) {
        self.inner.lock().responses.push_back(response);
    }

    pub fn set_handler(
        &self,
        handler: impl Fn(&GitLabRequest) -> Result<GitLabResponse, RpcError> + Send + Sync + 'static,
    ) {
        self.inner.lock().handler = Some(Arc::new(handler));
    }

    pub fn requests(&self) -> Vec<GitLabRequest> {
        self.inner.lock().requests.clone()
    }
}

#[async_trait]
impl GitLabApi for FakeGitLabApi {
    async fn make_request(&self, req: GitLabRequest) -> Result<GitLabResponse, RpcError> {
        let mut inner = self.inner.lock();
        let scripted = inner.responses.pop_front();
        let handler = inner.handler.clone();
        inner.requests.push(req.clone());
        drop(inner);
        match (scripted, handler) {
            (Some(response), _) => response,
            (None, Some(handler)) => handler(&req),
            (None, None) => Err(RpcError::Unavailable("no scripted response".to_string())),
        }
    }
}

/// Records registrations; fails the first `failures` calls.
#[derive(Clone, Default)]
pub struct FakeAgentRegistrarClient {
    inner: Arc<Mutex<(Vec<RegisterRequest>, usize)>>,
}

impl FakeAgentRegistrarClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(failures: usize) -> Self {
        Self { inner: Arc::new(Mutex::new((Vec::new(), failures))) }
    }

    pub fn requests(&self) -> Vec<RegisterRequest> {
        self.inner.lock().0.clone()
    }
}

#[async_trait]
impl AgentRegistrarClient for FakeAgentRegistrarClient {
    async fn register(&self, req: RegisterRequest) -> Result<(), RpcError> {
        let mut inner = self.inner.lock();
        inner.0.push(req);
        if inner.1 > 0 {
            inner.1 -= 1;
            return Err(RpcError::Unavailable("registrar down".to_string()));
        }
        Ok(())
    }
}
