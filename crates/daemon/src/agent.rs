// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent process wiring: module factories, configuration refresh and leader
//! election.

use std::sync::Arc;
use std::time::Duration;

use agentk_adapters::rpc::{AgentRegistrarClient, ConfigurationClient, FluxClient, GitLabApi, GitopsClient};
use agentk_adapters::{
    Applier, CrdProbe, DeploymentInformer, FluxInformers, FluxObjects, HelmActions, HttpClient, HttpError,
    KubeCluster, KubeProxyClient, LeaderElector, LeaseElector, LeaseElectorConfig, NamespaceOps, ReqwestClient,
    ServerSideApplier, ServerVersion,
};
use agentk_core::{AgentId, AgentMeta, BackoffConfig, ValueHolder};
use agentk_engine::{
    maybe_wrap, ConfigurationData, ConfigurationWatcher, Factory, LeaderElectionState, LeaderRunner, ModuleApi,
    ModuleConfig, ModuleError, ModuleRunner,
};
use agentk_modules::{
    ChartFactory, FluxBackends, FluxFactory, LogLevelControl, ManifestFactory, ObservabilityFactory,
    RegistrarFactory, RemoteDevBackends, RemoteDevFactory,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::env::{EnvError, Settings, AGENT_COMMIT, AGENT_VERSION};
use crate::logging::LoggingError;

const CONFIGURATION_BACKOFF: BackoffConfig =
    BackoffConfig::new(Duration::from_secs(10), Duration::from_secs(300), Duration::from_secs(600), 2.0, 1.0);

/// Timeout for chart values fetched from URLs.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Env(#[from] EnvError),

    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("failed to create Kubernetes client: {0}")]
    Kube(String),

    #[error("{module}: failed to build module: {source}")]
    Build {
        module: &'static str,
        #[source]
        source: ModuleError,
    },

    #[error(transparent)]
    Module(#[from] ModuleError),
}

/// Server-side endpoints the agent talks to.
#[derive(Clone)]
pub struct ServerClients {
    pub configuration: Arc<dyn ConfigurationClient>,
    pub gitops: Arc<dyn GitopsClient>,
    pub flux: Arc<dyn FluxClient>,
    pub registrar: Arc<dyn AgentRegistrarClient>,
    pub gitlab: Arc<dyn GitLabApi>,
}

/// Cluster-side collaborators.
#[derive(Clone)]
pub struct ClusterClients {
    pub elector: Arc<dyn LeaderElector>,
    pub applier: Arc<dyn Applier>,
    pub helm: Arc<dyn HelmActions>,
    /// Plain HTTP, for chart values fetched from URLs.
    pub http: Arc<dyn HttpClient>,
    /// HTTP through the API server proxy, for Flux webhook receivers.
    pub kube_proxy: Arc<dyn HttpClient>,
    pub crds: Arc<dyn CrdProbe>,
    pub flux_informers: Arc<dyn FluxInformers>,
    pub flux_objects: Arc<dyn FluxObjects>,
    pub namespaces: Arc<dyn NamespaceOps>,
    pub deployments: Arc<dyn DeploymentInformer>,
    pub server_version: Arc<dyn ServerVersion>,
}

impl ClusterClients {
    /// Collaborators backed by `client`. Helm actions are supplied by the
    /// caller.
    pub fn from_kube(
        client: kube::Client,
        settings: &Settings,
        helm: Arc<dyn HelmActions>,
        user_agent: &str,
    ) -> Result<Self, AgentError> {
        let cluster = Arc::new(KubeCluster::new(client.clone()));
        let lease = LeaseElectorConfig::new(&settings.pod_namespace, &settings.lease_name, &settings.pod_name);
        Ok(Self {
            elector: Arc::new(LeaseElector::new(client.clone(), lease)),
            applier: Arc::new(ServerSideApplier::new(client.clone())),
            helm,
            http: Arc::new(ReqwestClient::new(user_agent, HTTP_TIMEOUT)?),
            kube_proxy: Arc::new(KubeProxyClient::new(client)),
            crds: cluster.clone(),
            flux_informers: cluster.clone(),
            flux_objects: cluster.clone(),
            namespaces: cluster.clone(),
            deployments: cluster.clone(),
            server_version: cluster,
        })
    }
}

pub fn agent_meta(settings: &Settings) -> AgentMeta {
    AgentMeta {
        version: AGENT_VERSION.to_string(),
        commit_id: AGENT_COMMIT.to_string(),
        pod_namespace: settings.pod_namespace.clone(),
        pod_name: settings.pod_name.clone(),
        kubernetes_version: Default::default(),
    }
}

/// Every module the agent runs, in start order.
fn factories(
    settings: &Settings,
    server: &ServerClients,
    cluster: &ClusterClients,
    log_level: Arc<dyn LogLevelControl>,
) -> Vec<Box<dyn Factory>> {
    vec![
        Box::new(ObservabilityFactory::new(log_level)),
        Box::new(RegistrarFactory::new(Arc::clone(&server.registrar), Arc::clone(&cluster.server_version))),
        Box::new(ManifestFactory::new(Arc::clone(&server.gitops), Arc::clone(&cluster.applier))),
        Box::new(ChartFactory::new(Arc::clone(&server.gitops), Arc::clone(&cluster.helm), Arc::clone(&cluster.http))),
        Box::new(FluxFactory::new(
            FluxBackends {
                crds: Arc::clone(&cluster.crds),
                informers: Arc::clone(&cluster.flux_informers),
                objects: Arc::clone(&cluster.flux_objects),
                client: Arc::clone(&server.flux),
                http: Arc::clone(&cluster.http),
                kube_proxy: Arc::clone(&cluster.kube_proxy),
            },
            settings.flux_debounce,
        )),
        Box::new(RemoteDevFactory::new(RemoteDevBackends {
            namespaces: Arc::clone(&cluster.namespaces),
            informer: Arc::clone(&cluster.deployments),
            applier: Arc::clone(&cluster.applier),
        })),
    ]
}

/// Publish the agent id and external URL from each delivered configuration.
fn identity_pre_processor(
    agent_id: Arc<ValueHolder<AgentId>>,
    external_url: Arc<ValueHolder<String>>,
) -> impl Fn(&mut ConfigurationData) -> Result<(), String> + Send + Sync + 'static {
    move |data| {
        if data.config.agent_id != 0 {
            agent_id.set(data.config.agent_id).map_err(|e| format!("agent id: {e}"))?;
        }
        if !data.config.gitlab_external_url.is_empty() {
            external_url
                .set(data.config.gitlab_external_url.clone())
                .map_err(|e| format!("gitlab external url: {e}"))?;
        }
        Ok(())
    }
}

pub struct Agent {
    runner: ModuleRunner,
    watcher: ConfigurationWatcher,
    leader: Arc<LeaderRunner>,
    module_names: Vec<&'static str>,
}

impl Agent {
    pub fn new(
        settings: &Settings,
        server: ServerClients,
        cluster: ClusterClients,
        log_level: Arc<dyn LogLevelControl>,
    ) -> Result<Self, AgentError> {
        let agent_meta = agent_meta(settings);
        let agent_id = Arc::new(ValueHolder::new());
        let external_url = Arc::new(ValueHolder::new());

        let watcher = ConfigurationWatcher::new(
            Arc::clone(&server.configuration),
            agent_meta.clone(),
            CONFIGURATION_BACKOFF.poll_config(Duration::ZERO),
        )
        .with_pre_processor(identity_pre_processor(Arc::clone(&agent_id), Arc::clone(&external_url)));

        let module_cfg = ModuleConfig {
            agent_meta,
            agent_name: settings.agent_name.clone(),
            api: ModuleApi::new(agent_id, external_url, Arc::clone(&server.gitlab)),
        };
        let leader = Arc::new(LeaderRunner::new(Arc::clone(&cluster.elector)));

        let factories = factories(settings, &server, &cluster, log_level);
        let mut modules = Vec::with_capacity(factories.len());
        let mut module_names = Vec::with_capacity(factories.len());
        for factory in &factories {
            let module = maybe_wrap(factory.as_ref(), &module_cfg, &leader)
                .map_err(|source| AgentError::Build { module: factory.name(), source })?;
            modules.push(module);
            module_names.push(factory.name());
        }

        Ok(Self { runner: ModuleRunner::new(modules), watcher, leader, module_names })
    }

    pub fn module_names(&self) -> &[&'static str] {
        &self.module_names
    }

    pub fn leader_state(&self) -> LeaderElectionState {
        self.leader.state()
    }

    /// Run until `cancel` fires or a module fails.
    ///
    /// Modules stop before the leader runner, so no leader module is still
    /// registered when it shuts down.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), AgentError> {
        tracing::info!(modules = ?self.module_names, "starting agent");
        let leader_cancel = CancellationToken::new();
        let refresh_cancel = cancel.child_token();

        let modules = async {
            let run_modules = async {
                let result = self.runner.run_modules(cancel).await;
                refresh_cancel.cancel();
                result
            };
            let (result, ()) =
                tokio::join!(run_modules, self.runner.run_configuration_refresh(&refresh_cancel, &self.watcher));
            leader_cancel.cancel();
            result
        };
        let ((), result) = tokio::join!(self.leader.run(&leader_cancel), modules);

        tracing::info!(commit_id = %self.watcher.last_commit_id(), "agent stopped");
        result.map_err(AgentError::from)
    }
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
