// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! agentk-daemon: process wiring for the agent.
//!
//! The embedder supplies the server transport and Helm actions; everything
//! else is built from the environment and the in-cluster Kubernetes client.

pub mod agent;
pub mod env;
pub mod logging;

use std::sync::Arc;

use agentk_adapters::HelmActions;
use tokio_util::sync::CancellationToken;

pub use agent::{Agent, AgentError, ClusterClients, ServerClients};
pub use env::Settings;
pub use logging::{init_logging, ReloadLogLevel};

/// Install logging, read settings, connect to the cluster and run the agent
/// until `cancel` fires.
pub async fn run_in_cluster(
    cancel: CancellationToken,
    server: ServerClients,
    helm: Arc<dyn HelmActions>,
) -> Result<(), AgentError> {
    let log_level = init_logging()?;
    let settings = Settings::from_env()?;
    let meta = agent::agent_meta(&settings);
    tracing::info!(
        version = %meta.version,
        commit_id = %meta.commit_id,
        pod = %settings.pod_name,
        namespace = %settings.pod_namespace,
        "agentk starting"
    );

    let client = kube::Client::try_default().await.map_err(|e| AgentError::Kube(e.to_string()))?;
    let cluster = ClusterClients::from_kube(client, &settings, helm, &meta.user_agent(&settings.agent_name))?;
    let agent = Agent::new(&settings, server, cluster, Arc::new(log_level))?;
    agent.run(&cancel).await
}
