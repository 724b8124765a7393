// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Contracts between the agent and its modules.

use std::sync::Arc;

use agentk_adapters::rpc::{GitLabApi, GitLabRequest, GitLabResponse, RpcError};
use agentk_core::{AgentConfiguration, AgentId, AgentMeta, Cancelled, ValueHolder};
use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::rendezvous;

/// Stream of configurations a module consumes. Only the newest configuration
/// is delivered when the module falls behind.
pub type ConfigReceiver = rendezvous::Receiver<Arc<AgentConfiguration>>;
pub type ConfigSender = rendezvous::Sender<Arc<AgentConfiguration>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModuleError {
    #[error("context canceled")]
    Cancelled,

    /// The configuration is semantically invalid; the server is expected to
    /// send a corrected one.
    #[error("{0}")]
    InvalidConfiguration(String),

    #[error("{0}")]
    Failed(String),
}

impl ModuleError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Prefix the message with `ctx`, keeping the kind.
    pub fn context(self, ctx: &str) -> Self {
        match self {
            Self::Cancelled => Self::Cancelled,
            Self::InvalidConfiguration(m) => Self::InvalidConfiguration(format!("{ctx}: {m}")),
            Self::Failed(m) => Self::Failed(format!("{ctx}: {m}")),
        }
    }
}

impl From<Cancelled> for ModuleError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    /// Fill in defaults and reject invalid settings. Runs before the
    /// configuration is handed to any module.
    fn default_and_validate(&self, cfg: &mut AgentConfiguration) -> Result<(), ModuleError>;

    /// Run until `cancel` fires or the configuration stream ends.
    async fn run(&self, cancel: CancellationToken, cfg: ConfigReceiver) -> Result<(), ModuleError>;
}

/// Module that must only run on the replica holding the leader lease.
pub trait LeaderModule: Module {
    /// Whether `cfg` asks for this module to run at all.
    fn is_runnable_configuration(&self, cfg: &AgentConfiguration) -> bool;
}

pub enum BuiltModule {
    Module(Arc<dyn Module>),
    Leader(Arc<dyn LeaderModule>),
}

impl BuiltModule {
    pub fn is_leader(&self) -> bool {
        matches!(self, Self::Leader(_))
    }
}

/// Shared by every module built for one agent process.
#[derive(Clone)]
pub struct ModuleConfig {
    pub agent_meta: AgentMeta,
    pub agent_name: String,
    pub api: ModuleApi,
}

pub trait Factory: Send + Sync {
    fn name(&self) -> &'static str;

    fn new_module(&self, cfg: &ModuleConfig) -> Result<BuiltModule, ModuleError>;
}

/// Agent facilities offered to modules.
#[derive(Clone)]
pub struct ModuleApi {
    module_name: String,
    agent_id: Arc<ValueHolder<AgentId>>,
    gitlab_external_url: Arc<ValueHolder<String>>,
    gitlab: Arc<dyn GitLabApi>,
}

impl ModuleApi {
    pub fn new(
        agent_id: Arc<ValueHolder<AgentId>>,
        gitlab_external_url: Arc<ValueHolder<String>>,
        gitlab: Arc<dyn GitLabApi>,
    ) -> Self {
        Self { module_name: String::new(), agent_id, gitlab_external_url, gitlab }
    }

    /// Copy bound to `module_name` for server requests.
    pub fn for_module(&self, module_name: &str) -> Self {
        Self { module_name: module_name.to_string(), ..self.clone() }
    }

    pub async fn agent_id(&self, cancel: &CancellationToken) -> Result<AgentId, Cancelled> {
        self.agent_id.get(cancel).await.map_err(|_| Cancelled)
    }

    pub async fn gitlab_external_url(&self, cancel: &CancellationToken) -> Result<String, Cancelled> {
        self.gitlab_external_url.get(cancel).await.map_err(|_| Cancelled)
    }

    pub async fn make_gitlab_request(&self, method: &str, path: &str, body: Vec<u8>) -> Result<GitLabResponse, RpcError> {
        let mut req = GitLabRequest::post_json(&self.module_name, path, body);
        req.method = method.to_string();
        self.gitlab.make_request(req).await
    }
}
