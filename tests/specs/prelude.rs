// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for scenario specs.

pub use std::sync::Arc;
pub use std::time::Duration;

pub use agentk_core::{AgentConfiguration, AgentId, ValueHolder};
pub use agentk_engine::{ConfigReceiver, ConfigSender, LeaderModule, Module, ModuleApi, ModuleError};
pub use async_trait::async_trait;
pub use tokio::sync::mpsc;
pub use tokio_util::sync::CancellationToken;

use agentk_adapters::rpc::FakeGitLabApi;
use agentk_core::BackoffConfig;
use agentk_engine::rendezvous;

pub const AGENT_ID: AgentId = 42;

/// Module api with the agent id and external URL already published.
pub fn module_api(gitlab: FakeGitLabApi) -> ModuleApi {
    let agent_id = Arc::new(ValueHolder::new());
    let _ = agent_id.set(AGENT_ID);
    let url = Arc::new(ValueHolder::new());
    let _ = url.set("https://gitlab.example.com".to_string());
    ModuleApi::new(agent_id, url, Arc::new(gitlab))
}

pub fn config_channel() -> (ConfigSender, ConfigReceiver) {
    rendezvous::channel()
}

pub async fn send_config(tx: &mut ConfigSender, cfg: AgentConfiguration) {
    if let Some(permit) = tx.ready().await {
        let _ = permit.send(Arc::new(cfg));
    }
}

pub fn poll() -> agentk_core::PollConfig {
    BackoffConfig::new(Duration::from_secs(1), Duration::from_secs(10), Duration::from_secs(60), 2.0, 0.0)
        .poll_config(Duration::ZERO)
}

pub fn cfg(agent_id: AgentId) -> AgentConfiguration {
    AgentConfiguration { agent_id, ..Default::default() }
}

/// What a [`RecordingModule`] observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Config(AgentId),
    Stopped,
}

/// Reports every configuration it receives and the end of each run.
///
/// A gated module waits for the gate before reading its first
/// configuration.
pub struct RecordingModule {
    events: mpsc::UnboundedSender<Seen>,
    gate: Option<Arc<tokio::sync::Notify>>,
}

impl RecordingModule {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Seen>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { events, gate: None }, rx)
    }

    pub fn gated(mut self) -> (Self, Arc<tokio::sync::Notify>) {
        let gate = Arc::new(tokio::sync::Notify::new());
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }
}

#[async_trait]
impl Module for RecordingModule {
    fn name(&self) -> &str {
        "recording"
    }

    fn default_and_validate(&self, _: &mut AgentConfiguration) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn run(&self, cancel: CancellationToken, mut cfg: ConfigReceiver) -> Result<(), ModuleError> {
        if let Some(gate) = &self.gate {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = gate.notified() => {}
            }
        }
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = cfg.recv() => match next {
                    Some(c) => { let _ = self.events.send(Seen::Config(c.agent_id)); }
                    None => break,
                },
            }
        }
        let _ = self.events.send(Seen::Stopped);
        Ok(())
    }
}

impl LeaderModule for RecordingModule {
    fn is_runnable_configuration(&self, _: &AgentConfiguration) -> bool {
        true
    }
}

/// Next event, failing the test after five seconds.
pub async fn next_seen(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
    tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap()
}
