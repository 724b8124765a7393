// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scriptable module for engine tests.

use std::sync::Arc;

use agentk_core::AgentConfiguration;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use crate::module::{ConfigReceiver, LeaderModule, Module, ModuleError};

/// What a [`TestModule`] run reports.
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleEvent {
    Started,
    Config(i64),
    Stopped,
}

#[derive(Default)]
struct Script {
    invalid_agent_id: Option<i64>,
    fail_on_agent_id: Option<i64>,
}

/// Reports every configuration received as its agent id. Runnable when the
/// agent id is positive.
#[derive(Clone)]
pub struct TestModule {
    name: &'static str,
    events: mpsc::UnboundedSender<ModuleEvent>,
    gate: Option<Arc<Notify>>,
    script: Arc<Mutex<Script>>,
}

impl TestModule {
    pub fn new(name: &'static str) -> (Self, mpsc::UnboundedReceiver<ModuleEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { name, events, gate: None, script: Arc::default() }, rx)
    }

    /// Block `run` before the first receive until the gate is notified.
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    pub fn reject_agent_id(&self, id: i64) {
        self.script.lock().invalid_agent_id = Some(id);
    }

    /// Return an error from `run` when this agent id is received.
    pub fn fail_on_agent_id(&self, id: i64) {
        self.script.lock().fail_on_agent_id = Some(id);
    }
}

pub fn cfg(agent_id: i64) -> AgentConfiguration {
    AgentConfiguration { agent_id, ..Default::default() }
}

#[async_trait]
impl Module for TestModule {
    fn name(&self) -> &str {
        self.name
    }

    fn default_and_validate(&self, cfg: &mut AgentConfiguration) -> Result<(), ModuleError> {
        if self.script.lock().invalid_agent_id == Some(cfg.agent_id) {
            return Err(ModuleError::invalid(format!("agent id {} is rejected", cfg.agent_id)));
        }
        Ok(())
    }

    async fn run(&self, cancel: CancellationToken, mut cfg: ConfigReceiver) -> Result<(), ModuleError> {
        let _ = self.events.send(ModuleEvent::Started);
        if let Some(gate) = &self.gate {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = gate.notified() => {}
            }
        }
        let result = loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                next = cfg.recv() => next,
            };
            let Some(next) = next else { break Ok(()) };
            let _ = self.events.send(ModuleEvent::Config(next.agent_id));
            if self.script.lock().fail_on_agent_id == Some(next.agent_id) {
                break Err(ModuleError::Failed("boom".to_string()));
            }
        };
        let _ = self.events.send(ModuleEvent::Stopped);
        result
    }
}

impl LeaderModule for TestModule {
    fn is_runnable_configuration(&self, cfg: &AgentConfiguration) -> bool {
        cfg.agent_id > 0
    }
}
