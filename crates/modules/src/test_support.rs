// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for module tests.

use std::sync::Arc;

use agentk_adapters::rpc::FakeGitLabApi;
use agentk_core::{AgentConfiguration, AgentId, AgentMeta, ValueHolder};
use agentk_engine::{rendezvous, ConfigReceiver, ConfigSender, ModuleApi, ModuleConfig};

pub const AGENT_ID: AgentId = 42;
pub const GITLAB_URL: &str = "https://gitlab.example.com";

/// Api whose agent id and external URL are already known.
pub fn module_api(gitlab: FakeGitLabApi) -> ModuleApi {
    let agent_id = Arc::new(ValueHolder::new());
    let _ = agent_id.set(AGENT_ID);
    let url = Arc::new(ValueHolder::new());
    let _ = url.set(GITLAB_URL.to_string());
    ModuleApi::new(agent_id, url, Arc::new(gitlab))
}

pub fn module_config() -> ModuleConfig {
    ModuleConfig {
        agent_meta: AgentMeta { version: "v17.0.0".into(), commit_id: "abc123".into(), ..Default::default() },
        agent_name: "agentk".into(),
        api: module_api(FakeGitLabApi::new()),
    }
}

pub fn config_channel() -> (ConfigSender, ConfigReceiver) {
    rendezvous::channel()
}

/// Hand `cfg` to the module once it asks for a configuration.
pub async fn send_config(tx: &mut ConfigSender, cfg: AgentConfiguration) {
    if let Some(permit) = tx.ready().await {
        let _ = permit.send(Arc::new(cfg));
    }
}
