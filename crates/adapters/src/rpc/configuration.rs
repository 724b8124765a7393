// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use agentk_core::{AgentConfiguration, AgentMeta};
use async_trait::async_trait;

use super::{RpcError, RpcStream};

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationRequest {
    /// Last commit the agent processed, so the server can long-poll.
    pub commit_id: String,
    pub agent_meta: AgentMeta,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationResponse {
    pub configuration: AgentConfiguration,
    pub commit_id: String,
}

#[async_trait]
pub trait ConfigurationClient: Send + Sync {
    async fn get_configuration(
        &self,
        req: ConfigurationRequest,
    ) -> Result<RpcStream<ConfigurationResponse>, RpcError>;
}
