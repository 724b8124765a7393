// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use agentk_core::AgentMeta;
use async_trait::async_trait;

use super::RpcError;

#[derive(Debug, Clone, PartialEq)]
pub struct RegisterRequest {
    pub agent_meta: AgentMeta,
    pub pod_id: i64,
}

#[async_trait]
pub trait AgentRegistrarClient: Send + Sync {
    async fn register(&self, req: RegisterRequest) -> Result<(), RpcError>;
}
