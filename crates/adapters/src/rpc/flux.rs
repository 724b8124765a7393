// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use async_trait::async_trait;

use super::{RpcError, RpcStream};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileProjectsRequest {
    /// Project paths to receive events for.
    pub projects: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectEvent {
    pub project_id: String,
}

#[async_trait]
pub trait FluxClient: Send + Sync {
    async fn reconcile_projects(
        &self,
        req: ReconcileProjectsRequest,
    ) -> Result<RpcStream<ProjectEvent>, RpcError>;
}
