// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use async_trait::async_trait;

use super::{RpcError, RpcStream};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSpec {
    Glob(String),
    File(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectsToSynchronizeRequest {
    pub project_id: String,
    /// Resolved ref: `refs/heads/..`, `refs/tags/..`, a commit sha or `HEAD`.
    pub git_ref: String,
    pub commit_id: String,
    pub paths: Vec<PathSpec>,
}

/// One file from the repository. `name` is relative to the repository root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSource {
    pub name: String,
    pub data: Vec<u8>,
}

/// Desired state for a project at a commit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObjectsToSynchronizeData {
    pub commit_id: String,
    pub project_id: i64,
    pub sources: Vec<ObjectSource>,
}

#[async_trait]
pub trait GitopsClient: Send + Sync {
    async fn objects_to_synchronize(
        &self,
        req: ObjectsToSynchronizeRequest,
    ) -> Result<RpcStream<ObjectsToSynchronizeData>, RpcError>;
}
