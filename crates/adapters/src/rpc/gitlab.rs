// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use async_trait::async_trait;

use super::RpcError;

/// HTTP-shaped request forwarded by the server to the module's API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitLabRequest {
    pub module_name: String,
    pub method: String,
    /// Path relative to the module's API root.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl GitLabRequest {
    /// JSON POST to `path` on behalf of `module_name`.
    pub fn post_json(module_name: &str, path: &str, body: Vec<u8>) -> Self {
        Self {
            module_name: module_name.to_string(),
            method: "POST".to_string(),
            path: path.to_string(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitLabResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait GitLabApi: Send + Sync {
    async fn make_request(&self, req: GitLabRequest) -> Result<GitLabResponse, RpcError>;
}
