// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Payloads of the `/reconcile` workspace exchange.

use serde::{Deserialize, Serialize};

pub(crate) const STATE_TERMINATED: &str = "Terminated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    Full,
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationProgress {
    Terminating,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    Applier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub error_type: ErrorType,
    pub error_message: String,
}

/// What the agent knows about one workspace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceAgentInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_k8s_deployment_info: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_progress: Option<TerminationProgress>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub terminated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<ErrorDetails>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestPayload {
    pub update_type: UpdateType,
    pub workspace_agent_infos: Vec<WorkspaceAgentInfo>,
}

/// What the server wants for one workspace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceRailsInfo {
    pub name: String,
    pub namespace: String,
    pub deployment_resource_version: String,
    pub actual_state: String,
    pub desired_state: String,
    pub config_to_apply: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponsePayload {
    pub workspace_rails_infos: Vec<WorkspaceRailsInfo>,
}
