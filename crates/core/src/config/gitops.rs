// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::secs;

/// Branch the server resolves when no ref is configured.
pub const DEFAULT_BRANCH: &str = "HEAD";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GitopsCF {
    pub manifest_projects: Vec<ManifestProjectCF>,
    pub charts: Vec<ChartCF>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestProjectCF {
    /// Project path, e.g. `group/project`.
    pub id: Option<String>,
    #[serde(rename = "ref")]
    pub git_ref: Option<GitRefCF>,
    pub default_namespace: String,
    pub paths: Vec<PathCF>,
    #[serde(with = "secs")]
    pub reconcile_timeout: Option<Duration>,
    pub dry_run_strategy: String,
    pub prune: Option<bool>,
    #[serde(with = "secs")]
    pub prune_timeout: Option<Duration>,
    pub prune_propagation_policy: String,
    pub inventory_policy: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathCF {
    pub glob: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitRefCF {
    Tag(String),
    Branch(String),
    Commit(String),
}

impl GitRefCF {
    /// Fully qualified ref, a raw commit sha, or the default branch.
    pub fn resolve(git_ref: Option<&GitRefCF>) -> String {
        match git_ref {
            Some(GitRefCF::Tag(tag)) => format!("refs/tags/{tag}"),
            Some(GitRefCF::Branch(branch)) => format!("refs/heads/{branch}"),
            Some(GitRefCF::Commit(commit)) => commit.clone(),
            None => DEFAULT_BRANCH.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartCF {
    pub release_name: String,
    pub source: ChartSourceCF,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub max_history: Option<i32>,
    #[serde(default)]
    pub values: Vec<ChartValuesCF>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartSourceCF {
    Project(ProjectSourceCF),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSourceCF {
    pub id: String,
    #[serde(rename = "ref")]
    pub git_ref: Option<GitRefCF>,
    /// Directory of the chart inside the repository.
    pub path: String,
}

/// One source of chart values. Sources are merged in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartValuesCF {
    Inline(serde_json::Value),
    File(ValuesFileCF),
    Url(ValuesUrlCF),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValuesFileCF {
    pub project_id: Option<String>,
    #[serde(rename = "ref")]
    pub git_ref: Option<GitRefCF>,
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValuesUrlCF {
    pub url: String,
    #[serde(with = "secs")]
    pub poll_period: Option<Duration>,
    pub max_file_size: Option<u32>,
}
