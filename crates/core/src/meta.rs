// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identity of the running agent process.

use serde::{Deserialize, Serialize};

/// Created at startup and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AgentMeta {
    pub version: String,
    pub commit_id: String,
    pub pod_namespace: String,
    pub pod_name: String,
    #[serde(default)]
    pub kubernetes_version: KubernetesVersion,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KubernetesVersion {
    pub major: String,
    pub minor: String,
    pub git_version: String,
    pub platform: String,
}

impl AgentMeta {
    /// User agent sent with every server call: `<agent>/<version>/<commit>`.
    pub fn user_agent(&self, agent_name: &str) -> String {
        format!("{}/{}/{}", agent_name, self.version, self.commit_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_joins_name_version_commit() {
        let meta = AgentMeta { version: "v16.1.0".into(), commit_id: "abc123".into(), ..Default::default() };
        assert_eq!(meta.user_agent("agentk"), "agentk/v16.1.0/abc123");
    }
}
