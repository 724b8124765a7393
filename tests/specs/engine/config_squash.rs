// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A busy module only sees the newest configuration.

use crate::prelude::*;
use agentk_adapters::rpc::{ConfigurationResponse, FakeConfigurationClient, StreamScript};
use agentk_core::AgentMeta;
use agentk_engine::{ConfigurationWatcher, ModuleRunner};

fn response(agent_id: AgentId) -> ConfigurationResponse {
    ConfigurationResponse { configuration: cfg(agent_id), commit_id: format!("c{agent_id}") }
}

#[tokio::test]
async fn blocked_module_receives_only_the_last_configuration() {
    let (module, mut seen) = RecordingModule::new();
    let (module, gate) = module.gated();
    let runner = Arc::new(ModuleRunner::new(vec![Arc::new(module)]));

    let client = FakeConfigurationClient::new();
    client.push(StreamScript::Items(vec![Ok(response(1)), Ok(response(2)), Ok(response(3))]));
    let watcher = Arc::new(ConfigurationWatcher::new(Arc::new(client), AgentMeta::default(), poll()));

    let cancel = CancellationToken::new();
    let modules = tokio::spawn({
        let (runner, cancel) = (Arc::clone(&runner), cancel.clone());
        async move { runner.run_modules(&cancel).await }
    });
    let refresh = tokio::spawn({
        let (runner, watcher, cancel) = (Arc::clone(&runner), Arc::clone(&watcher), cancel.clone());
        async move { runner.run_configuration_refresh(&cancel, &watcher).await }
    });

    tokio::time::timeout(Duration::from_secs(5), async {
        while watcher.last_commit_id() != "c3" {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    // let the pipe take the last write
    tokio::time::sleep(Duration::from_millis(50)).await;

    gate.notify_one();
    assert_eq!(next_seen(&mut seen).await, Seen::Config(3));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(seen.try_recv().is_err(), "older configurations must not be delivered");

    cancel.cancel();
    modules.await.unwrap().unwrap();
    refresh.await.unwrap();
    assert_eq!(next_seen(&mut seen).await, Seen::Stopped);
}
