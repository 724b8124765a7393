// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::leader_runner::LeaderElectionState;
use crate::test_support::{cfg, ModuleEvent, TestModule};
use agentk_adapters::leader::FakeElector;
use std::time::Duration;

struct Harness {
    elector: FakeElector,
    runner: Arc<LeaderRunner>,
    runner_cancel: CancellationToken,
    runner_task: JoinHandle<()>,
    cancel: CancellationToken,
    to_wrapper: ConfigSender,
    wrapper_task: JoinHandle<Result<(), ModuleError>>,
}

impl Harness {
    fn start(module: TestModule) -> Self {
        let elector = FakeElector::new();
        let runner = Arc::new(LeaderRunner::new(Arc::new(elector.clone())));
        let runner_cancel = CancellationToken::new();
        let runner_task = tokio::spawn({
            let runner = Arc::clone(&runner);
            let cancel = runner_cancel.clone();
            async move { runner.run(&cancel).await }
        });
        let wrapper = LeaderModuleWrapper::new(Arc::new(module), Arc::clone(&runner));
        let cancel = CancellationToken::new();
        let (to_wrapper, rx) = rendezvous::channel();
        let wrapper_task = tokio::spawn({
            let cancel = cancel.clone();
            async move { wrapper.run(cancel, rx).await }
        });
        Self { elector, runner, runner_cancel, runner_task, cancel, to_wrapper, wrapper_task }
    }

    async fn send(&mut self, agent_id: i64) {
        let permit = self.to_wrapper.ready().await.unwrap();
        assert!(permit.send(Arc::new(cfg(agent_id))).is_ok());
    }

    async fn lead(&self) {
        self.elector.start_leading().await;
        while self.runner.state() != LeaderElectionState::RunningAndLeader {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// Stop the wrapper, then the runner; the runner panics if the wrapper
    /// left a registration behind.
    async fn shutdown(self) -> Result<(), ModuleError> {
        self.cancel.cancel();
        let result = self.wrapper_task.await.unwrap();
        self.runner_cancel.cancel();
        self.runner_task.await.unwrap();
        result
    }
}

#[tokio::test(start_paused = true)]
async fn module_runs_only_while_leading() {
    let (module, mut events) = TestModule::new("leader");
    let mut h = Harness::start(module);
    h.send(1).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(events.try_recv().is_err(), "started without leadership");

    h.lead().await;
    assert_eq!(events.recv().await, Some(ModuleEvent::Started));
    assert_eq!(events.recv().await, Some(ModuleEvent::Config(1)));

    h.elector.stop_leading().await;
    assert_eq!(events.recv().await, Some(ModuleEvent::Stopped));

    // The next term starts a fresh run with the latest configuration.
    h.lead().await;
    assert_eq!(events.recv().await, Some(ModuleEvent::Started));
    assert_eq!(events.recv().await, Some(ModuleEvent::Config(1)));

    h.shutdown().await.unwrap();
    assert_eq!(events.recv().await, Some(ModuleEvent::Stopped));
}

#[tokio::test(start_paused = true)]
async fn newer_configuration_reaches_running_module() {
    let (module, mut events) = TestModule::new("leader");
    let mut h = Harness::start(module);
    h.lead().await;
    h.send(1).await;
    assert_eq!(events.recv().await, Some(ModuleEvent::Started));
    assert_eq!(events.recv().await, Some(ModuleEvent::Config(1)));

    h.send(2).await;
    assert_eq!(events.recv().await, Some(ModuleEvent::Config(2)));
    h.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn unrunnable_configuration_stops_and_unregisters() {
    let (module, mut events) = TestModule::new("leader");
    let mut h = Harness::start(module);
    h.lead().await;
    h.send(1).await;
    assert_eq!(events.recv().await, Some(ModuleEvent::Started));
    assert_eq!(events.recv().await, Some(ModuleEvent::Config(1)));

    h.send(0).await;
    assert_eq!(events.recv().await, Some(ModuleEvent::Stopped));

    // Runnable again: registers and starts right away since we lead.
    h.send(3).await;
    assert_eq!(events.recv().await, Some(ModuleEvent::Started));
    assert_eq!(events.recv().await, Some(ModuleEvent::Config(3)));
    h.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn module_error_is_returned() {
    let (module, mut events) = TestModule::new("leader");
    module.fail_on_agent_id(5);
    let mut h = Harness::start(module);
    h.lead().await;
    h.send(5).await;
    assert_eq!(events.recv().await, Some(ModuleEvent::Started));
    assert_eq!(events.recv().await, Some(ModuleEvent::Config(5)));
    assert_eq!(events.recv().await, Some(ModuleEvent::Stopped));

    let err = h.shutdown().await.unwrap_err();
    assert_eq!(err, ModuleError::Failed("boom".into()));
}

#[tokio::test(start_paused = true)]
async fn closed_configuration_stream_ends_the_wrapper() {
    let (module, mut events) = TestModule::new("leader");
    let mut h = Harness::start(module);
    h.lead().await;
    h.send(1).await;
    assert_eq!(events.recv().await, Some(ModuleEvent::Started));

    let (closed, _) = rendezvous::channel();
    drop(std::mem::replace(&mut h.to_wrapper, closed));
    let result = (&mut h.wrapper_task).await.unwrap();
    assert!(result.is_ok());
    h.runner_cancel.cancel();
    h.runner_task.await.unwrap();
}
