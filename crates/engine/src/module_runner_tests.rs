// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::{cfg, ModuleEvent, TestModule};
use std::time::Duration;

fn spawn_runner(runner: &Arc<ModuleRunner>, cancel: &CancellationToken) -> tokio::task::JoinHandle<Result<(), ModuleError>> {
    let runner = Arc::clone(runner);
    let cancel = cancel.clone();
    tokio::spawn(async move { runner.run_modules(&cancel).await })
}

#[tokio::test(start_paused = true)]
async fn slow_module_sees_only_the_latest_configuration() {
    let (module, mut events) = TestModule::new("slow");
    let (module, gate) = module.gated();
    let runner = Arc::new(ModuleRunner::new(vec![Arc::new(module)]));
    let cancel = CancellationToken::new();
    let task = spawn_runner(&runner, &cancel);
    assert_eq!(events.recv().await, Some(ModuleEvent::Started));

    for id in 1..=3 {
        runner.apply_configuration("commit", cfg(id)).await.unwrap();
    }
    gate.notify_one();

    assert_eq!(events.recv().await, Some(ModuleEvent::Config(3)));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(events.try_recv().is_err());

    cancel.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn every_module_receives_the_configuration() {
    let (a, mut a_events) = TestModule::new("a");
    let (b, mut b_events) = TestModule::new("b");
    let runner = Arc::new(ModuleRunner::new(vec![Arc::new(a), Arc::new(b)]));
    let cancel = CancellationToken::new();
    let task = spawn_runner(&runner, &cancel);

    runner.apply_configuration("commit", cfg(7)).await.unwrap();
    for events in [&mut a_events, &mut b_events] {
        assert_eq!(events.recv().await, Some(ModuleEvent::Started));
        assert_eq!(events.recv().await, Some(ModuleEvent::Config(7)));
    }

    cancel.cancel();
    task.await.unwrap().unwrap();
    assert_eq!(a_events.recv().await, Some(ModuleEvent::Stopped));
}

#[tokio::test(start_paused = true)]
async fn validation_error_rejects_the_whole_configuration() {
    let (a, mut a_events) = TestModule::new("a");
    let (b, _b_events) = TestModule::new("b");
    b.reject_agent_id(2);
    let runner = Arc::new(ModuleRunner::new(vec![Arc::new(a), Arc::new(b)]));
    let cancel = CancellationToken::new();
    let task = spawn_runner(&runner, &cancel);
    assert_eq!(a_events.recv().await, Some(ModuleEvent::Started));

    let err = runner.apply_configuration("commit", cfg(2)).await.unwrap_err();
    assert_eq!(err, ModuleError::InvalidConfiguration("b: agent id 2 is rejected".into()));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(a_events.try_recv().is_err());

    cancel.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn failing_module_stops_the_others() {
    let (a, mut a_events) = TestModule::new("a");
    let (b, _b_events) = TestModule::new("b");
    b.fail_on_agent_id(9);
    let runner = Arc::new(ModuleRunner::new(vec![Arc::new(a), Arc::new(b)]));
    let cancel = CancellationToken::new();
    let task = spawn_runner(&runner, &cancel);

    runner.apply_configuration("commit", cfg(9)).await.unwrap();
    let err = task.await.unwrap().unwrap_err();
    assert_eq!(err, ModuleError::Failed("b: boom".into()));

    // Module `a` may or may not have seen the configuration before it was cancelled.
    let mut last = None;
    while last != Some(ModuleEvent::Stopped) {
        last = a_events.recv().await;
    }
}

#[tokio::test]
async fn modules_can_only_be_run_once() {
    let (a, _events) = TestModule::new("a");
    let runner = Arc::new(ModuleRunner::new(vec![Arc::new(a)]));
    let cancel = CancellationToken::new();
    cancel.cancel();
    runner.run_modules(&cancel).await.unwrap();
    assert!(runner.run_modules(&cancel).await.is_err());
}
