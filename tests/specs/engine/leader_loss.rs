// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Leader modules follow the lease.

use crate::prelude::*;
use agentk_adapters::FakeElector;
use agentk_engine::{LeaderElectionState, LeaderModuleWrapper, LeaderRunner};

#[tokio::test]
async fn losing_the_lease_stops_the_module_before_it_restarts() {
    let elector = FakeElector::new();
    let leader = Arc::new(LeaderRunner::new(Arc::new(elector.clone())));
    let leader_cancel = CancellationToken::new();
    let leader_task = tokio::spawn({
        let (leader, cancel) = (Arc::clone(&leader), leader_cancel.clone());
        async move { leader.run(&cancel).await }
    });

    let (module, mut seen) = RecordingModule::new();
    let wrapper = Arc::new(LeaderModuleWrapper::new(Arc::new(module), Arc::clone(&leader)));
    let (mut tx, rx) = config_channel();
    let cancel = CancellationToken::new();
    let module_task = tokio::spawn({
        let (wrapper, cancel) = (Arc::clone(&wrapper), cancel.clone());
        async move { wrapper.run(cancel, rx).await }
    });
    send_config(&mut tx, cfg(7)).await;

    elector.start_leading().await;
    assert_eq!(next_seen(&mut seen).await, Seen::Config(7));
    assert_eq!(leader.state(), LeaderElectionState::RunningAndLeader);

    elector.stop_leading().await;
    elector.start_leading().await;
    assert_eq!(next_seen(&mut seen).await, Seen::Stopped);
    assert_eq!(next_seen(&mut seen).await, Seen::Config(7));

    cancel.cancel();
    module_task.await.unwrap().unwrap();
    assert_eq!(next_seen(&mut seen).await, Seen::Stopped);

    leader_cancel.cancel();
    leader_task.await.unwrap();
    assert_eq!(leader.state(), LeaderElectionState::NotRunning);
}
