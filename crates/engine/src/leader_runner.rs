// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runs registered callbacks only while this replica holds the leader lease.
//!
//! All state lives in the single loop of [`LeaderRunner::run`]; registration,
//! removal and elector callbacks are funnelled through channels into it.

use std::collections::BTreeMap;
use std::sync::Arc;

use agentk_adapters::leader::{LeaderCallbacks, LeaderElector};
use agentk_core::{Cancelled, ValueHolder};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Called on the runner's loop when leadership starts. Must not block.
pub type StartFn = Box<dyn Fn() + Send + Sync>;
/// Called on the runner's loop when leadership is lost. Must not block; the
/// returned waiter completes once the module has stopped.
pub type StopFn = Box<dyn Fn() -> StopWaiter + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderElectionState {
    NotRunning,
    RunningButNotLeader,
    RunningAndLeader,
}

/// Completes when a stopped module has finished.
pub struct StopWaiter {
    done: Option<oneshot::Receiver<()>>,
}

impl StopWaiter {
    /// Completes when `done` fires or its sender is dropped.
    pub fn new(done: oneshot::Receiver<()>) -> Self {
        Self { done: Some(done) }
    }

    pub fn stopped() -> Self {
        Self { done: None }
    }

    pub async fn wait(self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        let Some(done) = self.done else {
            return Ok(());
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(Cancelled),
            _ = done => Ok(()),
        }
    }
}

struct Registration {
    start: StartFn,
    stop: StopFn,
    id: Arc<ValueHolder<i32>>,
}

struct Inbox {
    add: mpsc::UnboundedReceiver<Registration>,
    remove: mpsc::UnboundedReceiver<i32>,
}

pub struct LeaderRunner {
    elector: Arc<dyn LeaderElector>,
    add: mpsc::UnboundedSender<Registration>,
    remove: mpsc::UnboundedSender<i32>,
    inbox: Mutex<Option<Inbox>>,
    state: Mutex<LeaderElectionState>,
    /// Fires once `run` has returned or the runner is dropped.
    done: CancellationToken,
}

/// Handle returned by [`LeaderRunner::run_when_leader`].
#[derive(Debug)]
pub struct Unregister {
    id: i32,
    remove: mpsc::UnboundedSender<i32>,
}

impl Unregister {
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Remove the registration. The runner will not call its callbacks again
    /// once it has processed the removal.
    pub fn unregister(self) {
        let _ = self.remove.send(self.id);
    }
}

impl LeaderRunner {
    pub fn new(elector: Arc<dyn LeaderElector>) -> Self {
        let (add, add_rx) = mpsc::unbounded_channel();
        let (remove, remove_rx) = mpsc::unbounded_channel();
        Self {
            elector,
            add,
            remove,
            inbox: Mutex::new(Some(Inbox { add: add_rx, remove: remove_rx })),
            state: Mutex::new(LeaderElectionState::NotRunning),
            done: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> LeaderElectionState {
        *self.state.lock()
    }

    fn set_state(&self, state: LeaderElectionState) {
        *self.state.lock() = state;
    }

    /// Campaign for leadership and drive registered modules until `cancel`
    /// fires.
    ///
    /// # Panics
    ///
    /// When called a second time, when `cancel` fires while registrations
    /// remain, or when a stopped module cannot be waited for.
    #[allow(clippy::panic)]
    pub async fn run(&self, cancel: &CancellationToken) {
        let Some(mut inbox) = self.inbox.lock().take() else {
            panic!("LeaderRunner::run must only be called once");
        };
        let _done = self.done.clone().drop_guard();

        let (started_tx, mut started) = mpsc::channel(1);
        let (stopped_tx, mut stopped) = mpsc::channel(1);
        // The elector is cancelled explicitly, after the registrations are gone.
        let elector_cancel = CancellationToken::new();
        let elector = Arc::clone(&self.elector);
        let mut elector_task = tokio::spawn({
            let cancel = elector_cancel.clone();
            async move { elector.run(cancel, LeaderCallbacks::new(started_tx, stopped_tx)).await }
        });

        self.set_state(LeaderElectionState::RunningButNotLeader);
        let mut modules: BTreeMap<i32, Registration> = BTreeMap::new();
        let mut next_id: i32 = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    while let Ok(id) = inbox.remove.try_recv() {
                        modules.remove(&id);
                    }
                    if !modules.is_empty() {
                        panic!("LeaderRunner stopped with {} module(s) still registered", modules.len());
                    }
                    elector_cancel.cancel();
                    // Late transitions are drained so the elector never blocks on a full channel.
                    loop {
                        tokio::select! {
                            _ = &mut elector_task => break,
                            Some(()) = started.recv() => {}
                            Some(()) = stopped.recv() => {}
                        }
                    }
                    self.set_state(LeaderElectionState::NotRunning);
                    return;
                }
                Some(reg) = inbox.add.recv() => {
                    let id = next_id;
                    next_id = next_id.wrapping_add(1);
                    let _ = reg.id.set(id);
                    if self.state() == LeaderElectionState::RunningAndLeader {
                        (reg.start)();
                    }
                    modules.insert(id, reg);
                }
                Some(id) = inbox.remove.recv() => {
                    modules.remove(&id);
                }
                Some(()) = started.recv() => {
                    if self.state() == LeaderElectionState::RunningButNotLeader {
                        tracing::info!(modules = modules.len(), "started leading, starting leader modules");
                        self.set_state(LeaderElectionState::RunningAndLeader);
                        for reg in modules.values() {
                            (reg.start)();
                        }
                    }
                }
                Some(()) = stopped.recv() => {
                    if self.state() == LeaderElectionState::RunningAndLeader {
                        tracing::info!(modules = modules.len(), "stopped leading, stopping leader modules");
                        let waiters: Vec<StopWaiter> = modules.values().map(|reg| (reg.stop)()).collect();
                        for waiter in waiters {
                            if let Err(e) = waiter.wait(cancel).await {
                                panic!("failed to wait for leader module to stop: {e}");
                            }
                        }
                    }
                    self.set_state(LeaderElectionState::RunningButNotLeader);
                }
            }
        }
    }

    /// Register `start`/`stop` to be called on leadership changes. If this
    /// replica is already leading, `start` is called right away.
    pub async fn run_when_leader(
        &self,
        cancel: &CancellationToken,
        start: StartFn,
        stop: StopFn,
    ) -> Result<Unregister, Cancelled> {
        let id = Arc::new(ValueHolder::new());
        self.add
            .send(Registration { start, stop, id: Arc::clone(&id) })
            .map_err(|_| Cancelled)?;
        match id.get(cancel).await {
            Ok(id) => Ok(Unregister { id, remove: self.remove.clone() }),
            Err(_) => {
                // Already queued; remove it once the runner assigns the id.
                let (remove, done) = (self.remove.clone(), self.done.clone());
                tokio::spawn(async move {
                    if let Ok(id) = id.get(&done).await {
                        let _ = remove.send(id);
                    }
                });
                Err(Cancelled)
            }
        }
    }
}

impl Drop for LeaderRunner {
    fn drop(&mut self) {
        self.done.cancel();
    }
}

#[cfg(test)]
#[path = "leader_runner_tests.rs"]
mod tests;
