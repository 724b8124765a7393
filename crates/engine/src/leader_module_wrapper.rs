// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runs a [`LeaderModule`] under the streaming configuration contract.
//!
//! The wrapper registers with the [`LeaderRunner`] while the configuration is
//! runnable. Leadership callbacks are turned into requests for the wrapper's
//! own loop, which starts the module with a fresh configuration stream on
//! every leadership term and stops it when leadership or runnability is lost.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use agentk_core::{AgentConfiguration, Cancelled};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::leader_runner::{LeaderRunner, StopWaiter, Unregister};
use crate::module::{BuiltModule, ConfigReceiver, ConfigSender, Factory, LeaderModule, Module, ModuleConfig, ModuleError};
use crate::rendezvous::{self, Permit};

type Cfg = Arc<AgentConfiguration>;
type Registering = Pin<Box<dyn Future<Output = Result<Unregister, Cancelled>> + Send>>;

enum LeaderRequest {
    Start,
    Stop(oneshot::Sender<()>),
}

struct Running {
    cancel: CancellationToken,
    to_module: ConfigSender,
    /// Configuration not yet taken by the module.
    pending: Option<Cfg>,
    task: JoinHandle<Result<(), ModuleError>>,
}

pub struct LeaderModuleWrapper {
    module: Arc<dyn LeaderModule>,
    runner: Arc<LeaderRunner>,
}

impl LeaderModuleWrapper {
    pub fn new(module: Arc<dyn LeaderModule>, runner: Arc<LeaderRunner>) -> Self {
        Self { module, runner }
    }

    fn register(&self, cancel: &CancellationToken, requests: &mpsc::UnboundedSender<LeaderRequest>) -> Registering {
        let runner = Arc::clone(&self.runner);
        let cancel = cancel.clone();
        let start_tx = requests.clone();
        let stop_tx = requests.clone();
        Box::pin(async move {
            runner
                .run_when_leader(
                    &cancel,
                    Box::new(move || {
                        let _ = start_tx.send(LeaderRequest::Start);
                    }),
                    Box::new(move || {
                        let (done, waiter) = oneshot::channel();
                        let _ = stop_tx.send(LeaderRequest::Stop(done));
                        StopWaiter::new(waiter)
                    }),
                )
                .await
        })
    }

    fn start_module(&self, cfg: Cfg) -> Running {
        let cancel = CancellationToken::new();
        let (to_module, module_rx) = rendezvous::channel();
        let module = Arc::clone(&self.module);
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { module.run(cancel, module_rx).await }
        });
        tracing::info!(module = %self.module.name(), "starting leader module");
        Running { cancel, to_module, pending: Some(cfg), task }
    }
}

async fn stop_module(name: &str, running: &mut Option<Running>) {
    let Some(r) = running.take() else {
        return;
    };
    tracing::info!(module = %name, "stopping leader module");
    r.cancel.cancel();
    match r.task.await {
        Ok(Ok(())) | Ok(Err(ModuleError::Cancelled)) => {}
        Ok(Err(e)) => tracing::warn!(module = %name, error = %e, "leader module failed while stopping"),
        Err(e) => tracing::error!(module = %name, error = %e, "leader module task failed"),
    }
}

async fn module_ready(tx: Option<&mut ConfigSender>) -> Option<Permit<Cfg>> {
    match tx {
        Some(tx) => tx.ready().await,
        None => std::future::pending().await,
    }
}

async fn module_exit(task: Option<&mut JoinHandle<Result<(), ModuleError>>>) -> Result<Result<(), ModuleError>, JoinError> {
    match task {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}

async fn registered(registering: Option<&mut Registering>) -> Result<Unregister, Cancelled> {
    match registering {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

#[async_trait]
impl Module for LeaderModuleWrapper {
    fn name(&self) -> &str {
        self.module.name()
    }

    fn default_and_validate(&self, cfg: &mut AgentConfiguration) -> Result<(), ModuleError> {
        self.module.default_and_validate(cfg)
    }

    async fn run(&self, cancel: CancellationToken, mut cfg_rx: ConfigReceiver) -> Result<(), ModuleError> {
        let name = self.module.name().to_string();
        let (requests_tx, mut requests) = mpsc::unbounded_channel();
        let register_cancel = CancellationToken::new();
        let mut latest: Option<Cfg> = None;
        let mut registration: Option<Unregister> = None;
        let mut registering: Option<Registering> = None;
        let mut running: Option<Running> = None;

        let result = loop {
            let (send, exit) = match running.as_mut() {
                Some(r) => (r.pending.is_some().then_some(&mut r.to_module), Some(&mut r.task)),
                None => (None, None),
            };
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                cfg = cfg_rx.recv() => {
                    let Some(cfg) = cfg else { break Ok(()) };
                    if !self.module.is_runnable_configuration(&cfg) {
                        stop_module(&name, &mut running).await;
                        if let Some(reg) = registration.take() {
                            reg.unregister();
                        }
                        latest = None;
                        continue;
                    }
                    latest = Some(Arc::clone(&cfg));
                    match running.as_mut() {
                        Some(r) => r.pending = Some(cfg),
                        None if registering.is_none() => {
                            // Re-registering makes a leading runner start us right away.
                            if let Some(reg) = registration.take() {
                                reg.unregister();
                            }
                            registering = Some(self.register(&register_cancel, &requests_tx));
                        }
                        None => {}
                    }
                }
                res = registered(registering.as_mut()) => {
                    registering = None;
                    if let Ok(reg) = res {
                        if latest.is_some() {
                            registration = Some(reg);
                        } else {
                            reg.unregister();
                        }
                    }
                }
                Some(req) = requests.recv() => match req {
                    LeaderRequest::Start => {
                        if running.is_none() {
                            if let Some(cfg) = latest.clone() {
                                running = Some(self.start_module(cfg));
                            }
                        }
                    }
                    LeaderRequest::Stop(done) => {
                        stop_module(&name, &mut running).await;
                        let _ = done.send(());
                    }
                },
                permit = module_ready(send) => {
                    if let (Some(permit), Some(r)) = (permit, running.as_mut()) {
                        if let Some(cfg) = r.pending.take() {
                            if let Err(cfg) = permit.send(cfg) {
                                r.pending = Some(cfg);
                            }
                        }
                    }
                }
                res = module_exit(exit) => {
                    let had_pending = running.take().is_some_and(|r| r.pending.is_some());
                    match res {
                        Ok(Ok(())) | Ok(Err(ModuleError::Cancelled)) => {}
                        Ok(Err(e)) => break Err(e),
                        Err(e) => break Err(ModuleError::Failed(format!("leader module task failed: {e}"))),
                    }
                    if had_pending && latest.is_some() && registering.is_none() {
                        if let Some(reg) = registration.take() {
                            reg.unregister();
                        }
                        registering = Some(self.register(&register_cancel, &requests_tx));
                    }
                }
            }
        };

        stop_module(&name, &mut running).await;
        register_cancel.cancel();
        if let Some(fut) = registering.take() {
            if let Ok(reg) = fut.await {
                reg.unregister();
            }
        }
        if let Some(reg) = registration.take() {
            reg.unregister();
        }
        result
    }
}

/// Build the module for `factory`, wrapping leader modules.
pub fn maybe_wrap(
    factory: &dyn Factory,
    cfg: &ModuleConfig,
    runner: &Arc<LeaderRunner>,
) -> Result<Arc<dyn Module>, ModuleError> {
    Ok(match factory.new_module(cfg)? {
        BuiltModule::Module(module) => module,
        BuiltModule::Leader(module) => Arc::new(LeaderModuleWrapper::new(module, Arc::clone(runner))),
    })
}

#[cfg(test)]
#[path = "leader_module_wrapper_tests.rs"]
mod tests;
