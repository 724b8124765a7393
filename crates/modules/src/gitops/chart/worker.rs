// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use agentk_adapters::rpc::{GitopsClient, ObjectsToSynchronizeData, PathSpec};
use agentk_adapters::{Chart, ChartFile, HelmActions, HttpClient, ReleaseRequest};
use agentk_core::{AgentConfiguration, AgentId, AttemptResult, ChartCF, ChartSourceCF, ChartValuesCF, GitRefCF, WorkSource};
use agentk_engine::pipeline::{self, Decoded, PipelineConfig};
use agentk_engine::{Worker, WorkerFactory};
use async_trait::async_trait;
use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::values::{merge_values, parse_values, values_from_response};
use super::{DEFAULT_MAX_HISTORY, DEFAULT_NAMESPACE, DEFAULT_URL_MAX_FILE_SIZE, DEFAULT_URL_POLL_PERIOD};
use crate::gitops::{ObjectsScope, ObjectsWatcher, REAPPLY_INTERVAL, SYNC_BACKOFF, WATCH_BACKOFF};

pub struct ChartWorkerFactory {
    gitops: Arc<dyn GitopsClient>,
    helm: Arc<dyn HelmActions>,
    http: Arc<dyn HttpClient>,
}

impl ChartWorkerFactory {
    pub fn new(gitops: Arc<dyn GitopsClient>, helm: Arc<dyn HelmActions>, http: Arc<dyn HttpClient>) -> Self {
        Self { gitops, helm, http }
    }
}

impl WorkerFactory<ChartCF> for ChartWorkerFactory {
    fn new_worker(&self, _: AgentId, source: &WorkSource<ChartCF>) -> Box<dyn Worker> {
        Box::new(ChartWorker {
            chart: source.config.clone(),
            gitops: Arc::clone(&self.gitops),
            helm: Arc::clone(&self.helm),
            http: Arc::clone(&self.http),
        })
    }

    fn sources_from_configuration(&self, cfg: &AgentConfiguration) -> Vec<WorkSource<ChartCF>> {
        let Some(gitops) = &cfg.gitops else {
            return Vec::new();
        };
        gitops.charts.iter().map(|c| WorkSource::new(source_id(c), c.clone())).collect()
    }
}

fn namespace_of(chart: &ChartCF) -> &str {
    chart.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
}

pub(crate) fn source_id(chart: &ChartCF) -> String {
    format!("{}/{}", namespace_of(chart), chart.release_name)
}

/// Chart directory inside the repository, without surrounding slashes.
fn chart_dir(path: &str) -> &str {
    path.trim_matches('/')
}

/// Files of the chart directory, renamed relative to it.
pub(crate) fn chart_files(dir: &str, data: ObjectsToSynchronizeData) -> Vec<ChartFile> {
    data.sources
        .into_iter()
        .filter_map(|s| {
            let name = if dir.is_empty() {
                s.name
            } else {
                s.name.strip_prefix(dir)?.strip_prefix('/')?.to_string()
            };
            Some(ChartFile { name, data: s.data })
        })
        .collect()
}

/// Latest known state of every input of a release.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ChartSources {
    commit_id: String,
    chart: Option<Vec<ChartFile>>,
    /// One slot per values source, in declaration order. `None` until known.
    values: Vec<Option<Value>>,
}

enum SourceEvent {
    Chart { commit_id: String, files: Vec<ChartFile> },
    Values { index: usize, value: Value },
}

#[derive(Debug)]
pub(crate) struct ChartJob {
    commit_id: String,
    request: ReleaseRequest,
}

/// Turns source snapshots into release requests, skipping unchanged ones.
#[derive(Default)]
pub(crate) struct ChartDecoder {
    loaded: Option<(String, Arc<Chart>)>,
    last: Option<(String, Value)>,
}

impl ChartDecoder {
    fn decode(&mut self, chart_cfg: &ChartCF, sources: &ChartSources) -> Result<Decoded<ChartJob>, String> {
        let Some(files) = &sources.chart else {
            return Ok(Decoded::Wait);
        };
        let digest = Chart::digest(files);
        let chart = match &self.loaded {
            Some((loaded_digest, chart)) if *loaded_digest == digest => Arc::clone(chart),
            _ => {
                let chart = Arc::new(
                    Chart::load(files.clone())
                        .map_err(|e| format!("loading chart at commit {}: {e}", sources.commit_id))?,
                );
                self.loaded = Some((digest.clone(), Arc::clone(&chart)));
                chart
            }
        };
        let mut merged = Value::Object(Map::new());
        for value in &sources.values {
            let Some(value) = value else {
                return Ok(Decoded::Wait);
            };
            merge_values(&mut merged, value);
        }
        let key = (digest, merged);
        if self.last.as_ref() == Some(&key) {
            return Ok(Decoded::Wait);
        }
        let values = key.1.clone();
        self.last = Some(key);
        Ok(Decoded::Job(ChartJob {
            commit_id: sources.commit_id.clone(),
            request: ReleaseRequest {
                release_name: chart_cfg.release_name.clone(),
                namespace: namespace_of(chart_cfg).to_string(),
                max_history: chart_cfg.max_history.unwrap_or(DEFAULT_MAX_HISTORY),
                chart,
                values,
            },
        }))
    }
}

struct ChartWorker {
    chart: ChartCF,
    gitops: Arc<dyn GitopsClient>,
    helm: Arc<dyn HelmActions>,
    http: Arc<dyn HttpClient>,
}

impl ChartWorker {
    fn watcher(&self) -> ObjectsWatcher {
        ObjectsWatcher::new(Arc::clone(&self.gitops), WATCH_BACKOFF.poll_config(Duration::ZERO))
    }

    /// Watch every source and send a fresh snapshot whenever one changes.
    async fn gather(&self, cancel: &CancellationToken, desired: mpsc::Sender<ChartSources>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut initial = ChartSources { commit_id: String::new(), chart: None, values: Vec::new() };
        let mut tasks: Vec<BoxFuture<'_, ()>> = Vec::new();
        tasks.push(self.watch_chart(cancel, events_tx.clone()).boxed());
        for (index, value) in self.chart.values.iter().enumerate() {
            match value {
                ChartValuesCF::Inline(v) => {
                    initial.values.push(Some(if v.is_null() { Value::Object(Map::new()) } else { v.clone() }));
                }
                ChartValuesCF::File(file) => {
                    initial.values.push(None);
                    let scope = ObjectsScope {
                        project_id: file.project_id.clone().unwrap_or_default(),
                        git_ref: GitRefCF::resolve(file.git_ref.as_ref()),
                        paths: vec![PathSpec::File(file.file.clone())],
                    };
                    let watch = self.watch_values_file(cancel, scope, file.file.clone(), index, events_tx.clone());
                    tasks.push(watch.boxed());
                }
                ChartValuesCF::Url(url) => {
                    initial.values.push(None);
                    let url = UrlSource {
                        url: url.url.clone(),
                        poll_period: url.poll_period.unwrap_or(DEFAULT_URL_POLL_PERIOD),
                        max_file_size: url.max_file_size.unwrap_or(DEFAULT_URL_MAX_FILE_SIZE) as usize,
                    };
                    tasks.push(self.poll_url(cancel, url, index, events_tx.clone()).boxed());
                }
            }
        }
        drop(events_tx);
        tasks.push(aggregate(cancel, initial, events_rx, desired).boxed());
        join_all(tasks).await;
    }

    async fn watch_chart(&self, cancel: &CancellationToken, events: mpsc::UnboundedSender<SourceEvent>) {
        let ChartSourceCF::Project(project) = &self.chart.source;
        let dir = chart_dir(&project.path);
        let glob = if dir.is_empty() { "**".to_string() } else { format!("{dir}/**") };
        let scope = ObjectsScope {
            project_id: project.id.clone(),
            git_ref: GitRefCF::resolve(project.git_ref.as_ref()),
            paths: vec![PathSpec::Glob(glob)],
        };
        let events = &events;
        self.watcher()
            .watch(cancel, &scope, |data| async move {
                let commit_id = data.commit_id.clone();
                let _ = events.send(SourceEvent::Chart { commit_id, files: chart_files(dir, data) });
            })
            .await;
    }

    async fn watch_values_file(
        &self,
        cancel: &CancellationToken,
        scope: ObjectsScope,
        file: String,
        index: usize,
        events: mpsc::UnboundedSender<SourceEvent>,
    ) {
        let (events, file) = (&events, &file);
        let release = &self.chart.release_name;
        self.watcher()
            .watch(cancel, &scope, |data| async move {
                let Some(source) = data.sources.iter().find(|s| s.name == *file) else {
                    tracing::warn!(release = %release, file = %file, commit_id = %data.commit_id, "Values file not found");
                    return;
                };
                match parse_values(&source.data) {
                    Ok(value) => {
                        let _ = events.send(SourceEvent::Values { index, value });
                    }
                    Err(e) => {
                        tracing::warn!(
                            release = %release,
                            file = %file,
                            commit_id = %data.commit_id,
                            error = %e,
                            "Failed to parse values file"
                        );
                    }
                }
            })
            .await;
    }

    async fn poll_url(
        &self,
        cancel: &CancellationToken,
        source: UrlSource,
        index: usize,
        events: mpsc::UnboundedSender<SourceEvent>,
    ) {
        loop {
            let fetched = tokio::select! {
                _ = cancel.cancelled() => return,
                fetched = self.fetch_url(&source) => fetched,
            };
            match fetched {
                Ok(value) => {
                    if events.send(SourceEvent::Values { index, value }).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        release = %self.chart.release_name,
                        url = %source.url,
                        error = %e,
                        "Failed to fetch values from URL"
                    );
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(source.poll_period) => {}
            }
        }
    }

    async fn fetch_url(&self, source: &UrlSource) -> Result<Value, String> {
        let resp = self.http.get(&source.url, source.max_file_size).await.map_err(|e| e.to_string())?;
        values_from_response(&resp, source.max_file_size)
    }

    async fn apply(&self, cancel: CancellationToken, job: Arc<ChartJob>) -> AttemptResult {
        let req = &job.request;
        let release = req.release_name.as_str();
        let namespace = req.namespace.as_str();
        tracing::info!(release, namespace, commit_id = %job.commit_id, "Synchronizing chart");
        let result = match self.helm.is_installed(&cancel, release, namespace).await {
            Ok(true) => self.helm.upgrade(&cancel, req).await,
            Ok(false) => self.helm.install(&cancel, req).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                tracing::info!(release, namespace, commit_id = %job.commit_id, "Chart synchronized");
                AttemptResult::Continue
            }
            Err(e) if e.is_cancelled() || cancel.is_cancelled() => {
                tracing::info!(release, namespace, "Chart synchronization was canceled");
                AttemptResult::Backoff
            }
            Err(e) => {
                tracing::warn!(release, namespace, error = %e, "Chart synchronization failed");
                AttemptResult::Backoff
            }
        }
    }
}

struct UrlSource {
    url: String,
    poll_period: Duration,
    max_file_size: usize,
}

/// Fold source events into snapshots. Unchanged snapshots are not resent.
async fn aggregate(
    cancel: &CancellationToken,
    mut state: ChartSources,
    mut events: mpsc::UnboundedReceiver<SourceEvent>,
    desired: mpsc::Sender<ChartSources>,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return,
            event = events.recv() => event,
        };
        let Some(event) = event else { return };
        let changed = match event {
            SourceEvent::Chart { commit_id, files } => {
                let changed = state.chart.as_ref() != Some(&files);
                state.commit_id = commit_id;
                state.chart = Some(files);
                changed
            }
            SourceEvent::Values { index, value } => match state.values.get_mut(index) {
                Some(slot) if slot.as_ref() != Some(&value) => {
                    *slot = Some(value);
                    true
                }
                _ => false,
            },
        };
        if !changed {
            continue;
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = desired.send(state.clone()) => {}
        }
    }
}

#[async_trait]
impl Worker for ChartWorker {
    async fn run(&self, cancel: CancellationToken) {
        let cfg = PipelineConfig {
            decode_backoff: SYNC_BACKOFF,
            apply_backoff: SYNC_BACKOFF,
            reapply_interval: REAPPLY_INTERVAL,
        };
        let mut decoder = ChartDecoder::default();
        let cancel = &cancel;
        pipeline::run(
            cancel,
            &cfg,
            |desired| self.gather(cancel, desired),
            |sources: &ChartSources| decoder.decode(&self.chart, sources),
            |job_cancel, job| self.apply(job_cancel, job),
        )
        .await;
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
