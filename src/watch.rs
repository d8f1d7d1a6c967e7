//! Incremental watch-mode re-scheduling loop.
//!
//! Wraps the builder and execution manager in a `while not cancelled`
//! loop: block until a batch of project changes arrives, widen it to the
//! changed projects' transitive consumers, narrow to the watched set,
//! rebuild a fresh operation graph for that selection, and execute it. A
//! failing build is logged and the loop keeps waiting - only cancellation
//! or a closed change source ends it.
//!
//! Each iteration constructs new operation instances: statuses and
//! dependency edges are consumed destructively by a run, so the previous
//! graph is never reused.

use crate::errors::ExecuteError;
use crate::operation::{ExecutionManager, OperationGraphBuilder};
use crate::phase::PhaseSet;
use crate::project::{ProjectGraph, ProjectId};
use crate::runner::RunnerFactory;
use crate::selection;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

/// One project reported as changed, with an opaque change token from the
/// file watcher (e.g. a digest of the changed paths).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectChange {
    pub project: ProjectId,
    pub token: String,
}

/// Supplies batches of changed projects. `None` means the source closed
/// and the loop should end.
#[async_trait]
pub trait ChangeSource: Send {
    async fn next_changes(&mut self) -> Option<Vec<ProjectChange>>;
}

/// Any mpsc receiver of change batches is a change source.
#[async_trait]
impl ChangeSource for mpsc::Receiver<Vec<ProjectChange>> {
    async fn next_changes(&mut self) -> Option<Vec<ProjectChange>> {
        self.recv().await
    }
}

/// Memoized per-project change fingerprints. Hashing is skipped entirely
/// when a project reports the same change token as last time.
#[derive(Debug, Default)]
pub struct FingerprintCache {
    entries: HashMap<String, (String, String)>,
}

impl FingerprintCache {
    /// Digest for one project's change token, reusing the previous digest
    /// when the token is unchanged.
    pub fn fingerprint(&mut self, project: &str, token: &str) -> String {
        if let Some((cached_token, digest)) = self.entries.get(project)
            && cached_token == token
        {
            return digest.clone();
        }
        let mut hasher = Sha256::new();
        hasher.update(project.as_bytes());
        hasher.update(b"\0");
        hasher.update(token.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        self.entries
            .insert(project.to_string(), (token.to_string(), digest.clone()));
        digest
    }

    /// Latest digest per project, for handing to runners.
    pub fn digests(&self) -> HashMap<String, String> {
        self.entries
            .iter()
            .map(|(project, (_, digest))| (project.clone(), digest.clone()))
            .collect()
    }
}

/// Aggregate outcome of a watch session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    /// Builds that were executed.
    pub iterations: usize,
    /// Builds that ended in failure (and were logged rather than
    /// propagated).
    pub failed_iterations: usize,
}

/// Repeatedly rebuilds and re-executes the affected subgraph as projects
/// change.
pub struct WatchLoop<'a> {
    projects: &'a ProjectGraph,
    phases: &'a PhaseSet,
    factory: &'a dyn RunnerFactory,
    manager: ExecutionManager,
    watched: BTreeSet<ProjectId>,
    phase_selection: BTreeSet<String>,
    fingerprints: FingerprintCache,
    shutdown: watch::Receiver<bool>,
}

impl<'a> WatchLoop<'a> {
    pub fn new(
        projects: &'a ProjectGraph,
        phases: &'a PhaseSet,
        factory: &'a dyn RunnerFactory,
        manager: ExecutionManager,
        watched: BTreeSet<ProjectId>,
        phase_selection: BTreeSet<String>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            projects,
            phases,
            factory,
            manager,
            watched,
            phase_selection,
            fingerprints: FingerprintCache::default(),
            shutdown,
        }
    }

    /// Run until cancelled or the change source closes.
    ///
    /// The first iteration fires immediately with the full watched
    /// selection; later iterations run only the changed projects'
    /// consumer closure, intersected with the watched set.
    pub async fn run(mut self, mut source: impl ChangeSource) -> Result<WatchSummary, ExecuteError> {
        let mut summary = WatchSummary::default();
        let mut selection = self.watched.clone();

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            if !selection.is_empty() {
                self.run_once(&selection, &mut summary).await;
            }

            selection = tokio::select! {
                _ = cancelled(&mut self.shutdown) => break,
                changes = source.next_changes() => match changes {
                    None => break,
                    Some(batch) => self.narrow(&batch),
                },
            };
        }

        info!(
            iterations = summary.iterations,
            failed = summary.failed_iterations,
            "watch loop ended"
        );
        Ok(summary)
    }

    /// Changed projects plus everything that consumes them, restricted to
    /// the watched set. Also refreshes the fingerprint cache.
    fn narrow(&mut self, batch: &[ProjectChange]) -> BTreeSet<ProjectId> {
        let changed: BTreeSet<ProjectId> = batch.iter().map(|c| c.project).collect();
        for change in batch {
            let name = self.projects.name_of(change.project);
            self.fingerprints.fingerprint(name, &change.token);
        }
        let affected = selection::expand_all_consumers(self.projects, &changed);
        selection::intersection(&affected, [&self.watched])
    }

    async fn run_once(&mut self, selected: &BTreeSet<ProjectId>, summary: &mut WatchSummary) {
        debug!(projects = selected.len(), "watch iteration starting");

        let graph = OperationGraphBuilder::new(self.projects, self.phases)
            .with_project_selection(selected.clone())
            .with_phase_selection(self.phase_selection.clone())
            .build(self.factory);

        let graph = match graph {
            Ok(graph) => graph,
            Err(e) => {
                // Configuration went bad mid-session; keep watching.
                summary.iterations += 1;
                summary.failed_iterations += 1;
                error!(error = %e, "failed to rebuild operation graph");
                return;
            }
        };

        let manager = self
            .manager
            .clone()
            .with_fingerprints(self.fingerprints.digests());

        summary.iterations += 1;
        match manager.execute(graph).await {
            Ok(result) if result.success => {
                debug!("watch iteration succeeded");
            }
            Ok(result) => {
                summary.failed_iterations += 1;
                error!(
                    failed = result.failed_keys().len(),
                    blocked = result.blocked_keys().len(),
                    "watch iteration failed"
                );
            }
            Err(e) => {
                summary.failed_iterations += 1;
                error!(error = %e, "watch iteration aborted");
            }
        }
    }
}

/// Resolves when the shutdown signal turns true or its sender is dropped.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
