//! Bounded-parallelism execution over the scheduling queue.
//!
//! The manager owns the worker pool: `min(parallelism, |operations|)`
//! lanes, each an independent pull loop against one shared queue. A lane
//! pulls a ready operation, invokes its runner, reports the terminal
//! status back to the queue (which applies the completion rules), and
//! loops until the queue reports done.
//!
//! One operation failing never cancels sibling lanes - only its transitive
//! dependents are blocked. The final result aggregates every terminal
//! status into a report; any failure (or a warning the runner was not
//! allowed to produce) makes the overall run a failure.

use crate::errors::ExecuteError;
use crate::operation::model::{OperationGraph, OperationStatus};
use crate::operation::queue::SchedulingQueue;
use crate::parallelism::Parallelism;
use crate::report::{duration_serde, ExecutionReport};
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Events emitted while a run is in flight, for progress display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationEvent {
    /// An operation was handed to a worker lane.
    Started { key: String, lane: usize },
    /// An operation reached a terminal status.
    Finished {
        key: String,
        status: OperationStatus,
        #[serde(with = "duration_serde")]
        duration: Duration,
    },
    /// The whole run finished.
    RunCompleted {
        success: bool,
        total: usize,
        failed: usize,
        blocked: usize,
    },
}

/// Outcome of one full run.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// True iff no operation failed, none were blocked, and no disallowed
    /// warning occurred.
    pub success: bool,
    /// A runner reported warnings it was not allowed to report.
    pub disallowed_warnings: bool,
    /// Status breakdown with per-operation timing.
    pub report: ExecutionReport,
}

impl ExecutionResult {
    /// Keys of operations that ended in `Failure`.
    pub fn failed_keys(&self) -> Vec<&str> {
        self.report.keys_with(OperationStatus::Failure)
    }

    /// Keys of operations blocked by an upstream failure.
    pub fn blocked_keys(&self) -> Vec<&str> {
        self.report.keys_with(OperationStatus::Blocked)
    }
}

/// Drives one operation graph to completion.
#[derive(Clone)]
pub struct ExecutionManager {
    parallelism: Parallelism,
    event_tx: Option<mpsc::Sender<OperationEvent>>,
    fingerprints: HashMap<String, String>,
}

impl ExecutionManager {
    pub fn new(parallelism: Parallelism) -> Self {
        Self {
            parallelism,
            event_tx: None,
            fingerprints: HashMap::new(),
        }
    }

    /// Attach a channel for progress events.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<OperationEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Supply per-project change fingerprints for runners to fold into
    /// their cache keys.
    pub fn with_fingerprints(mut self, fingerprints: HashMap<String, String>) -> Self {
        self.fingerprints = fingerprints;
        self
    }

    /// Execute every operation in the graph and aggregate the result.
    ///
    /// The graph is consumed: statuses and dependency edges are drained
    /// destructively, so a fresh graph must be built for each run.
    pub async fn execute(&self, graph: OperationGraph) -> Result<ExecutionResult, ExecuteError> {
        let started_at = Utc::now();
        let start = Instant::now();
        let total = graph.len();

        if total == 0 {
            return Ok(ExecutionResult {
                success: true,
                disallowed_warnings: false,
                report: ExecutionReport::empty(started_at),
            });
        }

        let queue = Arc::new(SchedulingQueue::new(graph)?);
        let lanes = self.parallelism.resolve().min(total).max(1);
        let disallowed_warnings = Arc::new(AtomicBool::new(false));

        debug!(total, lanes, "starting execution");

        let handles: Vec<_> = (0..lanes)
            .map(|lane| {
                let queue = Arc::clone(&queue);
                let warnings = Arc::clone(&disallowed_warnings);
                let event_tx = self.event_tx.clone();
                let fingerprints = self.fingerprints.clone();
                tokio::spawn(lane_loop(lane, queue, warnings, event_tx, fingerprints, start))
            })
            .collect();

        for joined in join_all(handles).await {
            joined.map_err(|e| ExecuteError::LaneJoinFailed(e.to_string()))?;
        }

        let report = queue.with_graph(|g| ExecutionReport::from_graph(g, started_at, start.elapsed(), lanes));
        let disallowed_warnings = disallowed_warnings.load(Ordering::SeqCst);
        let failed = report.count(OperationStatus::Failure);
        let blocked = report.count(OperationStatus::Blocked);
        let success = failed == 0 && blocked == 0 && !disallowed_warnings;

        self.emit(OperationEvent::RunCompleted {
            success,
            total,
            failed,
            blocked,
        })
        .await;

        if success {
            debug!(total, "execution succeeded");
        } else {
            error!(failed, blocked, disallowed_warnings, "execution failed");
        }

        Ok(ExecutionResult {
            success,
            disallowed_warnings,
            report,
        })
    }

    async fn emit(&self, event: OperationEvent) {
        if let Some(ref tx) = self.event_tx {
            tx.send(event).await.ok();
        }
    }
}

/// One worker lane: pull, run, complete, repeat until drained.
async fn lane_loop(
    lane: usize,
    queue: Arc<SchedulingQueue>,
    disallowed_warnings: Arc<AtomicBool>,
    event_tx: Option<mpsc::Sender<OperationEvent>>,
    fingerprints: HashMap<String, String>,
    start: Instant,
) {
    while let Some(id) = queue.next().await {
        let (runner, mut context) = queue.begin(id, lane, start.elapsed());
        context.fingerprint = fingerprints.get(&context.project).cloned();
        let key = queue.with_graph(|g| g.get(id).key.clone());

        if let Some(ref tx) = event_tx {
            tx.send(OperationEvent::Started { key: key.clone(), lane }).await.ok();
        }
        let op_start = Instant::now();

        let (status, error) = match runner.execute(context).await {
            Ok(status) => sanitize_status(&key, status),
            Err(e) => (OperationStatus::Failure, Some(format!("{e:#}"))),
        };

        if status == OperationStatus::SuccessWithWarning && !runner.warnings_are_allowed() {
            warn!(%key, "operation completed with disallowed warnings");
            disallowed_warnings.store(true, Ordering::SeqCst);
        }
        if status == OperationStatus::Failure {
            warn!(%key, error = error.as_deref().unwrap_or("unknown"), "operation failed");
        }

        queue.complete(id, status, error, start.elapsed());

        if let Some(ref tx) = event_tx {
            tx.send(OperationEvent::Finished {
                key,
                status,
                duration: op_start.elapsed(),
            })
            .await
            .ok();
        }
    }
}

/// A runner must return a terminal, non-blocked status; anything else is
/// recorded as a failure of that operation rather than poisoning the run.
fn sanitize_status(key: &str, status: OperationStatus) -> (OperationStatus, Option<String>) {
    match status {
        OperationStatus::Success
        | OperationStatus::SuccessWithWarning
        | OperationStatus::Failure
        | OperationStatus::Skipped
        | OperationStatus::FromCache => (status, None),
        OperationStatus::Ready | OperationStatus::Executing | OperationStatus::Blocked => (
            OperationStatus::Failure,
            Some(format!("runner for '{key}' returned non-terminal status {status}")),
        ),
    }
}

/// Execute a prebuilt operation graph with the given parallelism. Thin
/// convenience over [`ExecutionManager`].
pub async fn execute(graph: OperationGraph, parallelism: Parallelism) -> Result<ExecutionResult, ExecuteError> {
    ExecutionManager::new(parallelism).execute(graph).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::model::{Operation, OperationTiming};
    use crate::project::ProjectId;
    use crate::runner::{OperationRunner, RunnerContext};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    /// Runner that records its invocations and returns a scripted status.
    struct ScriptedRunner {
        name: String,
        status: OperationStatus,
        warnings_allowed: bool,
        invocations: Arc<AtomicUsize>,
        order: Arc<StdMutex<Vec<String>>>,
    }

    impl ScriptedRunner {
        fn new(name: &str, status: OperationStatus, order: Arc<StdMutex<Vec<String>>>) -> Self {
            Self {
                name: name.to_string(),
                status,
                warnings_allowed: false,
                invocations: Arc::new(AtomicUsize::new(0)),
                order,
            }
        }
    }

    #[async_trait]
    impl OperationRunner for ScriptedRunner {
        fn name(&self) -> &str {
            &self.name
        }

        fn warnings_are_allowed(&self) -> bool {
            self.warnings_allowed
        }

        async fn execute(&self, _context: RunnerContext) -> Result<OperationStatus> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            self.order.lock().unwrap().push(self.name.clone());
            Ok(self.status)
        }
    }

    struct TestGraph {
        graph: OperationGraph,
        order: Arc<StdMutex<Vec<String>>>,
        invocations: HashMap<String, Arc<AtomicUsize>>,
    }

    /// Build a graph of scripted runners with `(dependent, dependency)`
    /// edges.
    fn scripted_graph(nodes: &[(&str, OperationStatus)], edges: &[(&str, &str)]) -> TestGraph {
        let order = Arc::new(StdMutex::new(Vec::new()));
        let mut graph = OperationGraph::default();
        let mut invocations = HashMap::new();
        for (i, (name, status)) in nodes.iter().enumerate() {
            let runner = ScriptedRunner::new(name, *status, Arc::clone(&order));
            invocations.insert(name.to_string(), Arc::clone(&runner.invocations));
            graph.insert(Operation {
                key: name.to_string(),
                project: ProjectId(i),
                project_name: name.to_string(),
                phase: "build".to_string(),
                runner: Arc::new(runner),
                status: OperationStatus::Ready,
                dependencies: BTreeSet::new(),
                dependents: BTreeSet::new(),
                critical_path_length: None,
                is_cache_write_allowed: true,
                is_skip_allowed: false,
                is_synthetic: false,
                error: None,
                timing: OperationTiming::default(),
            });
        }
        for (dependent, dependency) in edges {
            let from = graph.id_by_key(dependent).unwrap();
            let to = graph.id_by_key(dependency).unwrap();
            graph.link(from, to);
        }
        TestGraph {
            graph,
            order,
            invocations,
        }
    }

    #[tokio::test]
    async fn test_all_success() {
        let t = scripted_graph(
            &[
                ("a", OperationStatus::Success),
                ("b", OperationStatus::Success),
            ],
            &[("a", "b")],
        );
        let result = execute(t.graph, Parallelism::Count(2)).await.unwrap();
        assert!(result.success);
        assert_eq!(result.report.count(OperationStatus::Success), 2);

        let order = t.order.lock().unwrap();
        assert_eq!(*order, vec!["b".to_string(), "a".to_string()]);
    }

    #[tokio::test]
    async fn test_failure_blocks_dependents_and_never_invokes_them() {
        let t = scripted_graph(
            &[
                ("compile", OperationStatus::Failure),
                ("test", OperationStatus::Success),
            ],
            &[("test", "compile")],
        );
        let result = execute(t.graph, Parallelism::Count(2)).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.failed_keys(), vec!["compile"]);
        assert_eq!(result.blocked_keys(), vec!["test"]);
        assert_eq!(t.invocations["test"].load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_independent_subgraph_survives_sibling_failure() {
        let t = scripted_graph(
            &[
                ("bad", OperationStatus::Failure),
                ("bad-child", OperationStatus::Success),
                ("good", OperationStatus::Success),
                ("good-child", OperationStatus::Success),
            ],
            &[("bad-child", "bad"), ("good-child", "good")],
        );
        let result = execute(t.graph, Parallelism::Count(2)).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.report.count(OperationStatus::Success), 2);
        assert_eq!(t.invocations["good-child"].load(Ordering::SeqCst), 1);
        assert_eq!(t.invocations["bad-child"].load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_serial_parallelism_still_runs_everything() {
        let t = scripted_graph(
            &[
                ("a", OperationStatus::Success),
                ("b", OperationStatus::Success),
                ("c", OperationStatus::Success),
            ],
            &[],
        );
        let result = execute(t.graph, Parallelism::Count(1)).await.unwrap();
        assert!(result.success);
        assert_eq!(result.report.count(OperationStatus::Success), 3);
    }

    #[tokio::test]
    async fn test_disallowed_warning_fails_run() {
        let t = scripted_graph(&[("w", OperationStatus::SuccessWithWarning)], &[]);
        let result = execute(t.graph, Parallelism::Count(1)).await.unwrap();
        assert!(!result.success);
        assert!(result.disallowed_warnings);
        assert_eq!(result.report.count(OperationStatus::SuccessWithWarning), 1);
    }

    #[tokio::test]
    async fn test_allowed_warning_passes_run() {
        let order = Arc::new(StdMutex::new(Vec::new()));
        let mut runner = ScriptedRunner::new("w", OperationStatus::SuccessWithWarning, order);
        runner.warnings_allowed = true;

        let mut graph = OperationGraph::default();
        graph.insert(Operation {
            key: "w".to_string(),
            project: ProjectId(0),
            project_name: "w".to_string(),
            phase: "build".to_string(),
            runner: Arc::new(runner),
            status: OperationStatus::Ready,
            dependencies: BTreeSet::new(),
            dependents: BTreeSet::new(),
            critical_path_length: None,
            is_cache_write_allowed: true,
            is_skip_allowed: false,
            is_synthetic: false,
            error: None,
            timing: OperationTiming::default(),
        });

        let result = execute(graph, Parallelism::Count(1)).await.unwrap();
        assert!(result.success);
        assert!(!result.disallowed_warnings);
    }

    #[tokio::test]
    async fn test_from_cache_counted_separately() {
        let t = scripted_graph(
            &[
                ("cached", OperationStatus::FromCache),
                ("fresh", OperationStatus::Success),
            ],
            &[("fresh", "cached")],
        );
        let result = execute(t.graph, Parallelism::Count(2)).await.unwrap();
        assert!(result.success);
        assert_eq!(result.report.count(OperationStatus::FromCache), 1);
        assert_eq!(result.report.count(OperationStatus::Success), 1);
    }

    #[tokio::test]
    async fn test_runner_error_becomes_failure_with_message() {
        struct ExplodingRunner;

        #[async_trait]
        impl OperationRunner for ExplodingRunner {
            fn name(&self) -> &str {
                "exploding"
            }

            async fn execute(&self, _context: RunnerContext) -> Result<OperationStatus> {
                anyhow::bail!("script exited with code 1")
            }
        }

        let mut graph = OperationGraph::default();
        graph.insert(Operation {
            key: "x".to_string(),
            project: ProjectId(0),
            project_name: "x".to_string(),
            phase: "build".to_string(),
            runner: Arc::new(ExplodingRunner),
            status: OperationStatus::Ready,
            dependencies: BTreeSet::new(),
            dependents: BTreeSet::new(),
            critical_path_length: None,
            is_cache_write_allowed: true,
            is_skip_allowed: false,
            is_synthetic: false,
            error: None,
            timing: OperationTiming::default(),
        });

        let result = execute(graph, Parallelism::Count(1)).await.unwrap();
        assert!(!result.success);
        let bucket = result.report.bucket(OperationStatus::Failure);
        assert_eq!(bucket.len(), 1);
        assert!(bucket[0].error.as_deref().unwrap().contains("code 1"));
    }

    #[tokio::test]
    async fn test_empty_graph_succeeds() {
        let result = execute(OperationGraph::default(), Parallelism::Max).await.unwrap();
        assert!(result.success);
        assert_eq!(result.report.total(), 0);
    }

    #[tokio::test]
    async fn test_events_emitted_in_order() {
        let (tx, mut rx) = mpsc::channel(16);
        let t = scripted_graph(&[("solo", OperationStatus::Success)], &[]);
        let manager = ExecutionManager::new(Parallelism::Count(1)).with_event_channel(tx);
        let result = manager.execute(t.graph).await.unwrap();
        assert!(result.success);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(events[0], OperationEvent::Started { ref key, .. } if key == "solo"));
        assert!(matches!(
            events[1],
            OperationEvent::Finished { status: OperationStatus::Success, .. }
        ));
        assert!(matches!(events[2], OperationEvent::RunCompleted { success: true, .. }));
    }

    #[test]
    fn test_event_serialization() {
        let event = OperationEvent::Started {
            key: "a;build".to_string(),
            lane: 0,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("started"));
        assert!(json.contains("a;build"));
    }
}
