//! Async pull queue over the operation graph.
//!
//! Construction does all the one-time graph analysis: wiring `dependents`
//! as the inverse of `dependencies`, computing every node's critical path
//! length in a single depth-first pass (rejecting cycles), and sorting the
//! pending list ascending by priority so the node gating the longest
//! remaining chain is always served first.
//!
//! Steady state is a pull protocol shared by any number of worker lanes:
//! `next()` returns a ready operation or parks the caller until a
//! completion makes one ready; once the queue drains, every parked caller
//! resolves with `None`. All internal state sits behind one mutex that is
//! never held across an await - parked callers are resolved through
//! oneshot channels.

use crate::errors::GraphError;
use crate::operation::model::{Operation, OperationGraph, OperationId, OperationStatus};
use crate::runner::{OperationRunner, RunnerContext};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Tie-break ordering applied once at construction. The pending list is
/// sorted ascending and served from the back.
pub type Comparator = Box<dyn Fn(&Operation, &Operation) -> Ordering + Send + Sync>;

/// Default priority: critical path length, then key for determinism.
fn default_comparator() -> Comparator {
    Box::new(|a, b| {
        a.critical_path_length
            .cmp(&b.critical_path_length)
            .then_with(|| a.key.cmp(&b.key))
    })
}

/// Shared pull queue serving ready operations to concurrent worker lanes.
pub struct SchedulingQueue {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for SchedulingQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulingQueue").finish_non_exhaustive()
    }
}

struct Inner {
    graph: OperationGraph,
    /// Ascending priority; candidates are scanned from the back.
    pending: Vec<OperationId>,
    /// Parked `next()` callers, resolved oldest-first.
    waiters: VecDeque<oneshot::Sender<Option<OperationId>>>,
}

impl SchedulingQueue {
    /// Analyze the graph and build the queue with the default priority.
    pub fn new(graph: OperationGraph) -> Result<Self, GraphError> {
        Self::with_comparator(graph, default_comparator())
    }

    /// Analyze the graph and build the queue with a custom tie-break
    /// comparator.
    pub fn with_comparator(mut graph: OperationGraph, comparator: Comparator) -> Result<Self, GraphError> {
        wire_dependents(&mut graph);
        compute_critical_paths(&mut graph)?;

        let mut pending: Vec<OperationId> = graph.ids().collect();
        pending.sort_by(|&a, &b| comparator(graph.get(a), graph.get(b)));

        Ok(Self {
            inner: Mutex::new(Inner {
                graph,
                pending,
                waiters: VecDeque::new(),
            }),
        })
    }

    /// Number of operations not yet handed out or dropped.
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Pull the next ready operation, waiting if none is ready yet.
    /// Returns `None` once the queue has fully drained.
    pub async fn next(&self) -> Option<OperationId> {
        let rx = {
            let mut inner = self.inner.lock();
            if let Some(id) = inner.take_ready() {
                return Some(id);
            }
            if inner.pending.is_empty() {
                return None;
            }
            let (tx, rx) = oneshot::channel();
            inner.waiters.push_back(tx);
            rx
        };
        // Queue dropped without resolving us counts as drained.
        rx.await.unwrap_or(None)
    }

    /// Transition an operation to `Executing` and hand its runner and
    /// context to the calling lane.
    pub fn begin(&self, id: OperationId, lane: usize, offset: Duration) -> (Arc<dyn OperationRunner>, RunnerContext) {
        let mut inner = self.inner.lock();
        let op = inner.graph.get_mut(id);
        op.status = OperationStatus::Executing;
        op.timing.started = Some(offset);
        op.timing.lane = Some(lane);
        let runner = Arc::clone(&op.runner);
        let context = RunnerContext {
            project: op.project_name.clone(),
            phase: op.phase.clone(),
            is_cache_write_allowed: op.is_cache_write_allowed,
            is_skip_allowed: op.is_skip_allowed,
            fingerprint: None,
        };
        (runner, context)
    }

    /// Record a terminal status and apply the completion rules, then wake
    /// any parked lanes that can now make progress. Everything here
    /// happens-before a newly unblocked dependent can be returned by
    /// `next()`.
    pub fn complete(&self, id: OperationId, status: OperationStatus, error: Option<String>, offset: Duration) {
        let mut inner = self.inner.lock();
        inner.apply_completion(id, status, error, offset);
        inner.pump();
    }

    /// Run a closure against the operation graph, e.g. to build the final
    /// report.
    pub fn with_graph<R>(&self, f: impl FnOnce(&OperationGraph) -> R) -> R {
        let inner = self.inner.lock();
        f(&inner.graph)
    }
}

impl Inner {
    /// Remove and return the highest-priority ready operation, dropping
    /// blocked nodes on the way. Ready means: status `Ready` and an empty
    /// dependency set.
    fn take_ready(&mut self) -> Option<OperationId> {
        let graph = &self.graph;
        self.pending
            .retain(|&id| graph.get(id).status != OperationStatus::Blocked);

        let pos = self.pending.iter().rposition(|&id| {
            let op = self.graph.get(id);
            op.status == OperationStatus::Ready && op.dependencies.is_empty()
        })?;
        Some(self.pending.remove(pos))
    }

    fn apply_completion(&mut self, id: OperationId, status: OperationStatus, error: Option<String>, offset: Duration) {
        {
            let op = self.graph.get_mut(id);
            op.status = status;
            op.error = error;
            op.timing.finished = Some(offset);
        }

        match status {
            OperationStatus::Failure => self.block_dependents(id),
            OperationStatus::Skipped => {
                // Skip unblocks like success, but downstream state can no
                // longer be proven consistent, so cache writes are off.
                for dependent in self.dependents_of(id) {
                    let op = self.graph.get_mut(dependent);
                    op.is_cache_write_allowed = false;
                    op.dependencies.remove(&id);
                }
            }
            OperationStatus::Success
            | OperationStatus::SuccessWithWarning
            | OperationStatus::FromCache => {
                for dependent in self.dependents_of(id) {
                    self.graph.get_mut(dependent).dependencies.remove(&id);
                }
            }
            // The execution manager never completes with these.
            OperationStatus::Ready | OperationStatus::Executing | OperationStatus::Blocked => {}
        }
    }

    /// Mark every transitive dependent `Blocked` and sever its edges so
    /// the ready scan terminates.
    fn block_dependents(&mut self, failed: OperationId) {
        let mut frontier = vec![failed];
        while let Some(id) = frontier.pop() {
            for dependent in self.dependents_of(id) {
                let op = self.graph.get_mut(dependent);
                if op.status.is_terminal() {
                    continue;
                }
                op.status = OperationStatus::Blocked;
                op.dependencies.clear();
                frontier.push(dependent);
            }
        }
    }

    fn dependents_of(&self, id: OperationId) -> Vec<OperationId> {
        self.graph.get(id).dependents.iter().copied().collect()
    }

    /// Match newly ready operations to parked callers, oldest caller
    /// first; once drained, resolve every remaining caller with `None`.
    fn pump(&mut self) {
        while !self.waiters.is_empty() {
            let Some(id) = self.take_ready() else { break };
            let mut delivered = false;
            while let Some(waiter) = self.waiters.pop_front() {
                if waiter.send(Some(id)).is_ok() {
                    delivered = true;
                    break;
                }
                // Receiver gave up; try the next caller.
            }
            if !delivered {
                self.pending.push(id);
                return;
            }
        }
        if self.pending.is_empty() {
            for waiter in self.waiters.drain(..) {
                let _ = waiter.send(None);
            }
        }
    }
}

/// Populate `dependents` as the exact inverse of `dependencies`. The
/// builder only wires forward edges.
fn wire_dependents(graph: &mut OperationGraph) {
    let ids: Vec<OperationId> = graph.ids().collect();
    for &id in &ids {
        let deps: Vec<OperationId> = graph.get(id).dependencies.iter().copied().collect();
        for dep in deps {
            graph.get_mut(dep).dependents.insert(id);
        }
    }
}

/// One depth-first pass over the whole graph computing every node's
/// critical path length: 1 + the longest chain among its dependents, 0 at
/// the sinks. Revisiting a node already on the DFS stack is a cycle -
/// fatal, reported with the full cycle path.
fn compute_critical_paths(graph: &mut OperationGraph) -> Result<(), GraphError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }
    enum Step {
        Enter(OperationId),
        Exit(OperationId),
    }

    let ids: Vec<OperationId> = graph.ids().collect();
    let mut color = vec![Color::White; graph.len()];
    let mut path: Vec<OperationId> = Vec::new();

    for &root in &ids {
        if color[root.0] != Color::White {
            continue;
        }
        let mut stack = vec![Step::Enter(root)];
        while let Some(step) = stack.pop() {
            match step {
                Step::Enter(id) => {
                    if color[id.0] != Color::White {
                        continue;
                    }
                    color[id.0] = Color::Gray;
                    path.push(id);
                    stack.push(Step::Exit(id));
                    for &next in &graph.get(id).dependents {
                        match color[next.0] {
                            Color::Gray => return Err(cycle_error(graph, &path, next)),
                            Color::White => stack.push(Step::Enter(next)),
                            Color::Black => {}
                        }
                    }
                }
                Step::Exit(id) => {
                    let length = graph
                        .get(id)
                        .dependents
                        .iter()
                        .map(|&d| graph.get(d).critical_path_length.unwrap_or(0))
                        .max()
                        .map_or(0, |longest| longest + 1);
                    graph.get_mut(id).critical_path_length = Some(length);
                    color[id.0] = Color::Black;
                    path.pop();
                }
            }
        }
    }
    Ok(())
}

/// The gray chain from the first occurrence of `reentered` through the
/// current node, closed back on itself, is the cycle in dependency order.
fn cycle_error(graph: &OperationGraph, path: &[OperationId], reentered: OperationId) -> GraphError {
    let start = path.iter().position(|&id| id == reentered).unwrap_or(0);
    let mut cycle: Vec<String> = path[start..]
        .iter()
        .map(|&id| graph.get(id).key.clone())
        .collect();
    cycle.push(graph.get(reentered).key.clone());
    GraphError::DependencyCycle { path: cycle }
}
