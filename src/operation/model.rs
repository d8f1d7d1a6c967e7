//! Operation arena and status state machine.
//!
//! One [`Operation`] is one schedulable (project, phase) unit of work.
//! Operations live in a single arena owned by [`OperationGraph`] and refer
//! to each other by [`OperationId`] index sets - `dependencies` pointing
//! upstream and `dependents` pointing downstream - so the doubly-linked
//! graph carries no reference cycles and serializes trivially for
//! diagnostics.

use crate::errors::ExecuteError;
use crate::project::ProjectId;
use crate::runner::OperationRunner;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Stable index of an operation in its [`OperationGraph`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperationId(pub usize);

/// Status of an operation.
///
/// `Ready` is the only initial state. `Executing` is entered exactly once,
/// when a worker lane picks the operation up. Everything else is terminal:
/// the three success shapes (`Success`, `SuccessWithWarning`, `FromCache`),
/// `Skipped`, `Failure`, and `Blocked` - the one terminal state reached
/// without the runner ever being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting for its dependencies to drain.
    Ready,
    /// Handed to a worker lane; the runner is in flight.
    Executing,
    /// Runner finished cleanly.
    Success,
    /// Runner finished but reported warnings.
    SuccessWithWarning,
    /// Runner failed or returned an error.
    Failure,
    /// Runner decided no work was needed (unchanged inputs, no script).
    Skipped,
    /// Output restored from a build cache instead of executing.
    FromCache,
    /// A transitive dependency failed; the runner was never invoked.
    Blocked,
}

impl OperationStatus {
    /// Check if the operation has reached a terminal state.
    pub fn is_terminal(self) -> bool {
        match self {
            Self::Ready | Self::Executing => false,
            Self::Success
            | Self::SuccessWithWarning
            | Self::Failure
            | Self::Skipped
            | Self::FromCache
            | Self::Blocked => true,
        }
    }

    /// Check if completion in this state unblocks dependents.
    pub fn unblocks_dependents(self) -> bool {
        match self {
            Self::Success | Self::SuccessWithWarning | Self::Skipped | Self::FromCache => true,
            Self::Ready | Self::Executing | Self::Failure | Self::Blocked => false,
        }
    }

    /// Stable lowercase label, matching the serde form.
    pub fn label(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Executing => "executing",
            Self::Success => "success",
            Self::SuccessWithWarning => "success_with_warning",
            Self::Failure => "failure",
            Self::Skipped => "skipped",
            Self::FromCache => "from_cache",
            Self::Blocked => "blocked",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// When the operation ran, as offsets from the start of the run, and on
/// which worker lane.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OperationTiming {
    pub started: Option<Duration>,
    pub finished: Option<Duration>,
    pub lane: Option<usize>,
}

impl OperationTiming {
    /// Wall-clock duration of the runner invocation, once finished.
    pub fn duration(&self) -> Option<Duration> {
        match (self.started, self.finished) {
            (Some(s), Some(f)) => Some(f.saturating_sub(s)),
            _ => None,
        }
    }
}

/// One schedulable (project, phase) unit of work and its runtime state.
///
/// Created by the builder, mutated only by the execution manager, and
/// discarded with the whole graph at the end of a run.
pub struct Operation {
    /// Unique key: `"<project>;<phase>"`.
    pub key: String,
    /// Owning project.
    pub project: ProjectId,
    /// Owning project's name, denormalized for reporting.
    pub project_name: String,
    /// Owning phase's name.
    pub phase: String,
    /// The unit of real work behind this operation.
    pub runner: Arc<dyn OperationRunner>,
    pub status: OperationStatus,
    /// Operations that must complete before this one. Drained destructively
    /// as dependencies finish; empty means ready.
    pub dependencies: BTreeSet<OperationId>,
    /// Inverse of `dependencies`, wired by the scheduling queue.
    pub dependents: BTreeSet<OperationId>,
    /// Longest chain of dependents hanging off this node. Computed exactly
    /// once, before execution begins.
    pub critical_path_length: Option<u32>,
    /// Whether this operation's output may be recorded in a build cache.
    pub is_cache_write_allowed: bool,
    /// Whether this operation may be skipped when inputs are unchanged.
    pub is_skip_allowed: bool,
    /// True for placeholder operations materialized outside the requested
    /// selection.
    pub is_synthetic: bool,
    /// Error text for `Failure`, captured from the runner.
    pub error: Option<String>,
    pub timing: OperationTiming,
}

impl Operation {
    /// Memoization key for a (project, phase) pair.
    pub fn make_key(project_name: &str, phase_name: &str) -> String {
        format!("{project_name};{phase_name}")
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("key", &self.key)
            .field("status", &self.status)
            .field("dependencies", &self.dependencies)
            .field("dependents", &self.dependents)
            .field("critical_path_length", &self.critical_path_length)
            .field("is_cache_write_allowed", &self.is_cache_write_allowed)
            .field("is_skip_allowed", &self.is_skip_allowed)
            .field("is_synthetic", &self.is_synthetic)
            .finish_non_exhaustive()
    }
}

/// Arena of all operations in one run, with key-based lookup.
#[derive(Debug, Default)]
pub struct OperationGraph {
    operations: Vec<Operation>,
    by_key: HashMap<String, OperationId>,
}

impl OperationGraph {
    /// Number of operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Check if the graph has no operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Insert an operation, registering its key. The builder guarantees
    /// each key is inserted at most once; graph transforms adding nodes
    /// must uphold the same rule.
    pub fn insert(&mut self, operation: Operation) -> OperationId {
        let id = OperationId(self.operations.len());
        self.by_key.insert(operation.key.clone(), id);
        self.operations.push(operation);
        id
    }

    /// Get an operation by id.
    pub fn get(&self, id: OperationId) -> &Operation {
        &self.operations[id.0]
    }

    /// Get a mutable operation by id.
    pub fn get_mut(&mut self, id: OperationId) -> &mut Operation {
        &mut self.operations[id.0]
    }

    /// Record that `dependent` waits on `dependency`. Inverse edges are
    /// wired later, when the scheduling queue is constructed.
    pub fn link(&mut self, dependent: OperationId, dependency: OperationId) {
        self.operations[dependent.0].dependencies.insert(dependency);
    }

    /// Look up an operation id by key.
    pub fn id_by_key(&self, key: &str) -> Option<OperationId> {
        self.by_key.get(key).copied()
    }

    /// Look up an operation by key, failing with an invariant violation.
    pub fn require_key(&self, key: &str) -> Result<OperationId, ExecuteError> {
        self.id_by_key(key)
            .ok_or_else(|| ExecuteError::UnknownOperation { key: key.to_string() })
    }

    /// Iterate over all operation ids.
    pub fn ids(&self) -> impl Iterator<Item = OperationId> + '_ {
        (0..self.operations.len()).map(OperationId)
    }

    /// Iterate over all operations.
    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter()
    }
}
