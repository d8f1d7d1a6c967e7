//! Typed error hierarchy for the gantry scheduler.
//!
//! Two top-level enums cover the two failure classes:
//! - `GraphError` - configuration errors caught before execution begins
//! - `ExecuteError` - internal invariant violations during a run
//!
//! Runner failures are not represented here: they are expected, recoverable
//! outcomes that become `OperationStatus::Failure` on the affected node and
//! `Blocked` on its transitive dependents.

use thiserror::Error;

/// Configuration errors detected while building or sorting the operation
/// graph. All of these are fatal and reported before any runner is invoked.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The phase/project dependency declarations form a cycle. The path
    /// lists every operation key on the cycle in dependency order, ending
    /// where it started.
    #[error("Dependency cycle detected: {}", path.join(" -> "))]
    DependencyCycle { path: Vec<String> },

    #[error("Project '{project}' has no script for phase '{phase}' and the phase does not allow missing scripts")]
    MissingScript { project: String, phase: String },

    #[error("Phase '{phase}' depends on unknown phase '{dependency}'")]
    UnknownPhaseDependency { phase: String, dependency: String },

    #[error("Duplicate phase name: {name}")]
    DuplicatePhase { name: String },

    #[error("Unknown project: {name}")]
    UnknownProject { name: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Internal invariant violations during execution. These indicate a bug in
/// the builder or queue, not a failing build.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("Operation '{key}' was referenced but never constructed")]
    UnknownOperation { key: String },

    #[error("Worker lane panicked: {0}")]
    LaneJoinFailed(String),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Sentinel marking that a human-readable diagnostic was already emitted.
///
/// Callers that receive this exit non-zero without printing anything
/// further, so the same failure is never reported twice.
#[derive(Debug, Clone, Copy, Default, Error)]
#[error("an error occurred and was already reported")]
pub struct AlreadyReportedError;
