//! The runner contract: the opaque unit of real work behind an operation.
//!
//! The scheduler never spawns processes, reads caches, or touches disk -
//! it hands an operation to its runner and maps whatever comes back onto
//! the status state machine. Whether the runner shells out to a package
//! manager, replays a cache hit, or does nothing at all is invisible here.

use crate::operation::OperationStatus;
use crate::phase::Phase;
use crate::project::Project;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Everything a runner gets to see about the operation it is executing.
#[derive(Debug, Clone)]
pub struct RunnerContext {
    /// Name of the owning project.
    pub project: String,
    /// Name of the owning phase.
    pub phase: String,
    /// Whether this operation's output may be written to a build cache.
    /// Cleared when any predecessor was excluded from the selection or
    /// ended up skipped.
    pub is_cache_write_allowed: bool,
    /// Whether this operation may be skipped when its inputs are unchanged.
    pub is_skip_allowed: bool,
    /// Content fingerprint of the project's last observed change, when the
    /// watch loop has one. Runners may fold this into their cache keys.
    pub fingerprint: Option<String>,
}

/// An executable unit of work for one operation.
///
/// `execute` returns the terminal status for the operation, or an error -
/// which the execution manager records and maps to `Failure`.
#[async_trait]
pub trait OperationRunner: Send + Sync {
    /// Display name, used in reports and diagnostics.
    fn name(&self) -> &str;

    /// Whether this runner may be skipped when inputs are unchanged.
    fn is_skip_allowed(&self) -> bool {
        false
    }

    /// Whether this runner's output is eligible for cache writes at all.
    fn is_cache_write_allowed(&self) -> bool {
        true
    }

    /// Whether warnings from this runner are tolerated without failing the
    /// overall run.
    fn warnings_are_allowed(&self) -> bool {
        false
    }

    /// Do the work and report a terminal status.
    async fn execute(&self, context: RunnerContext) -> Result<OperationStatus>;
}

/// Runner for synthetic placeholder operations and ignored missing
/// scripts: does nothing and resolves immediately.
#[derive(Debug, Default)]
pub struct NoopRunner {
    name: String,
}

impl NoopRunner {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl OperationRunner for NoopRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_skip_allowed(&self) -> bool {
        true
    }

    fn is_cache_write_allowed(&self) -> bool {
        false
    }

    fn warnings_are_allowed(&self) -> bool {
        true
    }

    async fn execute(&self, _context: RunnerContext) -> Result<OperationStatus> {
        Ok(OperationStatus::Skipped)
    }
}

/// What the factory decided for one (project, phase) pair.
pub enum RunnerDecision {
    /// A real runner exists for this pair.
    Runner(Arc<dyn OperationRunner>),
    /// The project declares no script for this phase. The builder either
    /// substitutes a no-op (when the phase ignores missing scripts) or
    /// fails configuration validation.
    NoScript,
}

/// Supplies runners while the operation graph is being built.
///
/// This is the seam the command layer plugs shell invocation and cache
/// lookup into; tests plug in scripted runners.
pub trait RunnerFactory: Send + Sync {
    fn create(&self, project: &Project, phase: &Phase) -> Result<RunnerDecision>;
}

impl<F> RunnerFactory for F
where
    F: Fn(&Project, &Phase) -> Result<RunnerDecision> + Send + Sync,
{
    fn create(&self, project: &Project, phase: &Phase) -> Result<RunnerDecision> {
        self(project, phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_runner_resolves_skipped() {
        let runner = NoopRunner::new("noop");
        let status = runner
            .execute(RunnerContext {
                project: "a".into(),
                phase: "build".into(),
                is_cache_write_allowed: false,
                is_skip_allowed: true,
                fingerprint: None,
            })
            .await
            .unwrap();
        assert_eq!(status, OperationStatus::Skipped);
        assert!(runner.is_skip_allowed());
        assert!(!runner.is_cache_write_allowed());
        assert!(runner.warnings_are_allowed());
    }
}
