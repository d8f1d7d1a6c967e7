//! Operation graph: the scheduling core.
//!
//! An *operation* is one (project, phase) unit of work. This module turns
//! a project selection and a phase selection into a graph of operations
//! and drives it to completion:
//!
//! 1. **Builder** - materializes operations and their dependency edges,
//!    synthesizing no-op placeholders for units outside the selection
//! 2. **Queue** - topological pull queue with critical-path priority and
//!    cycle rejection
//! 3. **Executor** - bounded worker lanes applying the status-propagation
//!    rules as operations complete
//!
//! ## Example
//!
//! ```no_run
//! use gantry::operation::{ExecutionManager, OperationGraphBuilder};
//! use gantry::parallelism::Parallelism;
//! use gantry::phase::{Phase, PhaseSet};
//! use gantry::project::ProjectGraph;
//! use gantry::runner::{NoopRunner, RunnerDecision};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let projects = ProjectGraph::builder()
//!     .project("app", vec!["lib"])
//!     .project("lib", vec![])
//!     .build()?;
//! let phases = PhaseSet::new([
//!     Phase::new("build", [], ["build".to_string()]),
//!     Phase::new("test", ["build".to_string()], []),
//! ])?;
//!
//! let factory = |project: &gantry::project::Project,
//!                phase: &Phase|
//!  -> anyhow::Result<RunnerDecision> {
//!     Ok(RunnerDecision::Runner(Arc::new(NoopRunner::new(format!(
//!         "{};{}",
//!         project.name, phase.name
//!     )))))
//! };
//!
//! let graph = OperationGraphBuilder::new(&projects, &phases).build(&factory)?;
//! let result = ExecutionManager::new(Parallelism::Auto).execute(graph).await?;
//! assert!(result.success);
//! # Ok(())
//! # }
//! ```

mod builder;
mod executor;
pub(crate) mod model;
mod queue;
mod transform;

pub use builder::OperationGraphBuilder;
pub use executor::{execute, ExecutionManager, ExecutionResult, OperationEvent};
pub use model::{Operation, OperationGraph, OperationId, OperationStatus, OperationTiming};
pub use queue::{Comparator, SchedulingQueue};
pub use transform::{FnTransform, GraphTransform, TransformContext};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallelism::Parallelism;
    use crate::phase::{Phase, PhaseSet};
    use crate::project::ProjectGraph;
    use crate::runner::{NoopRunner, RunnerDecision};
    use std::sync::Arc;

    fn noop_factory(
        project: &crate::project::Project,
        phase: &Phase,
    ) -> anyhow::Result<RunnerDecision> {
        Ok(RunnerDecision::Runner(Arc::new(NoopRunner::new(format!(
            "{};{}",
            project.name, phase.name
        )))))
    }

    #[tokio::test]
    async fn test_build_then_execute_end_to_end() {
        let projects = ProjectGraph::builder()
            .project("app", vec!["lib"])
            .project("lib", vec![])
            .build()
            .unwrap();
        let phases = PhaseSet::new([
            Phase::new("build", [], ["build".to_string()]),
            Phase::new("test", ["build".to_string()], []),
        ])
        .unwrap();

        let graph = OperationGraphBuilder::new(&projects, &phases)
            .build(&noop_factory)
            .unwrap();
        assert_eq!(graph.len(), 4);

        let result = ExecutionManager::new(Parallelism::Count(2))
            .execute(graph)
            .await
            .unwrap();
        assert!(result.success);
        // Noop runners resolve everything as skipped.
        assert_eq!(result.report.count(OperationStatus::Skipped), 4);
    }
}
