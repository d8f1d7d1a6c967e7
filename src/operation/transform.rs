//! Post-build graph transforms.
//!
//! After the base builder materializes the operation graph, an ordered
//! list of transforms runs over it. Each transform may add nodes, link
//! extra dependencies, or annotate existing operations. This is an
//! explicit pipeline: transforms run in registration order, and each one
//! sees the effects of its predecessors.

use crate::errors::GraphError;
use crate::operation::OperationGraph;
use crate::phase::PhaseSet;
use crate::project::ProjectGraph;

/// Read-only configuration available to transforms.
pub struct TransformContext<'a> {
    pub projects: &'a ProjectGraph,
    pub phases: &'a PhaseSet,
}

/// A single graph-rewriting step.
pub trait GraphTransform: Send + Sync {
    /// Name used in diagnostics when a transform fails.
    fn name(&self) -> &str;

    fn apply(
        &self,
        graph: &mut OperationGraph,
        context: &TransformContext<'_>,
    ) -> Result<(), GraphError>;
}

/// Wrap a closure as a named transform.
pub struct FnTransform<F> {
    name: String,
    func: F,
}

impl<F> FnTransform<F>
where
    F: Fn(&mut OperationGraph, &TransformContext<'_>) -> Result<(), GraphError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> GraphTransform for FnTransform<F>
where
    F: Fn(&mut OperationGraph, &TransformContext<'_>) -> Result<(), GraphError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(
        &self,
        graph: &mut OperationGraph,
        context: &TransformContext<'_>,
    ) -> Result<(), GraphError> {
        (self.func)(graph, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::PhaseSet;
    use crate::project::ProjectGraph;

    #[test]
    fn test_fn_transform_runs_and_reports_name() {
        let projects = ProjectGraph::builder().build().unwrap();
        let phases = PhaseSet::new([]).unwrap();
        let context = TransformContext {
            projects: &projects,
            phases: &phases,
        };

        let transform = FnTransform::new("annotate", |graph: &mut OperationGraph, _ctx: &TransformContext<'_>| {
            assert!(graph.is_empty());
            Ok(())
        });

        assert_eq!(transform.name(), "annotate");
        let mut graph = OperationGraph::default();
        transform.apply(&mut graph, &context).unwrap();
    }
}
