//! Operation graph construction.
//!
//! The builder materializes one operation per (project, phase) pair inside
//! the requested selection, then recursively resolves each operation's raw
//! dependency set: `self_dependencies` stay within the project,
//! `upstream_dependencies` fan out across the project's dependency
//! projects. A raw dependency that falls outside the selection is still
//! materialized - as a synthetic no-op placeholder - so the graph stays
//! connected, and the direct consumer loses cache-write eligibility
//! because its inputs can no longer be proven reproducible.
//!
//! Each pair is materialized at most once, memoized by operation key, no
//! matter how many consumers request it.

use crate::errors::GraphError;
use crate::operation::model::{Operation, OperationGraph, OperationId, OperationStatus, OperationTiming};
use crate::operation::transform::{GraphTransform, TransformContext};
use crate::phase::{Phase, PhaseSet};
use crate::project::{ProjectGraph, ProjectId};
use crate::runner::{NoopRunner, OperationRunner, RunnerDecision, RunnerFactory};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// Builds the operation graph for one run.
pub struct OperationGraphBuilder<'a> {
    projects: &'a ProjectGraph,
    phases: &'a PhaseSet,
    project_selection: BTreeSet<ProjectId>,
    phase_selection: BTreeSet<String>,
    transforms: Vec<Box<dyn GraphTransform>>,
}

impl<'a> OperationGraphBuilder<'a> {
    /// Start from the full cross product: every project, every phase.
    pub fn new(projects: &'a ProjectGraph, phases: &'a PhaseSet) -> Self {
        Self {
            projects,
            phases,
            project_selection: projects.all(),
            phase_selection: phases.names(),
            transforms: Vec::new(),
        }
    }

    /// Restrict the build to a subset of projects.
    pub fn with_project_selection(mut self, selection: BTreeSet<ProjectId>) -> Self {
        self.project_selection = selection;
        self
    }

    /// Restrict the build to a subset of phases, by name.
    pub fn with_phase_selection(mut self, selection: BTreeSet<String>) -> Self {
        self.phase_selection = selection;
        self
    }

    /// Append a transform to run after the base graph is built.
    pub fn with_transform(mut self, transform: Box<dyn GraphTransform>) -> Self {
        self.transforms.push(transform);
        self
    }

    /// Materialize the graph.
    pub fn build(self, factory: &dyn RunnerFactory) -> Result<OperationGraph, GraphError> {
        for name in &self.phase_selection {
            if self.phases.get(name).is_none() {
                return Err(GraphError::Other(anyhow::anyhow!(
                    "Phase selection references unknown phase '{name}'"
                )));
            }
        }

        let mut state = BuildState {
            projects: self.projects,
            phases: self.phases,
            project_selection: &self.project_selection,
            phase_selection: &self.phase_selection,
            factory,
            graph: OperationGraph::default(),
            resolved: HashSet::new(),
        };

        for project in &self.project_selection {
            for phase_name in &self.phase_selection {
                state.materialize(*project, phase_name)?;
            }
        }

        let mut graph = state.graph;

        let context = TransformContext {
            projects: self.projects,
            phases: self.phases,
        };
        for transform in &self.transforms {
            transform.apply(&mut graph, &context).map_err(|e| {
                GraphError::Other(anyhow::anyhow!(
                    "Graph transform '{}' failed: {e}",
                    transform.name()
                ))
            })?;
        }

        Ok(graph)
    }
}

struct BuildState<'a> {
    projects: &'a ProjectGraph,
    phases: &'a PhaseSet,
    project_selection: &'a BTreeSet<ProjectId>,
    phase_selection: &'a BTreeSet<String>,
    factory: &'a dyn RunnerFactory,
    graph: OperationGraph,
    /// Keys whose dependency sets have been resolved. The node itself is
    /// memoized in the graph before its dependencies resolve, so mutually
    /// referencing pairs terminate; cycle rejection happens later in the
    /// scheduling queue.
    resolved: HashSet<String>,
}

impl BuildState<'_> {
    /// Create (or reuse) the operation for one (project, phase) pair and
    /// resolve its dependencies.
    fn materialize(&mut self, project: ProjectId, phase_name: &str) -> Result<OperationId, GraphError> {
        let project_name = self.projects.name_of(project).to_string();
        let key = Operation::make_key(&project_name, phase_name);

        let id = match self.graph.id_by_key(&key) {
            Some(id) => id,
            None => {
                let op = self.create_operation(project, &project_name, phase_name, &key)?;
                self.graph.insert(op)
            }
        };

        if !self.resolved.insert(key) {
            return Ok(id);
        }

        let phase = self.require_phase(phase_name)?.clone();

        // Intra-project ordering: other phases of the same project.
        for dep_phase in &phase.self_dependencies {
            let dep = self.materialize(project, dep_phase)?;
            self.link(id, dep);
        }

        // Cross-project ordering: upstream phases of each dependency
        // project.
        let dependency_projects: Vec<ProjectId> =
            self.projects.get(project).dependencies.iter().copied().collect();
        for dep_phase in &phase.upstream_dependencies {
            for &dep_project in &dependency_projects {
                let dep = self.materialize(dep_project, dep_phase)?;
                self.link(id, dep);
            }
        }

        Ok(id)
    }

    fn create_operation(
        &self,
        project: ProjectId,
        project_name: &str,
        phase_name: &str,
        key: &str,
    ) -> Result<Operation, GraphError> {
        let phase = self.require_phase(phase_name)?;
        let selected = self.project_selection.contains(&project)
            && self.phase_selection.contains(phase_name);

        let (runner, is_synthetic) = if selected {
            match self.factory.create(self.projects.get(project), phase)? {
                RunnerDecision::Runner(runner) => (runner, false),
                RunnerDecision::NoScript if phase.ignore_missing_script => {
                    let runner: Arc<dyn OperationRunner> = Arc::new(NoopRunner::new(key));
                    (runner, false)
                }
                RunnerDecision::NoScript => {
                    return Err(GraphError::MissingScript {
                        project: project_name.to_string(),
                        phase: phase_name.to_string(),
                    });
                }
            }
        } else {
            // Out-of-selection placeholder: never consults the factory and
            // never runs real work.
            let runner: Arc<dyn OperationRunner> = Arc::new(NoopRunner::new(key));
            (runner, true)
        };

        Ok(Operation {
            key: key.to_string(),
            project,
            project_name: project_name.to_string(),
            phase: phase_name.to_string(),
            is_cache_write_allowed: runner.is_cache_write_allowed(),
            is_skip_allowed: runner.is_skip_allowed(),
            runner,
            status: OperationStatus::Ready,
            dependencies: BTreeSet::new(),
            dependents: BTreeSet::new(),
            critical_path_length: None,
            is_synthetic,
            error: None,
            timing: OperationTiming::default(),
        })
    }

    fn link(&mut self, consumer: OperationId, dependency: OperationId) {
        self.graph.link(consumer, dependency);
        // An excluded predecessor means the consumer's output can no
        // longer be proven reproducible from cache inputs alone.
        if self.graph.get(dependency).is_synthetic {
            self.graph.get_mut(consumer).is_cache_write_allowed = false;
        }
    }

    fn require_phase(&self, name: &str) -> Result<&Phase, GraphError> {
        self.phases.get(name).ok_or_else(|| GraphError::UnknownPhaseDependency {
            phase: name.to_string(),
            dependency: name.to_string(),
        })
    }
}
