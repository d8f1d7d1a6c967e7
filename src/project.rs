//! Project dependency graph model.
//!
//! Projects live in a single arena owned by [`ProjectGraph`] and are
//! addressed by [`ProjectId`] - a stable index. Dependency and consumer
//! edges are stored as index sets rather than object references, which
//! keeps the graph cheap to clone for diagnostics and free of reference
//! cycles.
//!
//! The graph is read-only to the scheduler: configuration loading (out of
//! process) decides which projects exist and how they depend on each
//! other. [`ProjectGraphBuilder`] wires `consumers` as the exact inverse
//! of `dependencies`, which the rest of the crate assumes and never
//! re-derives.

use crate::errors::GraphError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Stable index of a project in its [`ProjectGraph`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProjectId(pub usize);

/// A single project in the monorepo.
#[derive(Debug, Clone)]
pub struct Project {
    /// Unique package name (e.g., "@acme/widgets").
    pub name: String,
    /// Projects this one depends on (one hop).
    pub dependencies: BTreeSet<ProjectId>,
    /// Projects that depend on this one (inverse of `dependencies`).
    pub consumers: BTreeSet<ProjectId>,
}

/// Arena of all projects in the repository with name-based lookup.
#[derive(Debug, Clone, Default)]
pub struct ProjectGraph {
    projects: Vec<Project>,
    by_name: HashMap<String, ProjectId>,
}

impl ProjectGraph {
    /// Start building a graph from declared dependency edges.
    pub fn builder() -> ProjectGraphBuilder {
        ProjectGraphBuilder::default()
    }

    /// Number of projects in the graph.
    pub fn len(&self) -> usize {
        self.projects.len()
    }

    /// Check if the graph has no projects.
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    /// Get a project by its arena index.
    pub fn get(&self, id: ProjectId) -> &Project {
        &self.projects[id.0]
    }

    /// Look up a project id by name.
    pub fn id_of(&self, name: &str) -> Option<ProjectId> {
        self.by_name.get(name).copied()
    }

    /// Look up a project id by name, failing with a configuration error.
    pub fn require(&self, name: &str) -> Result<ProjectId, GraphError> {
        self.id_of(name).ok_or_else(|| GraphError::UnknownProject {
            name: name.to_string(),
        })
    }

    /// Iterate over all project ids.
    pub fn ids(&self) -> impl Iterator<Item = ProjectId> + '_ {
        (0..self.projects.len()).map(ProjectId)
    }

    /// The set of every project id, useful as a full selection.
    pub fn all(&self) -> BTreeSet<ProjectId> {
        self.ids().collect()
    }

    /// Name of a project by id.
    pub fn name_of(&self, id: ProjectId) -> &str {
        &self.projects[id.0].name
    }
}

/// Builder that collects `(project, dependencies)` declarations and wires
/// the inverse consumer edges on [`build`](ProjectGraphBuilder::build).
#[derive(Debug, Default)]
pub struct ProjectGraphBuilder {
    declarations: Vec<(String, Vec<String>)>,
}

impl ProjectGraphBuilder {
    /// Declare a project and the names of the projects it depends on.
    ///
    /// Dependencies may be declared before the dependency project itself;
    /// resolution happens at build time.
    pub fn project<S: Into<String>>(
        mut self,
        name: S,
        dependencies: impl IntoIterator<Item = S>,
    ) -> Self {
        self.declarations.push((
            name.into(),
            dependencies.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Resolve names to ids and wire both edge directions.
    pub fn build(self) -> Result<ProjectGraph, GraphError> {
        let mut by_name = HashMap::new();
        for (i, (name, _)) in self.declarations.iter().enumerate() {
            if by_name.insert(name.clone(), ProjectId(i)).is_some() {
                return Err(GraphError::Other(anyhow::anyhow!(
                    "Duplicate project name: {name}"
                )));
            }
        }

        let mut projects: Vec<Project> = self
            .declarations
            .iter()
            .map(|(name, _)| Project {
                name: name.clone(),
                dependencies: BTreeSet::new(),
                consumers: BTreeSet::new(),
            })
            .collect();

        for (i, (name, deps)) in self.declarations.iter().enumerate() {
            for dep in deps {
                let dep_id = *by_name.get(dep).ok_or_else(|| GraphError::Other(
                    anyhow::anyhow!("Project '{name}' depends on unknown project '{dep}'"),
                ))?;
                projects[i].dependencies.insert(dep_id);
                projects[dep_id.0].consumers.insert(ProjectId(i));
            }
        }

        Ok(ProjectGraph { projects, by_name })
    }
}
