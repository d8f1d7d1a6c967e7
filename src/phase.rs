//! Phase definitions for the gantry scheduler.
//!
//! A phase is a named build step ("build", "test", "lint") with declared
//! ordering constraints: `self_dependencies` name phases of the *same*
//! project that must finish first, `upstream_dependencies` name phases of
//! each *dependency project* that must finish first. The cross product of
//! upstream dependencies and a project's dependency projects is what wires
//! the operation graph across package boundaries.

use crate::errors::GraphError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A named build step with its ordering constraints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    /// Phase name (e.g., "build", "test").
    pub name: String,
    /// Phases of the same project that must complete before this one.
    #[serde(default)]
    pub self_dependencies: BTreeSet<String>,
    /// Phases of dependency projects that must complete before this one.
    #[serde(default)]
    pub upstream_dependencies: BTreeSet<String>,
    /// True for the implicit phase synthesized from a bare single-step
    /// command.
    #[serde(default)]
    pub is_synthetic: bool,
    /// When a project has no script for this phase, run a no-op instead of
    /// failing configuration validation.
    #[serde(default)]
    pub ignore_missing_script: bool,
}

impl Phase {
    /// Create a phase with explicit dependency lists.
    pub fn new(
        name: &str,
        self_dependencies: impl IntoIterator<Item = String>,
        upstream_dependencies: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            name: name.to_string(),
            self_dependencies: self_dependencies.into_iter().collect(),
            upstream_dependencies: upstream_dependencies.into_iter().collect(),
            is_synthetic: false,
            ignore_missing_script: false,
        }
    }

    /// The implicit phase backing a bare single-step command. It depends on
    /// the same phase of every upstream project, which is what "run X
    /// everywhere in topological order" means.
    pub fn synthetic(name: &str) -> Self {
        Self {
            name: name.to_string(),
            self_dependencies: BTreeSet::new(),
            upstream_dependencies: [name.to_string()].into(),
            is_synthetic: true,
            ignore_missing_script: false,
        }
    }

    /// Allow projects without a script for this phase to no-op.
    pub fn with_ignore_missing_script(mut self, ignore: bool) -> Self {
        self.ignore_missing_script = ignore;
        self
    }
}

/// The full collection of configured phases, validated for referential
/// integrity: every named dependency must itself be a configured phase.
#[derive(Debug, Clone, Default)]
pub struct PhaseSet {
    phases: BTreeMap<String, Phase>,
}

impl PhaseSet {
    /// Validate and collect phases. Duplicate names and dangling
    /// dependency references are configuration errors.
    pub fn new(phases: impl IntoIterator<Item = Phase>) -> Result<Self, GraphError> {
        let mut map = BTreeMap::new();
        for phase in phases {
            let name = phase.name.clone();
            if map.insert(name.clone(), phase).is_some() {
                return Err(GraphError::DuplicatePhase { name });
            }
        }

        for phase in map.values() {
            for dep in phase.self_dependencies.iter().chain(&phase.upstream_dependencies) {
                if !map.contains_key(dep) {
                    return Err(GraphError::UnknownPhaseDependency {
                        phase: phase.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        Ok(Self { phases: map })
    }

    /// Get a phase by name.
    pub fn get(&self, name: &str) -> Option<&Phase> {
        self.phases.get(name)
    }

    /// Iterate over all phases in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Phase> {
        self.phases.values()
    }

    /// All phase names, useful as a full phase selection.
    pub fn names(&self) -> BTreeSet<String> {
        self.phases.keys().cloned().collect()
    }

    /// Number of configured phases.
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    /// Check whether no phases are configured.
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_set_accepts_valid_references() {
        let set = PhaseSet::new([
            Phase::new("build", [], ["build".to_string()]),
            Phase::new("test", ["build".to_string()], []),
        ])
        .unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.get("test").is_some());
    }

    #[test]
    fn test_unknown_self_dependency_rejected() {
        let result = PhaseSet::new([Phase::new("test", ["compile".to_string()], [])]);
        assert!(matches!(
            result,
            Err(GraphError::UnknownPhaseDependency { .. })
        ));
    }

    #[test]
    fn test_unknown_upstream_dependency_rejected() {
        let result = PhaseSet::new([Phase::new("bundle", [], ["compile".to_string()])]);
        assert!(matches!(
            result,
            Err(GraphError::UnknownPhaseDependency { .. })
        ));
    }

    #[test]
    fn test_duplicate_phase_rejected() {
        let result = PhaseSet::new([Phase::new("build", [], []), Phase::new("build", [], [])]);
        assert!(matches!(result, Err(GraphError::DuplicatePhase { .. })));
    }

    #[test]
    fn test_synthetic_phase_depends_on_itself_upstream() {
        let phase = Phase::synthetic("deploy");
        assert!(phase.is_synthetic);
        assert!(phase.self_dependencies.is_empty());
        assert!(phase.upstream_dependencies.contains("deploy"));
    }
}
