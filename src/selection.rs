//! Set algebra over the project dependency graph.
//!
//! These are the primitives the CLI layer combines to turn inclusion and
//! exclusion flags into a concrete project subset: plain union and
//! intersection, single-hop neighbor enumeration, and the two fixed-point
//! closures that follow dependency or consumer edges to saturation.
//!
//! All functions are pure - inputs are never mutated, and an empty input
//! always yields an empty output.

use crate::project::{ProjectGraph, ProjectId};
use std::collections::BTreeSet;

/// Union of any number of project sets.
pub fn union<'a>(sets: impl IntoIterator<Item = &'a BTreeSet<ProjectId>>) -> BTreeSet<ProjectId> {
    let mut result = BTreeSet::new();
    for set in sets {
        result.extend(set.iter().copied());
    }
    result
}

/// Intersection of a first set with any number of further sets.
pub fn intersection<'a>(
    first: &BTreeSet<ProjectId>,
    rest: impl IntoIterator<Item = &'a BTreeSet<ProjectId>>,
) -> BTreeSet<ProjectId> {
    let mut result = first.clone();
    for set in rest {
        result = result.intersection(set).copied().collect();
    }
    result
}

/// One dependency hop from each member. May yield the same project more
/// than once; callers de-duplicate by collecting into a set.
pub fn direct_dependencies_of<'a>(
    graph: &'a ProjectGraph,
    projects: &'a BTreeSet<ProjectId>,
) -> impl Iterator<Item = ProjectId> + 'a {
    projects
        .iter()
        .flat_map(|&id| graph.get(id).dependencies.iter().copied())
}

/// One consumer hop from each member. May yield duplicates.
pub fn direct_consumers_of<'a>(
    graph: &'a ProjectGraph,
    projects: &'a BTreeSet<ProjectId>,
) -> impl Iterator<Item = ProjectId> + 'a {
    projects
        .iter()
        .flat_map(|&id| graph.get(id).consumers.iter().copied())
}

/// Every project reachable from the input by following dependency edges,
/// including the input itself. Idempotent.
pub fn expand_all_dependencies(
    graph: &ProjectGraph,
    projects: &BTreeSet<ProjectId>,
) -> BTreeSet<ProjectId> {
    expand(projects, |id| &graph.get(id).dependencies)
}

/// Every project reachable from the input by following consumer edges,
/// including the input itself. Idempotent.
pub fn expand_all_consumers(
    graph: &ProjectGraph,
    projects: &BTreeSet<ProjectId>,
) -> BTreeSet<ProjectId> {
    expand(projects, |id| &graph.get(id).consumers)
}

/// Fixed-point closure: keep adding neighbors until the set stops growing.
fn expand<'a>(
    start: &BTreeSet<ProjectId>,
    neighbors: impl Fn(ProjectId) -> &'a BTreeSet<ProjectId>,
) -> BTreeSet<ProjectId> {
    let mut result = start.clone();
    let mut frontier: Vec<ProjectId> = start.iter().copied().collect();
    while let Some(id) = frontier.pop() {
        for &next in neighbors(id) {
            if result.insert(next) {
                frontier.push(next);
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Chain: a -> b -> c (a depends on b, b depends on c).
    fn chain() -> ProjectGraph {
        ProjectGraph::builder()
            .project("a", vec!["b"])
            .project("b", vec!["c"])
            .project("c", vec![])
            .build()
            .unwrap()
    }

    fn set(graph: &ProjectGraph, names: &[&str]) -> BTreeSet<ProjectId> {
        names.iter().map(|n| graph.id_of(n).unwrap()).collect()
    }

    #[test]
    fn test_union_commutative() {
        let graph = chain();
        let x = set(&graph, &["a", "b"]);
        let y = set(&graph, &["b", "c"]);
        assert_eq!(union([&x, &y]), union([&y, &x]));
        assert_eq!(union([&x, &y]), set(&graph, &["a", "b", "c"]));
    }

    #[test]
    fn test_intersection_associative() {
        let graph = chain();
        let x = set(&graph, &["a", "b"]);
        let y = set(&graph, &["b", "c"]);
        let z = set(&graph, &["b"]);

        let left = intersection(&intersection(&x, [&y]), [&z]);
        let right = intersection(&x, [&intersection(&y, [&z])]);
        assert_eq!(left, right);
        assert_eq!(left, set(&graph, &["b"]));
    }

    #[test]
    fn test_expand_all_dependencies_transitive() {
        let graph = chain();
        let expanded = expand_all_dependencies(&graph, &set(&graph, &["a"]));
        assert_eq!(expanded, set(&graph, &["a", "b", "c"]));
    }

    #[test]
    fn test_expand_all_consumers_transitive() {
        let graph = chain();
        let expanded = expand_all_consumers(&graph, &set(&graph, &["c"]));
        assert_eq!(expanded, set(&graph, &["a", "b", "c"]));
    }

    #[test]
    fn test_expansion_idempotent() {
        let graph = chain();
        let once = expand_all_dependencies(&graph, &set(&graph, &["a"]));
        let twice = expand_all_dependencies(&graph, &once);
        assert_eq!(once, twice);

        let once = expand_all_consumers(&graph, &set(&graph, &["c"]));
        let twice = expand_all_consumers(&graph, &once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_empty_input_yields_empty_output() {
        let graph = chain();
        let empty = BTreeSet::new();
        assert!(expand_all_dependencies(&graph, &empty).is_empty());
        assert!(expand_all_consumers(&graph, &empty).is_empty());
        assert!(union([&empty]).is_empty());
        assert_eq!(direct_dependencies_of(&graph, &empty).count(), 0);
    }

    #[test]
    fn test_direct_hops_may_duplicate() {
        // Both a and b depend on c, so one hop from {a, b} yields c twice.
        let graph = ProjectGraph::builder()
            .project("a", vec!["c"])
            .project("b", vec!["c"])
            .project("c", vec![])
            .build()
            .unwrap();
        let input = set(&graph, &["a", "b"]);
        let hops: Vec<ProjectId> = direct_dependencies_of(&graph, &input).collect();
        assert_eq!(hops.len(), 2);
        let deduped: BTreeSet<ProjectId> = hops.into_iter().collect();
        assert_eq!(deduped, set(&graph, &["c"]));
    }

    #[test]
    fn test_expansion_tolerates_diamond() {
        let graph = ProjectGraph::builder()
            .project("top", vec!["left", "right"])
            .project("left", vec!["base"])
            .project("right", vec!["base"])
            .project("base", vec![])
            .build()
            .unwrap();
        let expanded = expand_all_dependencies(&graph, &set(&graph, &["top"]));
        assert_eq!(expanded, graph.all());
    }
}
