//! Step dependency DAG helper: cycle detection and topological scheduling
//! order, backing the Scheduler's readiness checks (spec §4.11, §9 "DAG as
//! a plain vector with id-based edges, validated with petgraph on demand").

use crate::error::{MakerError, MakerResult};
use crate::state::Step;
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// Builds a petgraph `DiGraph` from a session's steps, edges pointing from
/// dependency to dependent.
fn build_graph(steps: &[Step]) -> (DiGraph<&str, ()>, HashMap<&str, NodeIndex>) {
    let mut graph = DiGraph::new();
    let mut index_of = HashMap::new();

    for step in steps {
        let idx = graph.add_node(step.id.as_str());
        index_of.insert(step.id.as_str(), idx);
    }

    for step in steps {
        let Some(&dependent_idx) = index_of.get(step.id.as_str()) else {
            continue;
        };
        for dep in &step.dependencies {
            if let Some(&dep_idx) = index_of.get(dep.as_str()) {
                graph.add_edge(dep_idx, dependent_idx, ());
            }
        }
    }

    (graph, index_of)
}

/// Rejects a decomposition whose dependency edges form a cycle (spec §4.4
/// "the decomposition's dependency graph must be acyclic").
pub fn validate_acyclic(steps: &[Step]) -> MakerResult<()> {
    let (graph, _) = build_graph(steps);
    if is_cyclic_directed(&graph) {
        return Err(MakerError::Decomposition {
            reason: "step dependency graph contains a cycle".to_string(),
        });
    }
    Ok(())
}

/// A topological ordering of step ids, used only for display/debugging —
/// the Scheduler itself dispatches by per-step readiness, not by this fixed
/// order (spec §4.11).
pub fn topological_order(steps: &[Step]) -> MakerResult<Vec<String>> {
    let (graph, _) = build_graph(steps);
    let order = toposort(&graph, None).map_err(|_| MakerError::Decomposition {
        reason: "step dependency graph contains a cycle".to_string(),
    })?;
    Ok(order.into_iter().map(|idx| graph[idx].to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Step;

    fn step_with_deps(id: &str, deps: &[&str]) -> Step {
        let mut step = Step::new(id, "desc", "");
        step.dependencies = deps.iter().map(|d| d.to_string()).collect();
        step
    }

    #[test]
    fn detects_cycle() {
        let steps = vec![step_with_deps("a", &["b"]), step_with_deps("b", &["a"])];
        assert!(validate_acyclic(&steps).is_err());
    }

    #[test]
    fn accepts_linear_chain() {
        let steps = vec![step_with_deps("a", &[]), step_with_deps("b", &["a"]), step_with_deps("c", &["b"])];
        assert!(validate_acyclic(&steps).is_ok());
        let order = topological_order(&steps).unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }
}
