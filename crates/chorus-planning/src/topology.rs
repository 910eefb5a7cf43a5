//! Graph ordering helpers

use std::collections::{HashMap, HashSet};

use chorus_core::{AgentDependencyGraph, AgentId, PlanPhase};
use tracing::warn;

/// Result of layering a dependency graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayeredOrder {
    pub layers: Vec<Vec<AgentId>>,
    /// Layering stalled on a cycle and fell back to one combined layer
    pub cycle_detected: bool,
}

/// Layered topological sort of the graph
///
/// Each layer holds every unplaced agent whose outstanding prerequisite count
/// is zero, in node order. If a cycle stops progress, the order degrades to a
/// single layer containing every agent.
pub fn layered_order(graph: &AgentDependencyGraph) -> LayeredOrder {
    let mut outstanding: HashMap<AgentId, usize> = graph
        .nodes
        .keys()
        .map(|id| {
            let distinct: HashSet<&AgentId> = graph.dependencies_of(id).iter().collect();
            (*id, distinct.len())
        })
        .collect();

    let mut placed: HashSet<AgentId> = HashSet::new();
    let mut layers: Vec<Vec<AgentId>> = Vec::new();

    loop {
        let layer: Vec<AgentId> = graph
            .nodes
            .keys()
            .filter(|id| !placed.contains(*id) && outstanding.get(*id) == Some(&0))
            .copied()
            .collect();
        if layer.is_empty() {
            break;
        }

        for id in &layer {
            placed.insert(*id);
            for dependent in graph.dependents_of(id) {
                if let Some(count) = outstanding.get_mut(&dependent) {
                    *count = count.saturating_sub(1);
                }
            }
        }
        layers.push(layer);
    }

    if placed.len() < graph.len() {
        warn!(
            placed = placed.len(),
            total = graph.len(),
            "Dependency cycle detected, falling back to a single layer"
        );
        return LayeredOrder {
            layers: vec![graph.nodes.keys().copied().collect()],
            cycle_detected: true,
        };
    }

    LayeredOrder {
        layers,
        cycle_detected: false,
    }
}

/// Groups of phases within a subset that may run side by side
///
/// Greedy: each unprocessed parallel-safe phase seeds a group and pulls in
/// every later parallel-safe phase unrelated to all current members. Two
/// phases are related if either lists the other as a dependency or they
/// share a direct dependency. Only groups of two or more are returned.
pub fn parallel_opportunities(phases: &[PlanPhase]) -> Vec<Vec<String>> {
    let mut processed: HashSet<&str> = HashSet::new();
    let mut groups = Vec::new();

    for seed in phases {
        if !seed.parallel_safe || !processed.insert(seed.name.as_str()) {
            continue;
        }
        let mut members: Vec<&PlanPhase> = vec![seed];
        for other in phases {
            if other.parallel_safe
                && !processed.contains(other.name.as_str())
                && members.iter().all(|m| !related(m, other))
            {
                processed.insert(other.name.as_str());
                members.push(other);
            }
        }
        if members.len() > 1 {
            groups.push(members.iter().map(|p| p.name.clone()).collect());
        }
    }
    groups
}

fn related(a: &PlanPhase, b: &PlanPhase) -> bool {
    a.depends_on(&b.name)
        || b.depends_on(&a.name)
        || a.dependencies.iter().any(|d| b.depends_on(d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_core::{ExecutionPlan, GoalDefinition, SubAgentDefinition};
    use indexmap::IndexMap;

    fn graph(edges: &[(usize, Vec<usize>)], count: usize) -> (AgentDependencyGraph, Vec<AgentId>) {
        let agents: Vec<SubAgentDefinition> = (0..count)
            .map(|i| {
                SubAgentDefinition::new(
                    format!("agent-{}", i),
                    GoalDefinition::new("g", "d"),
                    ExecutionPlan::new(Vec::new()),
                )
                .unwrap()
            })
            .collect();
        let ids: Vec<AgentId> = agents.iter().map(|a| a.id).collect();
        let nodes: IndexMap<_, _> = agents.into_iter().map(|a| (a.id, a)).collect();
        let edge_map: IndexMap<AgentId, Vec<AgentId>> = edges
            .iter()
            .map(|(from, deps)| (ids[*from], deps.iter().map(|d| ids[*d]).collect()))
            .collect();
        (AgentDependencyGraph::new(nodes, edge_map).unwrap(), ids)
    }

    #[test]
    fn test_diamond_layers() {
        // 1 and 2 depend on 0; 3 depends on 1 and 2
        let (g, ids) = graph(&[(1, vec![0]), (2, vec![0]), (3, vec![1, 2])], 4);
        let order = layered_order(&g);
        assert!(!order.cycle_detected);
        assert_eq!(
            order.layers,
            vec![vec![ids[0]], vec![ids[1], ids[2]], vec![ids[3]]]
        );
    }

    #[test]
    fn test_every_prerequisite_in_earlier_layer() {
        let (g, _) = graph(&[(1, vec![0]), (3, vec![1]), (4, vec![2, 3]), (5, vec![0])], 6);
        let order = layered_order(&g);
        let layer_of = |id: &AgentId| order.layers.iter().position(|l| l.contains(id)).unwrap();

        let placed: usize = order.layers.iter().map(Vec::len).sum();
        assert_eq!(placed, g.len());
        for (agent, deps) in &g.edges {
            for dep in deps {
                assert!(layer_of(dep) < layer_of(agent));
            }
        }
    }

    #[test]
    fn test_cycle_falls_back_to_single_layer() {
        let (g, ids) = graph(&[(0, vec![2]), (1, vec![0]), (2, vec![1])], 3);
        let order = layered_order(&g);
        assert!(order.cycle_detected);
        assert_eq!(order.layers, vec![ids.clone()]);
    }

    #[test]
    fn test_partial_cycle_still_degrades() {
        // 0 is free, 1 and 2 form a cycle
        let (g, ids) = graph(&[(1, vec![2]), (2, vec![1])], 3);
        let order = layered_order(&g);
        assert!(order.cycle_detected);
        assert_eq!(order.layers, vec![ids]);
    }

    #[test]
    fn test_empty_graph() {
        let order = layered_order(&AgentDependencyGraph::default());
        assert!(order.layers.is_empty());
        assert!(!order.cycle_detected);
    }

    #[test]
    fn test_parallel_opportunities() {
        let phases = vec![
            PlanPhase::new("a", ""),
            PlanPhase::new("b", ""),
            PlanPhase::new("c", "").with_dependencies(["a"]),
            PlanPhase::new("d", "").with_dependencies(["a"]),
            PlanPhase::new("e", "").sequential(),
        ];
        // c and d depend on a and share that dependency
        let groups = parallel_opportunities(&phases);
        assert_eq!(groups, vec![vec!["a".to_string(), "b".to_string()]]);
    }

    #[test]
    fn test_parallel_opportunities_single_phase() {
        let phases = vec![PlanPhase::new("only", "")];
        assert!(parallel_opportunities(&phases).is_empty());
    }
}
