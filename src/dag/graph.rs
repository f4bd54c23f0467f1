// src/dag/graph.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::model::Attack;

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone, Default)]
struct DagNode {
    /// Direct dependencies: attacks that must complete before this one runs.
    deps: Vec<usize>,
    /// Direct dependents: attacks that list this one in their deps.
    dependents: Vec<usize>,
}

/// Adjacency view of one campaign's attack list, keyed by position.
///
/// Dependency references that point outside the list are dropped here, so
/// every consumer sees them as absent edges. Acyclicity is *not* assumed;
/// run [`crate::dag::validate_dependencies`] before relying on
/// [`DependencyGraph::plan_order`].
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<DagNode>,
}

impl DependencyGraph {
    /// Build from raw dependency lists, one per attack position.
    pub fn from_deps<D: AsRef<[usize]>>(deps: &[D]) -> Self {
        let len = deps.len();
        let mut nodes = vec![DagNode::default(); len];

        for (position, list) in deps.iter().enumerate() {
            for &dep in list.as_ref() {
                if dep >= len {
                    continue;
                }
                if !nodes[position].deps.contains(&dep) {
                    nodes[position].deps.push(dep);
                    nodes[dep].dependents.push(position);
                }
            }
        }

        Self { nodes }
    }

    /// Build from attacks ordered by position.
    pub fn from_attacks(attacks: &[Attack]) -> Self {
        let deps: Vec<&[usize]> = attacks.iter().map(|a| a.deps.as_slice()).collect();
        Self::from_deps(&deps)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Immediate (in-range) dependencies of an attack.
    pub fn dependencies_of(&self, position: usize) -> &[usize] {
        self.nodes
            .get(position)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of an attack.
    pub fn dependents_of(&self, position: usize) -> &[usize] {
        self.nodes
            .get(position)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Attacks with no in-range dependencies.
    pub fn roots(&self) -> Vec<usize> {
        (0..self.nodes.len())
            .filter(|&p| self.nodes[p].deps.is_empty())
            .collect()
    }

    /// All attacks transitively downstream of `position` (excluding itself).
    pub fn downstream_of(&self, position: usize) -> Vec<usize> {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack: Vec<usize> = self.dependents_of(position).to_vec();
        let mut out = Vec::new();

        while let Some(p) = stack.pop() {
            if p == position || std::mem::replace(&mut seen[p], true) {
                continue;
            }
            out.push(p);
            stack.extend_from_slice(self.dependents_of(p));
        }

        out.sort_unstable();
        out
    }

    /// A dependency-respecting execution order, or `None` on a cycle.
    ///
    /// Used for plan output; cycle *reporting* is the validator's job.
    pub fn plan_order(&self) -> Option<Vec<usize>> {
        // Edge direction: dep -> dependent.
        let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();

        for position in 0..self.nodes.len() {
            graph.add_node(position);
        }

        for (position, node) in self.nodes.iter().enumerate() {
            for &dep in &node.deps {
                graph.add_edge(dep, position, ());
            }
        }

        toposort(&graph, None).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_references_are_dropped() {
        let graph = DependencyGraph::from_deps(&[vec![7], vec![0, 42]]);
        assert!(graph.dependencies_of(0).is_empty());
        assert_eq!(graph.dependencies_of(1), &[0]);
        assert_eq!(graph.roots(), vec![0]);
    }

    #[test]
    fn diamond_has_dependents_and_order() {
        let graph = DependencyGraph::from_deps(&[vec![], vec![0], vec![0], vec![1, 2]]);
        assert_eq!(graph.dependents_of(0), &[1, 2]);
        assert_eq!(graph.downstream_of(0), vec![1, 2, 3]);

        let order = graph.plan_order().expect("diamond is acyclic");
        let pos = |n| order.iter().position(|&p| p == n).unwrap();
        assert!(pos(0) < pos(1));
        assert!(pos(0) < pos(2));
        assert!(pos(1) < pos(3) && pos(2) < pos(3));
    }

    #[test]
    fn plan_order_is_none_on_cycle() {
        let graph = DependencyGraph::from_deps(&[vec![1], vec![0]]);
        assert!(graph.plan_order().is_none());
    }
}
