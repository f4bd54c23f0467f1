// src/dag/validator.rs

//! Acyclicity check for an attack list's dependency references.

use std::collections::BTreeSet;

use tracing::debug;

use crate::model::Attack;

/// Result of validating one dependency graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphValidation {
    Valid,
    /// The first cycle found in input order, as positions along the DFS
    /// stack (from the re-entered node to the node that closed the loop).
    Invalid { cycle: Vec<usize> },
}

impl GraphValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self, GraphValidation::Valid)
    }

    /// Members of the reported cycle; empty for a valid graph.
    pub fn cycle_members(&self) -> BTreeSet<usize> {
        match self {
            GraphValidation::Valid => BTreeSet::new(),
            GraphValidation::Invalid { cycle } => cycle.iter().copied().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Check that the dependency lists form a DAG.
///
/// `deps[i]` lists the positions attack `i` depends on. Positions outside
/// `0..deps.len()` are ignored. Traversal follows input order for both roots
/// and edges, so the reported cycle is deterministic for a fixed input.
pub fn validate_dependencies<D: AsRef<[usize]>>(deps: &[D]) -> GraphValidation {
    let len = deps.len();
    let mut marks = vec![Mark::Unvisited; len];

    for root in 0..len {
        if marks[root] != Mark::Unvisited {
            continue;
        }

        // Explicit stack of (node, next edge index); `path` mirrors the
        // recursion stack of in-progress nodes.
        let mut frames: Vec<(usize, usize)> = vec![(root, 0)];
        let mut path: Vec<usize> = vec![root];
        marks[root] = Mark::InProgress;

        while let Some(frame) = frames.last_mut() {
            let (node, edge) = *frame;
            let edges = deps[node].as_ref();

            if edge >= edges.len() {
                marks[node] = Mark::Done;
                frames.pop();
                path.pop();
                continue;
            }
            frame.1 += 1;

            let next = edges[edge];
            if next >= len {
                continue;
            }

            match marks[next] {
                Mark::Done => {}
                Mark::InProgress => {
                    let start = path
                        .iter()
                        .position(|&p| p == next)
                        .unwrap_or(0);
                    let cycle = path[start..].to_vec();
                    debug!(?cycle, "dependency cycle found");
                    return GraphValidation::Invalid { cycle };
                }
                Mark::Unvisited => {
                    marks[next] = Mark::InProgress;
                    frames.push((next, 0));
                    path.push(next);
                }
            }
        }
    }

    GraphValidation::Valid
}

/// Validate attacks ordered by position.
pub fn validate_attacks(attacks: &[Attack]) -> GraphValidation {
    let deps: Vec<&[usize]> = attacks.iter().map(|a| a.deps.as_slice()).collect();
    validate_dependencies(&deps)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle_of(deps: &[Vec<usize>]) -> Vec<usize> {
        match validate_dependencies(deps) {
            GraphValidation::Invalid { cycle } => cycle,
            GraphValidation::Valid => panic!("expected a cycle in {deps:?}"),
        }
    }

    #[test]
    fn empty_and_independent_lists_are_valid() {
        let empty: Vec<Vec<usize>> = Vec::new();
        assert!(validate_dependencies(&empty).is_valid());
        assert!(validate_dependencies(&[vec![], vec![], vec![]]).is_valid());
    }

    #[test]
    fn self_reference_is_a_cycle_of_one() {
        assert_eq!(cycle_of(&[vec![], vec![1]]), vec![1]);
    }

    #[test]
    fn cycle_is_stack_segment_from_reentered_node() {
        // 0 -> 1 -> 2 -> 3 -> 1; the tail node 0 is not part of the cycle.
        assert_eq!(cycle_of(&[vec![1], vec![2], vec![3], vec![1]]), vec![1, 2, 3]);
    }

    #[test]
    fn out_of_range_edges_never_cycle() {
        assert!(validate_dependencies(&[vec![5, 9], vec![0, 100]]).is_valid());
    }
}
