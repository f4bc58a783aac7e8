//! Wait-for graph and cycle detection.

use std::collections::HashSet;

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use smol_str::SmolStr;

use super::transactions::BlockingTree;

/// Cycles found in the wait-for graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadlockReport {
    /// Each cycle lists its transactions in wait order, each id once.
    pub cycles: Vec<Vec<SmolStr>>,
    pub count: usize,
}

impl DeadlockReport {
    /// Whether `transaction` takes part in any cycle.
    #[must_use]
    pub fn involves(&self, transaction: &str) -> bool {
        self.cycles
            .iter()
            .any(|cycle| cycle.iter().any(|id| id == transaction))
    }
}

/// Directed graph where `A -> B` means A waits on a lock held by B.
#[derive(Debug, Clone, Default)]
pub(crate) struct WaitForGraph {
    edges: IndexMap<SmolStr, IndexSet<SmolStr>>,
}

impl WaitForGraph {
    pub(crate) fn from_trees<'a>(trees: impl IntoIterator<Item = &'a BlockingTree>) -> Self {
        let mut graph = Self::default();
        for tree in trees {
            graph.add_node(&tree.transaction);
            for blocker in &tree.blocked_by {
                graph.add_edge(&tree.transaction, blocker);
            }
            for waiter in &tree.blocking {
                graph.add_edge(waiter, &tree.transaction);
            }
        }
        graph
    }

    fn add_node(&mut self, node: &SmolStr) {
        self.edges.entry(node.clone()).or_default();
    }

    pub(crate) fn add_edge(&mut self, from: &SmolStr, to: &SmolStr) {
        if from == to {
            return;
        }
        self.edges.entry(from.clone()).or_default().insert(to.clone());
        self.add_node(to);
    }

    fn neighbor(&self, node: &SmolStr, index: usize) -> Option<&SmolStr> {
        self.edges.get(node).and_then(|targets| targets.get_index(index))
    }

    /// Depth-first search from every unvisited node. Reaching a node that is
    /// still on the current path closes a cycle: the path slice from that
    /// node's position to the top is recorded. Rotations of one cycle are
    /// reported once.
    pub(crate) fn find_cycles(&self) -> Vec<Vec<SmolStr>> {
        let mut visited: HashSet<SmolStr> = HashSet::new();
        let mut seen: HashSet<Vec<SmolStr>> = HashSet::new();
        let mut cycles = Vec::new();

        for start in self.edges.keys() {
            if visited.contains(start) {
                continue;
            }
            visited.insert(start.clone());
            let mut path: Vec<SmolStr> = vec![start.clone()];
            let mut cursors: Vec<usize> = vec![0];

            while let Some(depth) = path.len().checked_sub(1) {
                let node = path[depth].clone();
                let index = cursors[depth];
                let Some(next) = self.neighbor(&node, index).cloned() else {
                    path.pop();
                    cursors.pop();
                    continue;
                };
                cursors[depth] += 1;
                if let Some(position) = path.iter().position(|id| *id == next) {
                    let cycle = path[position..].to_vec();
                    if seen.insert(canonical(&cycle)) {
                        cycles.push(cycle);
                    }
                } else if visited.insert(next.clone()) {
                    path.push(next);
                    cursors.push(0);
                }
            }
        }
        cycles
    }
}

fn canonical(cycle: &[SmolStr]) -> Vec<SmolStr> {
    let start = cycle
        .iter()
        .enumerate()
        .min_by(|(_, left), (_, right)| left.cmp(right))
        .map_or(0, |(index, _)| index);
    cycle[start..].iter().chain(&cycle[..start]).cloned().collect()
}
