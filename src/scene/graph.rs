//! Dependency graph between the variables of a set.
//!
//! Nodes are variables, identified by their stable key. An edge `a -> b` means
//! `a` references `b`, so `b` must settle before `a` may update. The scheduler
//! uses the graph for cycle warnings and to find the dependents of a changed
//! variable; the CLI prints it as a tree.

use anyhow::{Result, anyhow};
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use crate::variables::VariableKey;

/// A variable in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GraphNode {
    /// Stable identity
    pub key: VariableKey,
    /// Name at the time the graph was built
    pub name: String,
}

impl GraphNode {
    /// Node for a variable.
    pub fn new(key: VariableKey, name: impl Into<String>) -> Self {
        Self {
            key,
            name: name.into(),
        }
    }
}

impl fmt::Display for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.name)
    }
}

/// Directed graph of variable dependencies.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraph<GraphNode, ()>,
    node_map: HashMap<VariableKey, NodeIndex>,
}

impl DependencyGraph {
    /// Create a new empty dependency graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable if it is not in the graph yet.
    pub fn add_variable(&mut self, node: GraphNode) -> NodeIndex {
        if let Some(&index) = self.node_map.get(&node.key) {
            index
        } else {
            let key = node.key;
            let index = self.graph.add_node(node);
            self.node_map.insert(key, index);
            index
        }
    }

    /// Record that `from` references `to`.
    pub fn add_dependency(&mut self, from: GraphNode, to: GraphNode) {
        let from_idx = self.add_variable(from);
        let to_idx = self.add_variable(to);

        if !self.graph.contains_edge(from_idx, to_idx) {
            self.graph.add_edge(from_idx, to_idx, ());
        }
    }

    /// Fails with the path of the first cycle found, e.g.
    /// `$a → $b → $a`.
    pub fn detect_cycles(&self) -> Result<()> {
        let mut finished = HashSet::new();
        let mut path = Vec::new();

        for start in self.graph.node_indices() {
            if finished.contains(&start) {
                continue;
            }
            if let Some(cycle) = self.find_cycle(start, &mut finished, &mut path) {
                let rendered: Vec<String> = cycle.iter().map(|&idx| self.graph[idx].to_string()).collect();
                return Err(anyhow!("Circular variable dependency detected: {}", rendered.join(" → ")));
            }
        }
        Ok(())
    }

    fn find_cycle(
        &self,
        node: NodeIndex,
        finished: &mut HashSet<NodeIndex>,
        path: &mut Vec<NodeIndex>,
    ) -> Option<Vec<NodeIndex>> {
        if let Some(position) = path.iter().position(|&on_path| on_path == node) {
            let mut cycle = path[position..].to_vec();
            cycle.push(node);
            return Some(cycle);
        }
        if finished.contains(&node) {
            return None;
        }

        path.push(node);
        let cycle = self.graph.neighbors(node).find_map(|next| self.find_cycle(next, finished, path));
        path.pop();
        finished.insert(node);
        cycle
    }

    /// Variables ordered so that dependencies come before their dependents.
    pub fn topological_order(&self) -> Result<Vec<GraphNode>> {
        let order = toposort(&self.graph, None).map_err(|cycle| {
            anyhow!("No update order: {} is part of a dependency cycle", self.graph[cycle.node_id()])
        })?;
        Ok(order.into_iter().rev().map(|idx| self.graph[idx].clone()).collect())
    }

    /// Variables referenced directly by `key`.
    pub fn dependencies_of(&self, key: VariableKey) -> Vec<GraphNode> {
        self.neighbors(key, Direction::Outgoing)
    }

    /// Variables referencing `key` directly.
    pub fn dependents_of(&self, key: VariableKey) -> Vec<GraphNode> {
        self.neighbors(key, Direction::Incoming)
    }

    fn neighbors(&self, key: VariableKey, direction: Direction) -> Vec<GraphNode> {
        let Some(&idx) = self.node_map.get(&key) else {
            return Vec::new();
        };
        let mut nodes: Vec<GraphNode> =
            self.graph.neighbors_directed(idx, direction).map(|n| self.graph[n].clone()).collect();
        // petgraph yields neighbors in reverse insertion order
        nodes.reverse();
        nodes
    }

    /// Every variable that references `key` directly or indirectly, breadth first.
    pub fn transitive_dependents(&self, key: VariableKey) -> Vec<GraphNode> {
        let mut seen = HashSet::from([key]);
        let mut result = Vec::new();
        let mut queue = VecDeque::from([key]);

        while let Some(current) = queue.pop_front() {
            for dependent in self.dependents_of(current) {
                if seen.insert(dependent.key) {
                    queue.push_back(dependent.key);
                    result.push(dependent);
                }
            }
        }

        result
    }

    /// Whether the graph has no variables.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Number of variables.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of dependency edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// All variables, in insertion order.
    pub fn nodes(&self) -> Vec<GraphNode> {
        self.graph.node_indices().map(|idx| self.graph[idx].clone()).collect()
    }

    /// Variables nothing else depends on.
    pub fn roots(&self) -> Vec<GraphNode> {
        self.graph
            .node_indices()
            .filter(|idx| self.graph.neighbors_directed(*idx, Direction::Incoming).next().is_none())
            .map(|idx| self.graph[idx].clone())
            .collect()
    }

    /// Render the dependencies of `root` as a tree.
    pub fn to_tree_string(&self, root: &GraphNode) -> String {
        let mut result = String::new();
        let mut visited = HashSet::new();
        self.build_tree_string(root, &mut result, "", true, &mut visited);
        result
    }

    fn build_tree_string(
        &self,
        node: &GraphNode,
        result: &mut String,
        prefix: &str,
        is_last: bool,
        visited: &mut HashSet<VariableKey>,
    ) {
        let connector = if is_last {
            "└── "
        } else {
            "├── "
        };
        result.push_str(&format!("{prefix}{connector}{node}\n"));

        let child_prefix = if is_last {
            format!("{prefix}    ")
        } else {
            format!("{prefix}│   ")
        };

        if !visited.insert(node.key) {
            result.push_str(&format!("{child_prefix}└── (circular reference)\n"));
            return;
        }

        let deps = self.dependencies_of(node.key);
        for (i, dep) in deps.iter().enumerate() {
            self.build_tree_string(dep, result, &child_prefix, i == deps.len() - 1, visited);
        }
        visited.remove(&node.key);
    }
}
