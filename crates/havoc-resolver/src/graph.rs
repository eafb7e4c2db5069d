//! The resolved module graph: who pulled in whom, and for what.

use std::collections::{HashMap, HashSet};
use std::fmt;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

/// A resolved module with the vulnerability variants chosen for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleNode {
    pub name: String,
    pub vulnerabilities: Vec<String>,
}

impl fmt::Display for ModuleNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.vulnerabilities.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} [{}]", self.name, self.vulnerabilities.join(", "))
        }
    }
}

/// Edge label: the capability the parent required from the child.
#[derive(Debug, Clone)]
pub struct CapabilityEdge {
    pub provides: String,
}

/// Directed graph of resolved modules, parent to required provider.
pub struct ModuleGraph {
    graph: DiGraph<ModuleNode, CapabilityEdge>,
    index: HashMap<String, NodeIndex>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    /// Add or retrieve a node by module name.
    pub fn add_node(&mut self, node: ModuleNode) -> NodeIndex {
        if let Some(&idx) = self.index.get(&node.name) {
            self.graph[idx] = node;
            return idx;
        }
        let name = node.name.clone();
        let idx = self.graph.add_node(node);
        self.index.insert(name, idx);
        idx
    }

    /// Add an edge from a module to the provider it depends on.
    /// Duplicate edges between the same pair are collapsed.
    pub fn add_edge(&mut self, from: NodeIndex, to: NodeIndex, edge: CapabilityEdge) {
        if !self.graph.edges(from).any(|e| e.target() == to) {
            self.graph.add_edge(from, to, edge);
        }
    }

    pub fn find(&self, name: &str) -> Option<NodeIndex> {
        self.index.get(name).copied()
    }

    pub fn node(&self, idx: NodeIndex) -> &ModuleNode {
        &self.graph[idx]
    }

    pub fn all_nodes(&self) -> Vec<&ModuleNode> {
        self.graph.node_indices().map(|idx| &self.graph[idx]).collect()
    }

    /// Modules nobody depends on, sorted by name. These are the
    /// requested roots of the resolution.
    pub fn roots(&self) -> Vec<NodeIndex> {
        let mut roots: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .edges_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .collect();
        roots.sort_by(|a, b| self.graph[*a].name.cmp(&self.graph[*b].name));
        roots
    }

    /// Direct providers a module depends on.
    pub fn dependencies_of(&self, idx: NodeIndex) -> Vec<(NodeIndex, &CapabilityEdge)> {
        self.graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| (e.target(), e.weight()))
            .collect()
    }

    /// Modules depending on this one.
    pub fn dependents_of(&self, idx: NodeIndex) -> Vec<(NodeIndex, &CapabilityEdge)> {
        self.graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| (e.source(), e.weight()))
            .collect()
    }

    /// Render the graph as a tree rooted at every requested module.
    pub fn print_tree(&self) -> String {
        let mut output = String::new();
        let mut visited = HashSet::new();
        for root in self.roots() {
            output.push_str(&format!("{}\n", self.graph[root]));
            visited.insert(root);
            let deps = self.dependencies_of(root);
            let count = deps.len();
            for (i, (child, edge)) in deps.iter().enumerate() {
                self.print_subtree(&mut output, *child, edge, "", i == count - 1, &mut visited);
            }
            visited.remove(&root);
        }
        output
    }

    fn print_subtree(
        &self,
        output: &mut String,
        idx: NodeIndex,
        edge: &CapabilityEdge,
        prefix: &str,
        is_last: bool,
        visited: &mut HashSet<NodeIndex>,
    ) {
        let connector = if is_last { "└── " } else { "├── " };
        let node = &self.graph[idx];
        output.push_str(&format!(
            "{prefix}{connector}{node} (for {})\n",
            edge.provides
        ));

        if !visited.insert(idx) {
            return;
        }
        let child_prefix = format!("{prefix}{}", if is_last { "    " } else { "│   " });
        let deps = self.dependencies_of(idx);
        let count = deps.len();
        for (i, (child, edge)) in deps.iter().enumerate() {
            self.print_subtree(
                output,
                *child,
                edge,
                &child_prefix,
                i == count - 1,
                visited,
            );
        }
        visited.remove(&idx);
    }

    /// Find a dependency path between two modules, if one exists.
    pub fn find_path(&self, from: &str, to: &str) -> Option<Vec<&ModuleNode>> {
        let start = self.find(from)?;
        let target = self.find(to)?;
        let mut path = Vec::new();
        let mut visited = HashSet::new();
        if self.dfs_path(start, target, &mut path, &mut visited) {
            Some(path.iter().map(|&idx| &self.graph[idx]).collect())
        } else {
            None
        }
    }

    fn dfs_path(
        &self,
        current: NodeIndex,
        target: NodeIndex,
        path: &mut Vec<NodeIndex>,
        visited: &mut HashSet<NodeIndex>,
    ) -> bool {
        path.push(current);
        if current == target {
            return true;
        }
        if !visited.insert(current) {
            path.pop();
            return false;
        }
        for edge in self.graph.edges(current) {
            if self.dfs_path(edge.target(), target, path, visited) {
                return true;
            }
        }
        path.pop();
        visited.remove(&current);
        false
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ModuleGraph {
    fn default() -> Self {
        Self::new()
    }
}
