//! Module dependency graph representation.

use crate::types::{ModuleId, VariablePath};
use std::collections::{BTreeMap, HashSet, VecDeque};

/// A directed push dependency: `from` writes a variable that `to` reads
/// with a push-type input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    /// Feeding module.
    pub from: ModuleId,
    /// Consuming module.
    pub to: ModuleId,
    /// Variable carrying the dependency.
    pub path: VariablePath,
}

impl Edge {
    /// Create a new edge.
    pub fn new(from: ModuleId, to: ModuleId, path: VariablePath) -> Self {
        Self { from, to, path }
    }

    /// Whether the edge loops back onto its own module.
    pub fn is_self_loop(&self) -> bool {
        self.from == self.to
    }
}

/// Information about a module in the graph.
#[derive(Debug, Clone)]
pub struct GraphNode {
    /// Module ID.
    pub id: ModuleId,
    /// Module name, for diagnostics.
    pub name: String,
}

impl GraphNode {
    /// Create a new graph node.
    pub fn new(id: ModuleId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Push dependencies between application modules.
///
/// Only module-to-module edges are represented. Devices and the control
/// system are external sources and never take part in a cycle.
#[derive(Debug, Default)]
pub struct ModuleGraph {
    /// Nodes keyed by module ID, ordered for deterministic traversal.
    nodes: BTreeMap<ModuleId, GraphNode>,
    /// All edges in the graph.
    edges: Vec<Edge>,
    /// Edges indexed by source module.
    outgoing: BTreeMap<ModuleId, Vec<usize>>,
    /// Edges indexed by target module.
    incoming: BTreeMap<ModuleId, Vec<usize>>,
}

impl ModuleGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module to the graph.
    pub fn add_node(&mut self, node: GraphNode) {
        let id = node.id;
        self.nodes.insert(id, node);
        self.outgoing.entry(id).or_default();
        self.incoming.entry(id).or_default();
    }

    /// Add an edge. Unknown endpoints are added as unnamed nodes.
    pub fn add_edge(&mut self, edge: Edge) {
        for id in [edge.from, edge.to] {
            if !self.nodes.contains_key(&id) {
                self.add_node(GraphNode::new(id, id.to_string()));
            }
        }
        let idx = self.edges.len();
        self.outgoing.entry(edge.from).or_default().push(idx);
        self.incoming.entry(edge.to).or_default().push(idx);
        self.edges.push(edge);
    }

    /// Get a node by ID.
    pub fn get_node(&self, id: ModuleId) -> Option<&GraphNode> {
        self.nodes.get(&id)
    }

    /// Name of a module, or its ID if it is unknown.
    pub fn name_of(&self, id: ModuleId) -> String {
        self.nodes
            .get(&id)
            .map(|n| n.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// All module IDs in ascending order.
    pub fn node_ids(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.nodes.keys().copied()
    }

    /// Number of modules.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no modules.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All edges.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Get outgoing edges from a module.
    pub fn outgoing_edges(&self, node: ModuleId) -> impl Iterator<Item = &Edge> {
        self.outgoing
            .get(&node)
            .into_iter()
            .flat_map(|indices| indices.iter().map(|&i| &self.edges[i]))
    }

    /// Get incoming edges to a module.
    pub fn incoming_edges(&self, node: ModuleId) -> impl Iterator<Item = &Edge> {
        self.incoming
            .get(&node)
            .into_iter()
            .flat_map(|indices| indices.iter().map(|&i| &self.edges[i]))
    }

    /// Distinct successors of a module, in ascending order.
    pub fn successors(&self, node: ModuleId) -> Vec<ModuleId> {
        let mut out: Vec<ModuleId> = self.outgoing_edges(node).map(|e| e.to).collect();
        out.sort();
        out.dedup();
        out
    }

    /// Distinct predecessors of a module, in ascending order.
    pub fn predecessors(&self, node: ModuleId) -> Vec<ModuleId> {
        let mut out: Vec<ModuleId> = self.incoming_edges(node).map(|e| e.from).collect();
        out.sort();
        out.dedup();
        out
    }

    /// All modules reachable from `start`, excluding `start` unless it lies
    /// on a cycle.
    pub fn reachable_from(&self, start: ModuleId) -> HashSet<ModuleId> {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<ModuleId> = self.successors(start).into_iter().collect();

        while let Some(id) = queue.pop_front() {
            if visited.insert(id) {
                queue.extend(self.successors(id));
            }
        }

        visited
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &str) -> VariablePath {
        VariablePath::parse(p).unwrap()
    }

    fn chain() -> ModuleGraph {
        let mut graph = ModuleGraph::new();
        graph.add_node(GraphNode::new(ModuleId::new(0), "source"));
        graph.add_node(GraphNode::new(ModuleId::new(1), "filter"));
        graph.add_node(GraphNode::new(ModuleId::new(2), "sink"));
        graph.add_edge(Edge::new(ModuleId::new(0), ModuleId::new(1), path("/raw")));
        graph.add_edge(Edge::new(ModuleId::new(1), ModuleId::new(2), path("/filtered")));
        graph
    }

    #[test]
    fn edges_are_indexed_both_ways() {
        let graph = chain();
        assert_eq!(graph.successors(ModuleId::new(0)), vec![ModuleId::new(1)]);
        assert_eq!(graph.predecessors(ModuleId::new(2)), vec![ModuleId::new(1)]);
        assert!(graph.predecessors(ModuleId::new(0)).is_empty());
        assert_eq!(graph.name_of(ModuleId::new(1)), "filter");
    }

    #[test]
    fn reachability_follows_edges() {
        let graph = chain();
        let reach = graph.reachable_from(ModuleId::new(0));
        assert!(reach.contains(&ModuleId::new(2)));
        assert!(!reach.contains(&ModuleId::new(0)));
    }

    #[test]
    fn implicit_nodes_are_added() {
        let mut graph = ModuleGraph::new();
        graph.add_edge(Edge::new(ModuleId::new(4), ModuleId::new(4), path("/x")));
        assert_eq!(graph.len(), 1);
        assert!(graph.edges()[0].is_self_loop());
    }
}
