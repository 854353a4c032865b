//! Circular dependency network detection.
//!
//! A scan walks the module graph depth-first. Modules on the active
//! traversal are stamped with the current scan generation, so reaching a
//! module carrying the current stamp closes a cycle. Low-link bookkeeping
//! collects every module lying on some cycle through the active path into
//! one network.

use super::module_graph::ModuleGraph;
use crate::types::{ModuleId, NetworkId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Immutable assignment of modules to circular dependency networks.
///
/// Built once before any worker starts and shared read-only afterwards.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NetworkTable {
    membership: BTreeMap<ModuleId, NetworkId>,
    networks: BTreeMap<NetworkId, Vec<ModuleId>>,
}

impl NetworkTable {
    /// The network a module belongs to, if any.
    pub fn network_of(&self, module: ModuleId) -> Option<NetworkId> {
        self.membership.get(&module).copied()
    }

    /// Members of a network, in ascending order.
    pub fn members(&self, network: NetworkId) -> &[ModuleId] {
        self.networks
            .get(&network)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Iterate over all networks.
    pub fn networks(&self) -> impl Iterator<Item = (NetworkId, &[ModuleId])> {
        self.networks.iter().map(|(id, m)| (*id, m.as_slice()))
    }

    /// Number of networks.
    pub fn len(&self) -> usize {
        self.networks.len()
    }

    /// Whether no cycle was found.
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    /// Whether the edge `from -> to` stays inside one network.
    pub fn is_circular_edge(&self, from: ModuleId, to: ModuleId) -> bool {
        match (self.network_of(from), self.network_of(to)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

/// Per-module traversal bookkeeping.
#[derive(Debug, Clone, Copy)]
struct Visit {
    index: usize,
    low_link: usize,
    /// Scan generation while the module is on the active traversal, 0 after.
    stamp: u64,
}

/// Finds circular dependency networks in a [`ModuleGraph`].
pub struct CircularDependencyDetector<'g> {
    graph: &'g ModuleGraph,
    scan_generation: u64,
    next_index: usize,
    visits: HashMap<ModuleId, Visit>,
    active: Vec<ModuleId>,
    assigned: HashMap<ModuleId, NetworkId>,
    networks: BTreeMap<NetworkId, BTreeSet<ModuleId>>,
    next_network: u32,
}

impl<'g> CircularDependencyDetector<'g> {
    /// Create a detector over a graph.
    pub fn new(graph: &'g ModuleGraph) -> Self {
        Self {
            graph,
            scan_generation: 0,
            next_index: 0,
            visits: HashMap::new(),
            active: Vec::new(),
            assigned: HashMap::new(),
            networks: BTreeMap::new(),
            next_network: 1,
        }
    }

    /// Scan every module and return the resulting table.
    pub fn detect(mut self) -> NetworkTable {
        let ids: Vec<ModuleId> = self.graph.node_ids().collect();
        for id in ids {
            if !self.visits.contains_key(&id) {
                self.scan_generation += 1;
                self.scan(id);
            }
        }

        let mut table = NetworkTable::default();
        for (network, members) in self.networks {
            for &module in &members {
                table.membership.insert(module, network);
            }
            table.networks.insert(network, members.into_iter().collect());
        }

        for (network, members) in table.networks() {
            tracing::debug!(
                network = %network,
                modules = ?members
                    .iter()
                    .map(|m| self.graph.name_of(*m))
                    .collect::<Vec<_>>(),
                "Circular dependency network detected"
            );
        }
        table
    }

    fn scan(&mut self, module: ModuleId) {
        let index = self.next_index;
        self.next_index += 1;
        self.visits.insert(
            module,
            Visit {
                index,
                low_link: index,
                stamp: self.scan_generation,
            },
        );
        self.active.push(module);

        let mut self_loop = false;
        for next in self.graph.successors(module) {
            if next == module {
                self_loop = true;
                continue;
            }
            match self.visits.get(&next).copied() {
                None => {
                    self.scan(next);
                    let reached = self.visits[&next].low_link;
                    self.lower(module, reached);
                }
                Some(visit) if visit.stamp == self.scan_generation => {
                    // Back to a module on the active traversal: a cycle.
                    self.lower(module, visit.index);
                }
                Some(_) => {}
            }
        }

        let visit = self.visits[&module];
        if visit.low_link != visit.index {
            return;
        }

        let mut component = Vec::new();
        while let Some(member) = self.active.pop() {
            if let Some(v) = self.visits.get_mut(&member) {
                v.stamp = 0;
            }
            component.push(member);
            if member == module {
                break;
            }
        }

        if component.len() > 1 || self_loop {
            self.assign(component);
        }
    }

    fn lower(&mut self, module: ModuleId, candidate: usize) {
        if let Some(v) = self.visits.get_mut(&module) {
            v.low_link = v.low_link.min(candidate);
        }
    }

    /// Put all modules of a cycle into one network. If any of them already
    /// has a network, the others join it; ids never change once assigned.
    fn assign(&mut self, component: Vec<ModuleId>) {
        let existing: BTreeSet<NetworkId> = component
            .iter()
            .filter_map(|m| self.assigned.get(m).copied())
            .collect();

        let target = match existing.iter().next() {
            Some(&first) => first,
            None => {
                let id = NetworkId::new(self.next_network);
                self.next_network += 1;
                id
            }
        };

        // Fold any other pre-existing network into the target.
        for other in existing.iter().skip(1) {
            if let Some(members) = self.networks.remove(other) {
                for m in &members {
                    self.assigned.insert(*m, target);
                }
                self.networks.entry(target).or_default().extend(members);
            }
        }

        let entry = self.networks.entry(target).or_default();
        for module in component {
            self.assigned.entry(module).or_insert(target);
            entry.insert(module);
        }
    }
}

/// Convenience wrapper: detect all circular networks of a graph.
pub fn detect_circular_networks(graph: &ModuleGraph) -> NetworkTable {
    CircularDependencyDetector::new(graph).detect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::module_graph::{Edge, GraphNode};
    use crate::types::VariablePath;

    fn m(id: u32) -> ModuleId {
        ModuleId::new(id)
    }

    fn graph(modules: u32, edges: &[(u32, u32)]) -> ModuleGraph {
        let mut graph = ModuleGraph::new();
        for id in 0..modules {
            graph.add_node(GraphNode::new(m(id), format!("m{}", id)));
        }
        for (i, (from, to)) in edges.iter().enumerate() {
            let path = VariablePath::parse(&format!("/v{}", i)).unwrap();
            graph.add_edge(Edge::new(m(*from), m(*to), path));
        }
        graph
    }

    #[test]
    fn acyclic_graph_has_no_networks() {
        let table = detect_circular_networks(&graph(3, &[(0, 1), (1, 2), (0, 2)]));
        assert!(table.is_empty());
        assert_eq!(table.network_of(m(1)), None);
    }

    #[test]
    fn simple_cycle_forms_one_network() {
        let table = detect_circular_networks(&graph(3, &[(0, 1), (1, 0), (1, 2)]));
        assert_eq!(table.len(), 1);
        let net = table.network_of(m(0)).unwrap();
        assert_eq!(table.members(net), &[m(0), m(1)]);
        assert_eq!(table.network_of(m(2)), None);
        assert!(table.is_circular_edge(m(0), m(1)));
        assert!(!table.is_circular_edge(m(1), m(2)));
    }

    #[test]
    fn self_loop_is_circular() {
        let table = detect_circular_networks(&graph(2, &[(0, 0), (0, 1)]));
        assert_eq!(table.len(), 1);
        assert!(table.network_of(m(0)).is_some());
        assert!(table.network_of(m(1)).is_none());
    }

    #[test]
    fn overlapping_cycles_merge() {
        // A->B->C->D->A, B->E->A, C->F->D and a disjoint G<->H.
        let (a, b, c, d, e, f, g, h) = (0, 1, 2, 3, 4, 5, 6, 7);
        let edges = [
            (a, b),
            (b, c),
            (c, d),
            (d, a),
            (b, e),
            (e, a),
            (c, f),
            (f, d),
            (g, h),
            (h, g),
        ];
        let table = detect_circular_networks(&graph(8, &edges));
        assert_eq!(table.len(), 2);

        let mut sizes: Vec<usize> = table.networks().map(|(_, m)| m.len()).collect();
        sizes.sort();
        assert_eq!(sizes, vec![2, 6]);

        let big = table.network_of(m(a)).unwrap();
        for id in [b, c, d, e, f] {
            assert_eq!(table.network_of(m(id)), Some(big));
        }
        assert_ne!(table.network_of(m(g)), Some(big));
    }

    #[test]
    fn tail_into_cycle_is_not_circular() {
        let table = detect_circular_networks(&graph(4, &[(0, 1), (1, 2), (2, 1), (2, 3)]));
        assert_eq!(table.len(), 1);
        assert!(table.network_of(m(0)).is_none());
        assert!(table.network_of(m(3)).is_none());
    }

    #[test]
    fn detection_is_deterministic() {
        let edges = [(0, 1), (1, 0), (2, 3), (3, 2)];
        let first = detect_circular_networks(&graph(4, &edges));
        let second = detect_circular_networks(&graph(4, &edges));
        assert_eq!(first.network_of(m(0)), second.network_of(m(0)));
        assert_eq!(first.network_of(m(3)), second.network_of(m(3)));
        assert_eq!(first.network_of(m(0)), Some(NetworkId::new(1)));
    }
}
