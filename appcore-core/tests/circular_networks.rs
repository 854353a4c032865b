//! Integration tests for circular network detection and the validity rules
//! inside circular networks.

use appcore_core::prelude::*;
use std::sync::Arc;

fn path(i: usize) -> VariablePath {
    VariablePath::parse(&format!("/signals/v{}", i)).unwrap()
}

fn build(names: &[&str], edges: &[(usize, usize)]) -> ModuleGraph {
    let mut graph = ModuleGraph::new();
    for (i, name) in names.iter().enumerate() {
        graph.add_node(GraphNode::new(ModuleId::new(i as u32), *name));
    }
    for (i, (from, to)) in edges.iter().enumerate() {
        graph.add_edge(Edge::new(
            ModuleId::new(*from as u32),
            ModuleId::new(*to as u32),
            path(i),
        ));
    }
    graph
}

#[test]
fn six_module_cycle_and_disjoint_pair() {
    let names = ["A", "B", "C", "D", "E", "F", "G", "H", "I"];
    // A->B->C->D->A, B->E->A, C->F->D, G<->H, I only consumes.
    let edges = [
        (0, 1),
        (1, 2),
        (2, 3),
        (3, 0),
        (1, 4),
        (4, 0),
        (2, 5),
        (5, 3),
        (6, 7),
        (7, 6),
        (3, 8),
    ];
    let graph = build(&names, &edges);
    let table = detect_circular_networks(&graph);

    assert_eq!(table.len(), 2);
    let big = table.network_of(ModuleId::new(0)).unwrap();
    let small = table.network_of(ModuleId::new(6)).unwrap();
    assert_ne!(big, small);
    assert_eq!(table.members(big).len(), 6);
    assert_eq!(table.members(small).len(), 2);
    assert_eq!(table.network_of(ModuleId::new(8)), None);
}

#[test]
fn network_validity_recovers_when_external_input_recovers() {
    // Two modules feeding each other, A also has an external input.
    let graph = build(&["A", "B"], &[(0, 1), (1, 0)]);
    let table = detect_circular_networks(&graph);
    let net_id = table.network_of(ModuleId::new(0)).unwrap();
    let network = Arc::new(NetworkInvalidity::new(net_id));

    let a = ModuleValidity::in_network(ModuleId::new(0), Arc::clone(&network));
    let b = ModuleValidity::in_network(ModuleId::new(1), Arc::clone(&network));

    let mut a_external = ReadValidity::new(false);
    let mut a_from_b = ReadValidity::new(table.is_circular_edge(ModuleId::new(1), ModuleId::new(0)));
    let mut b_from_a = ReadValidity::new(table.is_circular_edge(ModuleId::new(0), ModuleId::new(1)));
    let mut a_out = WriteValidity::new();
    let mut b_out = WriteValidity::new();

    // Fault enters through A's external input and travels around the loop.
    a_external.on_post_read(&a, DataValidity::Faulty);
    let v = a_out.on_pre_write(Some(&a));
    b_from_a.on_post_read(&b, v);
    let v = b_out.on_pre_write(Some(&b));
    a_from_b.on_post_read(&a, v);
    assert_eq!(a.validity(), DataValidity::Faulty);
    assert_eq!(b.validity(), DataValidity::Faulty);

    // External input recovers: the loop must not keep itself faulty.
    a_external.on_post_read(&a, DataValidity::Ok);
    assert_eq!(a_out.on_pre_write(Some(&a)), DataValidity::Ok);
    let v = a_out.on_pre_write(Some(&a));
    b_from_a.on_post_read(&b, v);
    let v = b_out.on_pre_write(Some(&b));
    a_from_b.on_post_read(&a, v);

    assert_eq!(a.counter().get(), 0);
    assert_eq!(b.counter().get(), 0);
    assert_eq!(network.counter().get(), 0);
}

#[test]
fn counters_balance_over_closed_read_sequence() {
    let owner = ModuleValidity::new(ModuleId::new(0));
    let mut inputs: Vec<ReadValidity> = (0..3).map(|_| ReadValidity::new(false)).collect();
    let sequence = [
        (0, DataValidity::Faulty),
        (1, DataValidity::Faulty),
        (0, DataValidity::Faulty),
        (2, DataValidity::Ok),
        (1, DataValidity::Ok),
        (2, DataValidity::Faulty),
        (0, DataValidity::Ok),
        (2, DataValidity::Ok),
    ];
    for (idx, validity) in sequence {
        inputs[idx].on_post_read(&owner, validity);
    }
    assert_eq!(owner.counter().get(), 0);
    assert_eq!(owner.validity(), DataValidity::Ok);
}
