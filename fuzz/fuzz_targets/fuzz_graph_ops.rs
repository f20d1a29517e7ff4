#![no_main]

//! Drives arbitrary graph operation sequences and checks the structural
//! invariants after every step: single parents, consistent child lists,
//! terminating parent chains, and terminal unlinked state.

use arbitrary::Arbitrary;
use arbor_core::{Graph, NodeId, NodeState, Value};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
enum Op {
    Create,
    Attach { parent: u8, child: u8 },
    Detach { parent: u8, child: u8 },
    Unlink { node: u8 },
    Release { node: u8 },
    Define { node: u8, value: i8 },
    Set { node: u8, value: i8 },
    Observe { node: u8 },
    Emit { node: u8 },
}

fn pick(nodes: &[NodeId], raw: u8) -> Option<NodeId> {
    if nodes.is_empty() {
        None
    } else {
        Some(nodes[raw as usize % nodes.len()])
    }
}

fn check_invariants(g: &Graph, nodes: &[NodeId]) {
    for &n in nodes {
        match g.state(n) {
            Some(NodeState::Attached(p)) => {
                let count = g.children(p).iter().filter(|c| **c == n).count();
                assert_eq!(count, 1, "attached child listed exactly once");
                let mut cursor = Some(n);
                let mut steps = 0usize;
                while let Some(c) = cursor {
                    steps += 1;
                    assert!(steps <= nodes.len() + 1, "cycle in parent chain");
                    cursor = g.parent(c);
                }
            }
            Some(NodeState::Unlinked) => {
                assert!(g.children(n).is_empty(), "unlinked node keeps no children");
                assert_eq!(g.parent(n), None, "unlinked node keeps no parent");
            }
            Some(NodeState::Detached) | None => {}
        }
    }
    for &p in nodes {
        for c in g.children(p) {
            assert_eq!(g.parent(c), Some(p), "child list and state agree");
        }
    }
}

fuzz_target!(|ops: Vec<Op>| {
    let mut g = Graph::new();
    let mut nodes: Vec<NodeId> = Vec::new();

    for op in &ops {
        if nodes.len() > 64 {
            break;
        }
        match *op {
            Op::Create => nodes.push(g.create()),
            Op::Attach { parent, child } => {
                if let (Some(p), Some(c)) = (pick(&nodes, parent), pick(&nodes, child)) {
                    let _ = g.attach(p, c);
                }
            }
            Op::Detach { parent, child } => {
                if let (Some(p), Some(c)) = (pick(&nodes, parent), pick(&nodes, child)) {
                    let _ = g.detach(p, c);
                }
            }
            Op::Unlink { node } => {
                if let Some(n) = pick(&nodes, node) {
                    let _ = g.unlink(n);
                }
            }
            Op::Release { node } => {
                if let Some(n) = pick(&nodes, node) {
                    let _ = g.release(n);
                }
            }
            Op::Define { node, value } => {
                if let Some(n) = pick(&nodes, node) {
                    let _ = g.define(n, "x", Value::Int(value as i64));
                }
            }
            Op::Set { node, value } => {
                if let Some(n) = pick(&nodes, node) {
                    let _ = g.set(n, "x", Value::Int(value as i64));
                }
            }
            Op::Observe { node } => {
                if let Some(n) = pick(&nodes, node) {
                    let _ = g.observe_path(n, "x", |_, _| Ok(()));
                }
            }
            Op::Emit { node } => {
                if let Some(n) = pick(&nodes, node) {
                    let _ = g.emit(n, "ping", Value::Null);
                }
            }
        }
        check_invariants(&g, &nodes);
    }
});
