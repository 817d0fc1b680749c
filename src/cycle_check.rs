use std::collections::{HashMap, VecDeque};

use crate::{Dag, NodeId};

/// Reports whether the graph contains a cycle.
///
/// The scheduler never calls this; a cyclic graph simply stalls. Callers that
/// build graphs from untrusted input can check up front.
///
/// Nodes are peeled off in dependency order, starting from the initial nodes;
/// anything left over sits on or behind a cycle.
pub fn has_cycle<T: NodeId, R>(graph: &Dag<T, R>) -> bool {
    let mut waiting_on: HashMap<&T, usize> = graph
        .all_nodes()
        .map(|n| (n.id(), n.incoming().len()))
        .collect();
    let mut ready: VecDeque<&T> = graph.initial_nodes().map(|n| n.id()).collect();
    let mut peeled = 0;

    while let Some(id) = ready.pop_front() {
        peeled += 1;
        let Some(node) = graph.get(id) else {
            continue;
        };
        for next in node.outgoing() {
            if let Some(count) = waiting_on.get_mut(next) {
                *count -= 1;
                if *count == 0 {
                    ready.push_back(next);
                }
            }
        }
    }

    peeled < graph.size()
}
