// Execution-order computation over the connection graph
//
// Memory connections invert the scheduling edge: the memory provider has to
// run before the node that consumes it, even though the data-flow arrow in
// the definition points the other way.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::warn;

use crate::workflow::{ConnectionType, ConnectionsMap, Node};

/// Compute a deterministic execution order for `nodes`.
///
/// Kahn-style topological sort over the dependency graph built from
/// `connections`, with `memory` edges inverted. Ready nodes are consumed in
/// lexicographic id order, so the result depends only on the graph, not on
/// the order nodes appear in the definition. If the graph has a cycle after
/// the memory inversion, the definition order is returned instead.
pub fn execution_order(nodes: &[Node], connections: &ConnectionsMap) -> Vec<String> {
    let definition_order: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
    let id_set: HashSet<&str> = definition_order.iter().map(String::as_str).collect();

    let mut dependencies: BTreeMap<&str, BTreeSet<&str>> = definition_order
        .iter()
        .map(|id| (id.as_str(), BTreeSet::new()))
        .collect();

    for (source, by_type) in connections {
        if !id_set.contains(source.as_str()) {
            continue;
        }
        for (conn_type, targets) in by_type {
            for conn in targets {
                if !id_set.contains(conn.node.as_str()) {
                    continue;
                }
                if *conn_type == ConnectionType::Memory {
                    // Consumer (source) waits for the memory provider (target)
                    dependencies
                        .get_mut(source.as_str())
                        .expect("source present")
                        .insert(conn.node.as_str());
                } else {
                    dependencies
                        .get_mut(conn.node.as_str())
                        .expect("target present")
                        .insert(source.as_str());
                }
            }
        }
    }

    let mut order = Vec::with_capacity(definition_order.len());
    let mut remaining: BTreeSet<&str> = definition_order.iter().map(String::as_str).collect();

    while !remaining.is_empty() {
        // BTreeSet iteration gives the lexicographic tie-break
        let ready: Vec<&str> = remaining
            .iter()
            .filter(|id| dependencies[*id].is_empty())
            .copied()
            .collect();

        if ready.is_empty() {
            warn!("cycle detected in connection graph, falling back to definition order");
            return definition_order;
        }

        for id in ready {
            order.push(id.to_string());
            remaining.remove(id);
            for deps in dependencies.values_mut() {
                deps.remove(id);
            }
        }
    }

    order
}

/// Data-flow predecessors of `node_id` as `(provider_node_id, type)` pairs.
///
/// Follows the same inversion as the scheduler: for a `memory` connection
/// `consumer --memory--> provider`, the provider's output feeds the
/// consumer's input, so the pair shows up in the *consumer's* incoming list.
pub fn incoming_connections<'a>(
    node_id: &str,
    connections: &'a ConnectionsMap,
) -> Vec<(&'a str, ConnectionType)> {
    let mut incoming = Vec::new();
    for (source, by_type) in connections {
        for (conn_type, targets) in by_type {
            if *conn_type == ConnectionType::Memory {
                if source == node_id {
                    for conn in targets {
                        incoming.push((conn.node.as_str(), *conn_type));
                    }
                }
            } else if targets.iter().any(|c| c.node == node_id) {
                incoming.push((source.as_str(), *conn_type));
            }
        }
    }
    incoming
}

/// Whether `node_id` has any data-flow predecessor
pub fn has_incoming(node_id: &str, connections: &ConnectionsMap) -> bool {
    !incoming_connections(node_id, connections).is_empty()
}
