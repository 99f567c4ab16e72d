use std::collections::BTreeMap;

use crate::core::{Connection, Node, NodeId};

/// Predecessors of every node, in the order their connections were drawn.
pub type DependencyMap = BTreeMap<NodeId, Vec<NodeId>>;

/// Derives the dependency map of a graph.
///
/// Port detail is stripped and repeated edges between the same pair of nodes
/// collapse into one. Connections with an endpoint that is not in `nodes` are
/// dropped. A self-loop is kept as a node depending on itself, so the
/// scheduler stalls on it like on any other cycle.
pub fn resolve(nodes: &[Node], connections: &[Connection]) -> DependencyMap {
    let mut dependencies: DependencyMap = nodes
        .iter()
        .map(|node| (node.id.clone(), Vec::new()))
        .collect();

    for connection in connections {
        if !dependencies.contains_key(&connection.from_node) {
            continue;
        }

        if let Some(inputs) = dependencies.get_mut(&connection.to_node)
            && !inputs.contains(&connection.from_node)
        {
            inputs.push(connection.from_node.clone());
        }
    }

    dependencies
}

/// Inverts a dependency map: for every node, the nodes consuming its output.
pub fn downstream(dependencies: &DependencyMap) -> BTreeMap<&str, Vec<&str>> {
    let mut downstream: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for (node, inputs) in dependencies {
        for input in inputs {
            downstream
                .entry(input.as_str())
                .or_default()
                .push(node.as_str());
        }
    }

    downstream
}
