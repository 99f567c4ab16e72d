use std::collections::BTreeSet;

use petgraph::graphmap::DiGraphMap;
use petgraph::visit::Bfs;

use crate::core::{Connection, Node, NodeId};
use crate::error::Diagnostic;
use crate::plan::deps::{self, DependencyMap};
use crate::plan::{PlanBuild, assemble, stages, validate};

/// Dirty nodes plus everything downstream of them.
///
/// Fails when `dirty` is empty or names a node that is not in the graph.
pub fn affected<I, S>(
    nodes: &[Node],
    connections: &[Connection],
    dirty: I,
) -> Result<BTreeSet<NodeId>, Diagnostic>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let dependencies = deps::resolve(nodes, connections);
    let dirty = normalize(&dependencies, dirty)?;
    Ok(reachable(&dependencies, &dirty))
}

/// Builds a plan that re-runs only the dirty nodes and their descendants.
///
/// Stages are computed over the affected subgraph alone, but every scheduled
/// node keeps its full list of inputs, so a node may still read the output of
/// an unaffected upstream node. Those outputs are not recomputed: the caller
/// runs the plan seeded with the results of the previous run (see
/// [`reusable`](crate::reusable)).
///
/// Validation only looks at the affected nodes, the connections running
/// between them and the connections from them to nodes missing from the
/// graph. Diagnostics refer to connections by their index in `connections`.
pub fn build_incremental_plan<I, S>(nodes: &[Node], connections: &[Connection], dirty: I) -> PlanBuild
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    if nodes.is_empty() {
        return PlanBuild::rejected(Diagnostic::NoNodes);
    }

    let dependencies = deps::resolve(nodes, connections);

    let dirty = match normalize(&dependencies, dirty) {
        Ok(dirty) => dirty,
        Err(diagnostic) => return PlanBuild::rejected(diagnostic),
    };

    let affected = reachable(&dependencies, &dirty);

    let affected_nodes: Vec<Node> = nodes
        .iter()
        .filter(|node| affected.contains(&node.id))
        .cloned()
        .collect();

    // A connection between an affected node and a node that does not exist
    // is kept, so the dangling end is reported as in a full build.
    let in_scope = |id: &NodeId| affected.contains(id) || !dependencies.contains_key(id);
    let affected_connections: Vec<(usize, &Connection)> = connections
        .iter()
        .enumerate()
        .filter(|(_, c)| {
            (affected.contains(&c.from_node) || affected.contains(&c.to_node))
                && in_scope(&c.from_node)
                && in_scope(&c.to_node)
        })
        .collect();

    let staging: DependencyMap = affected
        .iter()
        .map(|id| {
            let inputs = dependencies[id]
                .iter()
                .filter(|input| affected.contains(*input))
                .cloned()
                .collect();
            (id.clone(), inputs)
        })
        .collect();

    let stages = match stages::assign(&affected_nodes, &staging) {
        Ok(stages) => stages,
        Err(diagnostic) => return PlanBuild::rejected(diagnostic),
    };

    let plan = assemble(&affected_nodes, &stages, &dependencies);
    let diagnostics = validate::validate_indexed(&plan, &affected_nodes, &affected_connections);

    tracing::info!(
        "built incremental plan: {} dirty, {} of {} nodes affected",
        dirty.len(),
        affected.len(),
        nodes.len()
    );

    PlanBuild { plan, diagnostics }
}

fn normalize<I, S>(dependencies: &DependencyMap, dirty: I) -> Result<BTreeSet<NodeId>, Diagnostic>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let dirty: BTreeSet<NodeId> = dirty
        .into_iter()
        .map(|id| id.as_ref().trim().to_owned())
        .filter(|id| !id.is_empty())
        .collect();

    if dirty.is_empty() {
        return Err(Diagnostic::NoDirtyNodes);
    }

    let unknown: Vec<NodeId> = dirty
        .iter()
        .filter(|id| !dependencies.contains_key(*id))
        .cloned()
        .collect();

    if !unknown.is_empty() {
        return Err(Diagnostic::UnknownDirtyNodes(unknown));
    }

    Ok(dirty)
}

/// Breadth-first walk along the consumer edges, starting from every dirty node.
fn reachable(dependencies: &DependencyMap, dirty: &BTreeSet<NodeId>) -> BTreeSet<NodeId> {
    let mut graph = DiGraphMap::<&str, ()>::new();
    for node in dependencies.keys() {
        graph.add_node(node.as_str());
    }
    for (producer, consumers) in deps::downstream(dependencies) {
        for consumer in consumers {
            graph.add_edge(producer, consumer, ());
        }
    }

    let mut affected = BTreeSet::new();

    for start in dirty {
        if affected.contains(start) {
            continue;
        }

        let mut bfs = Bfs::new(&graph, start.as_str());
        while let Some(id) = bfs.next(&graph) {
            affected.insert(id.to_owned());
        }
    }

    affected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Endpoint;

    fn diamond() -> (Vec<Node>, Vec<Connection>) {
        let nodes = vec![
            Node::new("A", "Source").at(0.0, 0.0),
            Node::new("B", "Filter").at(200.0, 0.0),
            Node::new("C", "Filter").at(200.0, 200.0),
            Node::new("D", "Merge").at(400.0, 0.0),
        ];
        let connections = vec![
            Connection::link("A", "B"),
            Connection::link("A", "C"),
            Connection::new("B", "output", "D", "input_0"),
            Connection::new("C", "output", "D", "input_1"),
        ];
        (nodes, connections)
    }

    #[test]
    fn test_dirty_branch() {
        let (nodes, connections) = diamond();
        let build = build_incremental_plan(&nodes, &connections, ["B"]);

        assert!(build.is_valid(), "{:?}", build.messages());
        assert_eq!(build.plan.execution_order, ["B", "D"]);
        assert_eq!(build.plan.stage_of("B"), Some(0));
        assert_eq!(build.plan.stage_of("D"), Some(1));

        // inputs stay complete so cached values can be read
        let b = build.plan.nodes().find(|node| node.id == "B").unwrap();
        assert_eq!(b.inputs, ["A"]);
        let d = build.plan.nodes().find(|node| node.id == "D").unwrap();
        assert_eq!(d.inputs, ["B", "C"]);
    }

    #[test]
    fn test_dirty_source_covers_everything() {
        let (nodes, connections) = diamond();
        let build = build_incremental_plan(&nodes, &connections, vec!["A".to_string()]);

        assert!(build.is_valid());
        assert_eq!(build.plan.len(), 4);
        assert!(build.plan.stages[1].can_parallelize);
    }

    #[test]
    fn test_dirty_chain_downstream() {
        let nodes = vec![
            Node::new("n1", "T"),
            Node::new("n2", "T"),
            Node::new("n3", "T"),
            Node::new("n4", "T"),
        ];
        let connections = vec![
            Connection::link("n1", "n2"),
            Connection::link("n2", "n3"),
            Connection::link("n3", "n4"),
        ];

        let build = build_incremental_plan(&nodes, &connections, ["n2"]);
        assert_eq!(build.plan.execution_order, ["n2", "n3", "n4"]);

        let set = affected(&nodes, &connections, ["n3"]).unwrap();
        assert_eq!(set.into_iter().collect::<Vec<_>>(), ["n3", "n4"]);
    }

    #[test]
    fn test_dirty_sink_alone_warns() {
        let (nodes, connections) = diamond();
        let build = build_incremental_plan(&nodes, &connections, [" D "]);

        // all of D's connections lead outside the affected set
        assert!(build.is_valid());
        assert_eq!(build.plan.execution_order, ["D"]);
        assert_eq!(build.warnings().count(), 1);
    }

    #[test]
    fn test_dangling_connection_out_of_affected_set() {
        let nodes = vec![Node::new("A", "T"), Node::new("B", "T")];
        let connections = vec![Connection::link("A", "B"), Connection::link("B", "ghost")];

        let full = crate::plan::build_plan(&nodes, &connections);
        let build = build_incremental_plan(&nodes, &connections, ["A"]);

        assert!(!full.is_valid());
        assert!(!build.is_valid());
        assert_eq!(build.messages(), full.messages());
        assert_eq!(
            build.diagnostics,
            [Diagnostic::DanglingConnection {
                index: 1,
                end: Endpoint::To,
                node: "ghost".into(),
            }]
        );
    }

    #[test]
    fn test_dangling_connection_into_affected_set() {
        let (nodes, mut connections) = diamond();
        connections.push(Connection::new("ghost", "output", "D", "input_2"));

        let build = build_incremental_plan(&nodes, &connections, ["C"]);
        assert_eq!(
            build.diagnostics,
            [Diagnostic::DanglingConnection {
                index: 4,
                end: Endpoint::From,
                node: "ghost".into(),
            }]
        );
    }

    #[test]
    fn test_cycle_in_affected_subgraph() {
        let nodes = vec![
            Node::new("A", "T").at(0.0, 0.0),
            Node::new("B", "T").at(100.0, 0.0),
            Node::new("C", "T").at(200.0, 0.0),
        ];
        let connections = vec![
            Connection::link("A", "B"),
            Connection::new("C", "output", "B", "input_1"),
            Connection::link("B", "C"),
        ];

        let build = build_incremental_plan(&nodes, &connections, ["B"]);

        assert!(!build.is_valid());
        assert!(build.plan.is_empty());
        assert_eq!(
            build.diagnostics,
            [Diagnostic::Cycle {
                stuck: vec!["B".into(), "C".into()],
                cycles: vec![vec!["B".into(), "C".into()]],
            }]
        );
    }

    #[test]
    fn test_unknown_dirty_node() {
        let (nodes, connections) = diamond();
        let build = build_incremental_plan(&nodes, &connections, ["B", "ghost"]);

        assert!(!build.is_valid());
        assert!(build.plan.is_empty());
        assert_eq!(
            build.diagnostics,
            [Diagnostic::UnknownDirtyNodes(vec!["ghost".into()])]
        );
    }

    #[test]
    fn test_empty_dirty_set() {
        let (nodes, connections) = diamond();

        let build = build_incremental_plan(&nodes, &connections, Vec::<String>::new());
        assert_eq!(build.diagnostics, [Diagnostic::NoDirtyNodes]);

        let build = build_incremental_plan(&nodes, &connections, ["", "  "]);
        assert_eq!(build.diagnostics, [Diagnostic::NoDirtyNodes]);
    }

    #[test]
    fn test_no_nodes() {
        let build = build_incremental_plan(&[], &[], ["A"]);
        assert_eq!(build.diagnostics, [Diagnostic::NoNodes]);
        assert!(!build.is_valid());
    }
}
