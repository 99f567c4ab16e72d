use std::collections::{BTreeSet, HashSet};

use crate::core::{Connection, Node};
use crate::error::{Diagnostic, Endpoint};
use crate::plan::ExecutionPlan;

/// Checks a built plan against the graph it was built from.
///
/// Returns every problem found, errors and warnings mixed, in a stable order:
/// plan completeness first, then the source stage, then the connections one
/// by one, and the disconnected-node warning last.
pub fn validate(plan: &ExecutionPlan, nodes: &[Node], connections: &[Connection]) -> Vec<Diagnostic> {
    let indexed: Vec<(usize, &Connection)> = connections.iter().enumerate().collect();
    validate_indexed(plan, nodes, &indexed)
}

/// Same as [`validate`], for a subset of a graph's connections. Each
/// connection carries its index in the full list, which is what diagnostics
/// report.
pub(crate) fn validate_indexed(
    plan: &ExecutionPlan,
    nodes: &[Node],
    connections: &[(usize, &Connection)],
) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let graph_ids: BTreeSet<&str> = nodes.iter().map(|node| node.id.as_str()).collect();
    let plan_ids: BTreeSet<&str> = plan.execution_order.iter().map(String::as_str).collect();

    let missing: Vec<_> = graph_ids.difference(&plan_ids).map(|id| id.to_string()).collect();
    if !missing.is_empty() {
        diagnostics.push(Diagnostic::MissingFromPlan(missing));
    }

    let unknown: Vec<_> = plan_ids.difference(&graph_ids).map(|id| id.to_string()).collect();
    if !unknown.is_empty() {
        diagnostics.push(Diagnostic::UnknownInPlan(unknown));
    }

    let mut seen = HashSet::new();
    let duplicates: BTreeSet<&str> = plan
        .execution_order
        .iter()
        .map(String::as_str)
        .filter(|id| !seen.insert(*id))
        .collect();
    if !duplicates.is_empty() {
        diagnostics.push(Diagnostic::DuplicateInPlan(
            duplicates.into_iter().map(str::to_owned).collect(),
        ));
    }

    if !nodes.is_empty() {
        match plan.stages.first() {
            None => diagnostics.push(Diagnostic::NoStages),
            Some(stage) if stage.number == 0 && stage.nodes.is_empty() => {
                diagnostics.push(Diagnostic::EmptySourceStage)
            }
            Some(_) => {}
        }
    }

    for &(index, connection) in connections {
        if !graph_ids.contains(connection.from_node.as_str()) {
            diagnostics.push(Diagnostic::DanglingConnection {
                index,
                end: Endpoint::From,
                node: connection.from_node.clone(),
            });
        }

        if !graph_ids.contains(connection.to_node.as_str()) {
            diagnostics.push(Diagnostic::DanglingConnection {
                index,
                end: Endpoint::To,
                node: connection.to_node.clone(),
            });
        }

        if connection.from_node == connection.to_node {
            diagnostics.push(Diagnostic::SelfLoop {
                index,
                node: connection.from_node.clone(),
            });
        }
    }

    let touched: HashSet<&str> = connections
        .iter()
        .flat_map(|(_, c)| [c.from_node.as_str(), c.to_node.as_str()])
        .collect();

    let disconnected: Vec<String> = nodes
        .iter()
        .filter(|node| !touched.contains(node.id.as_str()))
        .map(|node| format!("{} ({})", node.kind, node.id))
        .collect();
    if !disconnected.is_empty() {
        tracing::warn!("disconnected nodes: {}", disconnected.join(", "));
        diagnostics.push(Diagnostic::Disconnected(disconnected));
    }

    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{PlanNode, Stage, build_plan};

    fn chain() -> (Vec<Node>, Vec<Connection>) {
        let nodes = vec![
            Node::new("n1", "Image Import").at(0.0, 0.0),
            Node::new("n2", "Blur").at(200.0, 0.0),
            Node::new("n3", "Output").at(400.0, 0.0),
        ];
        let connections = vec![Connection::link("n1", "n2"), Connection::link("n2", "n3")];
        (nodes, connections)
    }

    fn plan_with(order: &[&str], stages: Vec<Stage>) -> ExecutionPlan {
        ExecutionPlan {
            max_stage: stages.last().map(|stage| stage.number),
            stages,
            execution_order: order.iter().map(|id| id.to_string()).collect(),
        }
    }

    #[test]
    fn test_valid_plan() {
        let (nodes, connections) = chain();
        let plan = build_plan(&nodes, &connections).plan;

        assert!(validate(&plan, &nodes, &connections).is_empty());
    }

    #[test]
    fn test_missing_node() {
        let (nodes, connections) = chain();
        let mut plan = build_plan(&nodes, &connections).plan;
        plan.execution_order.retain(|id| id != "n2");

        let diagnostics = validate(&plan, &nodes, &connections);
        assert_eq!(diagnostics, [Diagnostic::MissingFromPlan(vec!["n2".into()])]);
    }

    #[test]
    fn test_unknown_and_duplicate_nodes() {
        let (nodes, connections) = chain();
        let mut plan = build_plan(&nodes, &connections).plan;
        plan.execution_order.push("n1".into());
        plan.execution_order.push("ghost".into());

        let diagnostics = validate(&plan, &nodes, &connections);
        assert_eq!(
            diagnostics,
            [
                Diagnostic::UnknownInPlan(vec!["ghost".into()]),
                Diagnostic::DuplicateInPlan(vec!["n1".into()]),
            ]
        );
    }

    #[test]
    fn test_dangling_connection_reported_per_endpoint() {
        let (nodes, mut connections) = chain();
        connections.push(Connection::link("n3", "missing"));
        connections.push(Connection::link("nowhere", "n1"));
        let plan = build_plan(&nodes, &connections).plan;

        let diagnostics = validate(&plan, &nodes, &connections);
        assert_eq!(
            diagnostics,
            [
                Diagnostic::DanglingConnection {
                    index: 2,
                    end: Endpoint::To,
                    node: "missing".into(),
                },
                Diagnostic::DanglingConnection {
                    index: 3,
                    end: Endpoint::From,
                    node: "nowhere".into(),
                },
            ]
        );
        assert_eq!(
            diagnostics[0].to_string(),
            "Connection 2: to_node 'missing' does not exist"
        );
    }

    #[test]
    fn test_empty_source_stage_is_flagged_distinctly() {
        let (nodes, connections) = chain();
        let node = |node: &Node, inputs: &[&str]| PlanNode {
            node: node.clone(),
            inputs: inputs.iter().map(|id| id.to_string()).collect(),
        };

        let plan = plan_with(
            &["n1", "n2", "n3"],
            vec![
                Stage {
                    number: 0,
                    nodes: vec![],
                    can_parallelize: false,
                },
                Stage {
                    number: 1,
                    nodes: vec![node(&nodes[0], &[]), node(&nodes[1], &["n1"])],
                    can_parallelize: true,
                },
                Stage {
                    number: 2,
                    nodes: vec![node(&nodes[2], &["n2"])],
                    can_parallelize: false,
                },
            ],
        );

        let diagnostics = validate(&plan, &nodes, &connections);
        assert_eq!(diagnostics, [Diagnostic::EmptySourceStage]);
        assert!(diagnostics[0].is_internal());
    }

    #[test]
    fn test_no_stages() {
        let (nodes, connections) = chain();
        let plan = plan_with(&["n1", "n2", "n3"], vec![]);

        let diagnostics = validate(&plan, &nodes, &connections);
        assert_eq!(diagnostics, [Diagnostic::NoStages]);
    }

    #[test]
    fn test_self_loop_in_handmade_plan() {
        let (nodes, mut connections) = chain();
        connections.push(Connection::link("n3", "n3"));
        let plan = build_plan(&nodes, &connections[..2]).plan;

        let diagnostics = validate(&plan, &nodes, &connections);
        assert_eq!(
            diagnostics,
            [Diagnostic::SelfLoop {
                index: 2,
                node: "n3".into()
            }]
        );
    }

    #[test]
    fn test_subset_keeps_original_indices() {
        let (nodes, connections) = chain();
        let ghost = Connection::link("n3", "ghost");
        let plan = build_plan(&nodes, &connections).plan;

        let diagnostics =
            validate_indexed(&plan, &nodes, &[(0, &connections[0]), (1, &connections[1]), (7, &ghost)]);
        assert_eq!(
            diagnostics,
            [Diagnostic::DanglingConnection {
                index: 7,
                end: Endpoint::To,
                node: "ghost".into(),
            }]
        );
    }

    #[test]
    fn test_disconnected_warning_names_type_and_id() {
        let (mut nodes, connections) = chain();
        nodes.push(Node::new("lonely", "Color Shift").at(0.0, 400.0));
        let plan = build_plan(&nodes, &connections).plan;

        let diagnostics = validate(&plan, &nodes, &connections);
        assert_eq!(
            diagnostics,
            [Diagnostic::Disconnected(vec!["Color Shift (lonely)".into()])]
        );
        assert!(diagnostics.iter().all(Diagnostic::is_warning));
    }
}
