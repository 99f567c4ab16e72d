//! Turning a node graph into a staged execution plan.
//!
//! A plan build runs in four steps:
//!
//! 1. [`deps::resolve`] strips ports from the connections and derives the
//!    predecessors of every node.
//! 2. [`stages::assign`] levels the graph: sources are stage 0, everything
//!    else sits one stage after its latest predecessor.
//! 3. [`assemble`] buckets nodes by stage, orders each bucket by canvas
//!    position and flattens the buckets into the execution order.
//! 4. [`validate::validate`] checks the result against the input graph.
//!
//! Nodes that share a stage can never depend on each other, since a
//! dependency would have pushed the consumer into a later stage. That is the
//! only evidence [`Stage::can_parallelize`] relies on, which is why stages
//! are always derived here and never accepted from the outside.

pub mod deps;
pub mod incremental;
pub mod stages;
pub mod validate;

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::core::{Connection, Node, NodeId};
use crate::error::Diagnostic;
use crate::plan::deps::DependencyMap;
use crate::plan::stages::StageMap;

/// A node scheduled in a plan, together with the ids of the nodes whose
/// outputs it consumes, in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    #[serde(flatten)]
    pub node: Node,
    pub inputs: Vec<NodeId>,
}

impl Deref for PlanNode {
    type Target = Node;

    fn deref(&self) -> &Self::Target {
        &self.node
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub number: usize,
    pub nodes: Vec<PlanNode>,
    /// Set when the stage holds two or more nodes, which are independent by
    /// construction.
    pub can_parallelize: bool,
}

/// The ordered, staged representation of a graph, ready to run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub stages: Vec<Stage>,
    /// Highest stage number, `None` for an empty plan.
    pub max_stage: Option<usize>,
    pub execution_order: Vec<NodeId>,
}

impl ExecutionPlan {
    /// A plan with no stages.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.execution_order.is_empty()
    }

    /// Number of scheduled nodes.
    pub fn len(&self) -> usize {
        self.execution_order.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.execution_order.iter().any(|node| node == id)
    }

    /// Position of a node in the execution order.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.execution_order.iter().position(|node| node == id)
    }

    /// Stage a node was scheduled in.
    pub fn stage_of(&self, id: &str) -> Option<usize> {
        self.stages
            .iter()
            .find(|stage| stage.nodes.iter().any(|node| node.id == id))
            .map(|stage| stage.number)
    }

    /// All scheduled nodes, stage by stage.
    pub fn nodes(&self) -> impl Iterator<Item = &PlanNode> {
        self.stages.iter().flat_map(|stage| stage.nodes.iter())
    }

    /// Human-readable, multi-line description of the plan.
    pub fn summary(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.max_stage.map_or(0, |max| max + 1);

        writeln!(f, "Plan Summary:")?;
        writeln!(f, "  Total Stages: {total}")?;
        writeln!(f, "  Total Nodes: {}", self.execution_order.len())?;
        writeln!(f)?;

        for stage in &self.stages {
            let marker = if stage.can_parallelize { " [PARALLEL]" } else { "" };
            let plural = if stage.nodes.len() == 1 { "" } else { "s" };
            writeln!(
                f,
                "Stage {}{marker}: ({} node{plural})",
                stage.number,
                stage.nodes.len()
            )?;

            for node in &stage.nodes {
                if node.inputs.is_empty() {
                    writeln!(f, "  - {} ({}) (source)", node.kind, node.id)?;
                } else {
                    writeln!(
                        f,
                        "  - {} ({}) <- [{}]",
                        node.kind,
                        node.id,
                        node.inputs.join(", ")
                    )?;
                }
            }

            writeln!(f)?;
        }

        write!(f, "Execution Order: {}", self.execution_order.join(" -> "))
    }
}

/// Outcome of a plan build: the plan plus everything found wrong with it.
#[derive(Debug, Clone, Default)]
pub struct PlanBuild {
    pub plan: ExecutionPlan,
    pub diagnostics: Vec<Diagnostic>,
}

impl PlanBuild {
    /// An empty plan rejected for the given reason.
    pub(crate) fn rejected(diagnostic: Diagnostic) -> Self {
        tracing::warn!("plan rejected: {diagnostic}");

        Self {
            plan: ExecutionPlan::empty(),
            diagnostics: vec![diagnostic],
        }
    }

    /// True when no diagnostic is an error. Warnings do not count.
    pub fn is_valid(&self) -> bool {
        !self.diagnostics.iter().any(|d| !d.is_warning())
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| !d.is_warning())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_warning())
    }

    /// The diagnostics as human-readable lines, in the order they were found.
    pub fn messages(&self) -> Vec<String> {
        self.diagnostics.iter().map(ToString::to_string).collect()
    }

    /// The plan if it is valid, otherwise every diagnostic.
    pub fn into_result(self) -> Result<ExecutionPlan, Vec<Diagnostic>> {
        if self.is_valid() {
            Ok(self.plan)
        } else {
            Err(self.diagnostics)
        }
    }
}

/// Groups `nodes` into stages and derives the execution order.
///
/// Nodes without an entry in `stages` are left out. Each scheduled node is
/// annotated with its predecessors from `dependencies`.
pub fn assemble(nodes: &[Node], stages: &StageMap, dependencies: &DependencyMap) -> ExecutionPlan {
    let Some(max_stage) = stages.values().copied().max() else {
        return ExecutionPlan::empty();
    };

    let mut buckets: BTreeMap<usize, Vec<PlanNode>> =
        (0..=max_stage).map(|number| (number, Vec::new())).collect();

    for node in nodes {
        let Some(stage) = stages.get(&node.id) else {
            continue;
        };

        if let Some(bucket) = buckets.get_mut(stage) {
            bucket.push(PlanNode {
                node: node.clone(),
                inputs: dependencies.get(&node.id).cloned().unwrap_or_default(),
            });
        }
    }

    let stages: Vec<Stage> = buckets
        .into_iter()
        .map(|(number, mut nodes)| {
            nodes.sort_by(|a, b| a.cmp_position(b));
            Stage {
                number,
                can_parallelize: nodes.len() >= 2,
                nodes,
            }
        })
        .collect();

    let execution_order = stages
        .iter()
        .flat_map(|stage| stage.nodes.iter().map(|node| node.id.clone()))
        .collect();

    ExecutionPlan {
        stages,
        max_stage: Some(max_stage),
        execution_order,
    }
}

/// Builds and validates the execution plan of a whole graph.
///
/// Never fails: structural problems such as cycles or dangling connections
/// come back as diagnostics, and an invalid build should not be executed.
pub fn build_plan(nodes: &[Node], connections: &[Connection]) -> PlanBuild {
    let dependencies = deps::resolve(nodes, connections);

    let stages = match stages::assign(nodes, &dependencies) {
        Ok(stages) => stages,
        Err(diagnostic) => return PlanBuild::rejected(diagnostic),
    };

    let plan = assemble(nodes, &stages, &dependencies);
    let diagnostics = validate::validate(&plan, nodes, connections);

    let build = PlanBuild { plan, diagnostics };

    if build.is_valid() {
        tracing::info!(
            "built plan with {} nodes in {} stages",
            build.plan.len(),
            build.plan.stages.len()
        );
    } else {
        tracing::warn!("built invalid plan: {}", build.messages().join("; "));
    }

    build
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn test_diamond() {
        let (nodes, connections) = diamond();
        let build = build_plan(&nodes, &connections);

        assert!(build.is_valid(), "{:?}", build.messages());

        let plan = &build.plan;
        assert_eq!(plan.max_stage, Some(2));
        assert_eq!(plan.stage_of("A"), Some(0));
        assert_eq!(plan.stage_of("B"), Some(1));
        assert_eq!(plan.stage_of("C"), Some(1));
        assert_eq!(plan.stage_of("D"), Some(2));

        assert!(!plan.stages[0].can_parallelize);
        assert!(plan.stages[1].can_parallelize);
        assert!(!plan.stages[2].can_parallelize);

        assert_eq!(plan.execution_order.first().map(String::as_str), Some("A"));
        assert_eq!(plan.execution_order.last().map(String::as_str), Some("D"));
        assert!(plan.contains("B") && plan.contains("C"));
        assert_eq!(plan.stages[2].nodes[0].inputs, ["B", "C"]);
    }

    #[test]
    fn test_order_respects_every_connection() {
        let (nodes, connections) = diamond();
        let plan = build_plan(&nodes, &connections).plan;

        for connection in &connections {
            let from = plan.position(&connection.from_node).unwrap();
            let to = plan.position(&connection.to_node).unwrap();
            assert!(from < to, "{} must run before {}", connection.from_node, connection.to_node);
        }
    }

    #[test]
    fn test_stage_sorted_by_position() {
        let nodes = vec![
            Node::new("right", "Source").at(500.0, 0.0),
            Node::new("low", "Source").at(100.0, 300.0),
            Node::new("high", "Source").at(100.0, 10.0),
        ];
        let plan = build_plan(&nodes, &[]).plan;

        assert_eq!(plan.execution_order, ["high", "low", "right"]);
        assert!(plan.stages[0].can_parallelize);
    }

    #[test]
    fn test_empty_graph() {
        let build = build_plan(&[], &[]);

        assert!(build.is_valid());
        assert!(build.plan.is_empty());
        assert_eq!(build.plan.max_stage, None);
        assert!(build.plan.stages.is_empty());
    }

    #[test]
    fn test_cycle_is_invalid() {
        let nodes = vec![Node::new("X", "T"), Node::new("Y", "T")];
        let connections = vec![Connection::link("X", "Y"), Connection::link("Y", "X")];
        let build = build_plan(&nodes, &connections);

        assert!(!build.is_valid());
        assert!(build.plan.is_empty());

        let messages = build.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains('X'));
        assert!(messages[0].contains('Y'));
    }

    #[test]
    fn test_self_loop_is_invalid() {
        let nodes = vec![Node::new("X", "T"), Node::new("Y", "T")];
        let connections = vec![Connection::link("X", "Y"), Connection::link("Y", "Y")];
        let build = build_plan(&nodes, &connections);

        assert!(!build.is_valid());
        assert!(build.plan.is_empty());
        assert_eq!(
            build.diagnostics,
            [Diagnostic::Cycle {
                stuck: vec!["Y".into()],
                cycles: vec![vec!["Y".into()]],
            }]
        );
    }

    #[test]
    fn test_self_loop_stalls_descendants() {
        let nodes = vec![Node::new("X", "T"), Node::new("Y", "T")];
        let connections = vec![Connection::link("X", "X"), Connection::link("X", "Y")];
        let build = build_plan(&nodes, &connections);

        assert!(!build.is_valid());
        assert!(build.plan.is_empty());
        match &build.diagnostics[..] {
            [Diagnostic::Cycle { stuck, cycles }] => {
                assert_eq!(stuck, &["X", "Y"]);
                assert_eq!(cycles, &[vec!["X".to_string()]]);
            }
            other => panic!("unexpected diagnostics: {other:?}"),
        }
        assert!(build.messages()[0].contains("(cycles: [X])"));
    }

    #[test]
    fn test_unconnected_nodes_warn_only() {
        let nodes = vec![Node::new("n1", "Image Import")];
        let build = build_plan(&nodes, &[]);

        assert!(build.is_valid());
        assert_eq!(build.warnings().count(), 1);
        assert_eq!(build.errors().count(), 0);
        assert!(build.into_result().is_ok());
    }

    #[test]
    fn test_summary() {
        let (nodes, connections) = diamond();
        let summary = build_plan(&nodes, &connections).plan.summary();

        assert!(summary.starts_with("Plan Summary:"));
        assert!(summary.contains("Total Stages: 3"));
        assert!(summary.contains("Total Nodes: 4"));
        assert!(summary.contains("Stage 1 [PARALLEL]: (2 nodes)"));
        assert!(summary.contains("Stage 2: (1 node)"));
        assert!(summary.contains("  - Source (A) (source)"));
        assert!(summary.contains("  - Merge (D) <- [B, C]"));
        assert!(summary.ends_with("Execution Order: A -> B -> C -> D"));
    }

    #[test]
    fn test_summary_of_empty_plan() {
        let summary = ExecutionPlan::empty().summary();

        assert!(summary.contains("Total Stages: 0"));
        assert!(summary.contains("Total Nodes: 0"));
    }

    #[test]
    fn test_plan_serializes_node_type() {
        let (nodes, connections) = diamond();
        let plan = build_plan(&nodes, &connections).plan;
        let json = serde_json::to_value(&plan).unwrap();

        let first = &json["stages"][0]["nodes"][0];
        assert_eq!(first["id"], "A");
        assert_eq!(first["type"], "Source");
        assert_eq!(first["inputs"], serde_json::json!([]));
    }
}
