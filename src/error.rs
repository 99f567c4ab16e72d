use std::fmt;

use thiserror::Error;

use crate::core::NodeId;

/// How much a [`Diagnostic`] matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Makes the plan invalid.
    Error,
    /// Informational only, the plan can still run.
    Warning,
}

/// Which end of a connection a diagnostic is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    From,
    To,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::From => f.write_str("from_node"),
            Endpoint::To => f.write_str("to_node"),
        }
    }
}

/// Structural problem found while building or validating a plan.
///
/// These are never returned as `Err`: a plan build always succeeds and
/// carries its diagnostics, so the editor can highlight the offending nodes
/// instead of failing outright.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Diagnostic {
    #[error("{}", describe_cycle(.stuck, .cycles))]
    Cycle {
        /// Every node still unassigned when stage leveling stalled.
        stuck: Vec<NodeId>,
        /// Strongly connected components among the stuck nodes.
        cycles: Vec<Vec<NodeId>>,
    },

    #[error("Nodes missing from plan: {}", .0.join(", "))]
    MissingFromPlan(Vec<NodeId>),

    #[error("Unknown nodes in plan: {}", .0.join(", "))]
    UnknownInPlan(Vec<NodeId>),

    #[error("Nodes appear multiple times in plan: {}", .0.join(", "))]
    DuplicateInPlan(Vec<NodeId>),

    #[error("Plan has no source nodes (stage 0 is empty)")]
    EmptySourceStage,

    #[error("Plan has no stages")]
    NoStages,

    #[error("Connection {index}: {end} '{node}' does not exist")]
    DanglingConnection {
        index: usize,
        end: Endpoint,
        node: NodeId,
    },

    #[error("Connection {index}: node '{node}' is connected to itself")]
    SelfLoop { index: usize, node: NodeId },

    #[error("Warning: Disconnected nodes detected: {}", .0.join(", "))]
    Disconnected(Vec<String>),

    #[error("No nodes provided")]
    NoNodes,

    #[error("No valid updated nodes provided")]
    NoDirtyNodes,

    #[error("Updated nodes not found in graph: {}", .0.join(", "))]
    UnknownDirtyNodes(Vec<NodeId>),
}

impl Diagnostic {
    pub fn severity(&self) -> Severity {
        match self {
            Diagnostic::Disconnected(_) => Severity::Warning,
            _ => Severity::Error,
        }
    }

    pub fn is_warning(&self) -> bool {
        self.severity() == Severity::Warning
    }

    /// True for anomalies that point at a defect in plan construction rather
    /// than at something the user drew.
    pub fn is_internal(&self) -> bool {
        matches!(self, Diagnostic::EmptySourceStage | Diagnostic::NoStages)
    }
}

fn describe_cycle(stuck: &[NodeId], cycles: &[Vec<NodeId>]) -> String {
    let mut message = format!(
        "Circular dependency detected: cannot assign stages to nodes: {}",
        stuck.join(", ")
    );

    if !cycles.is_empty() {
        let cycles: Vec<_> = cycles
            .iter()
            .map(|cycle| format!("[{}]", cycle.join(", ")))
            .collect();
        message.push_str(&format!(" (cycles: {})", cycles.join(", ")));
    }

    message
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("node type cannot be empty")]
    EmptyType,

    #[error("node type '{0}' is already registered, unregister it first to replace it")]
    AlreadyRegistered(String),

    #[error("no executor registered for node type '{node_type}', available types: {}", .available.join(", "))]
    NotFound {
        node_type: String,
        available: Vec<String>,
    },
}

/// Fatal error of a plan run.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("Node '{node}': {source}")]
    Lookup {
        node: NodeId,
        #[source]
        source: RegistryError,
    },

    #[error("Error executing node '{node}' ({node_type}):\n{source}")]
    Node {
        node: NodeId,
        node_type: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Node '{node}' requires the output of '{input}', which has not been computed")]
    MissingInput { node: NodeId, input: NodeId },

    #[error("Failed to build the worker pool")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

impl ExecuteError {
    /// Id of the node the run failed on, if the failure is tied to one.
    pub fn node(&self) -> Option<&str> {
        match self {
            ExecuteError::Lookup { node, .. }
            | ExecuteError::Node { node, .. }
            | ExecuteError::MissingInput { node, .. } => Some(node),
            ExecuteError::Pool(_) => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("node id is required")]
    EmptyId,

    #[error("node type is required")]
    EmptyType,

    #[error("Node already exists: {0}")]
    DuplicateNode(NodeId),

    #[error("Cannot connect node '{0}' to itself")]
    SelfConnection(NodeId),

    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Node has no outputs: {0}")]
    NoOutputs(NodeId),

    #[error("Node has no inputs: {0}")]
    NoInputs(NodeId),

    #[error("Invalid output index {index} for node {node}")]
    OutputOutOfRange { node: NodeId, index: usize },

    #[error("Invalid input index {index} for node {node}")]
    InputOutOfRange { node: NodeId, index: usize },

    #[error("Input slot already connected: {node}[{index}]")]
    InputOccupied { node: NodeId, index: usize },

    #[error("Connection already exists")]
    DuplicateConnection,

    #[error("Target node {node} only has {slots} input slots")]
    NotEnoughInputs { node: NodeId, slots: usize },
}
