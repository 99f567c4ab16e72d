//! Assembling graphs by hand.
//!
//! The engine only ever sees plain [`Node`] and [`Connection`] lists. The
//! [`GraphBuilder`] produces such lists the way an editor would: every node
//! declares how many input and output slots it has, an input slot accepts a
//! single connection, and an output slot may fan out to any number of inputs.

use std::collections::{HashMap, HashSet};

use crate::core::{Connection, Node, NodeId};
use crate::error::GraphError;
use crate::plan::{PlanBuild, build_plan};

#[derive(Debug, Clone)]
struct Slotted {
    node: Node,
    inputs: usize,
    outputs: usize,
}

#[derive(Debug, Clone)]
pub struct GraphBuilder {
    start_x: f64,
    start_y: f64,
    x_spacing: f64,
    nodes: Vec<Slotted>,
    index: HashMap<NodeId, usize>,
    connections: Vec<Connection>,
    occupied: HashSet<(NodeId, usize)>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::with_layout(100.0, 100.0, 220.0)
    }
}

/// `input` for a single slot, `input_0`, `input_1`, ... otherwise.
fn port(kind: &str, index: usize, total: usize) -> String {
    match total {
        1 => kind.to_owned(),
        _ => format!("{kind}_{index}"),
    }
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nodes added without an explicit position are laid out left to right,
    /// starting at (`start_x`, `start_y`).
    pub fn with_layout(start_x: f64, start_y: f64, x_spacing: f64) -> Self {
        Self {
            start_x,
            start_y,
            x_spacing,
            nodes: Vec::new(),
            index: HashMap::new(),
            connections: Vec::new(),
            occupied: HashSet::new(),
        }
    }

    /// Adds a node with the given number of slots and returns it for further
    /// changes, such as moving it or setting properties.
    pub fn add_node(
        &mut self,
        id: &str,
        kind: &str,
        inputs: usize,
        outputs: usize,
    ) -> Result<&mut Node, GraphError> {
        let id = id.trim();
        let kind = kind.trim();

        if id.is_empty() {
            return Err(GraphError::EmptyId);
        }
        if kind.is_empty() {
            return Err(GraphError::EmptyType);
        }
        if self.index.contains_key(id) {
            return Err(GraphError::DuplicateNode(id.to_owned()));
        }

        let position = self.nodes.len();
        let x = self.start_x + position as f64 * self.x_spacing;

        self.index.insert(id.to_owned(), position);
        self.nodes.push(Slotted {
            node: Node::new(id, kind).at(x, self.start_y),
            inputs,
            outputs,
        });

        Ok(&mut self.nodes[position].node)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.slotted(id).map(|slotted| &slotted.node)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        let position = *self.index.get(id.trim())?;
        Some(&mut self.nodes[position].node)
    }

    /// Input and output slot counts of a node.
    pub fn slots(&self, id: &str) -> Option<(usize, usize)> {
        self.slotted(id)
            .map(|slotted| (slotted.inputs, slotted.outputs))
    }

    fn slotted(&self, id: &str) -> Option<&Slotted> {
        self.index
            .get(id.trim())
            .map(|&position| &self.nodes[position])
    }

    /// Connects output slot `from_output` of `from` to input slot `to_input`
    /// of `to`.
    pub fn connect(
        &mut self,
        from: &str,
        to: &str,
        from_output: usize,
        to_input: usize,
    ) -> Result<&Connection, GraphError> {
        let from = from.trim();
        let to = to.trim();

        if from == to {
            return Err(GraphError::SelfConnection(from.to_owned()));
        }

        let source = self
            .slotted(from)
            .ok_or_else(|| GraphError::UnknownNode(from.to_owned()))?;
        let target = self
            .slotted(to)
            .ok_or_else(|| GraphError::UnknownNode(to.to_owned()))?;

        if source.outputs == 0 {
            return Err(GraphError::NoOutputs(from.to_owned()));
        }
        if target.inputs == 0 {
            return Err(GraphError::NoInputs(to.to_owned()));
        }
        if from_output >= source.outputs {
            return Err(GraphError::OutputOutOfRange {
                node: from.to_owned(),
                index: from_output,
            });
        }
        if to_input >= target.inputs {
            return Err(GraphError::InputOutOfRange {
                node: to.to_owned(),
                index: to_input,
            });
        }

        let slot = (to.to_owned(), to_input);
        if self.occupied.contains(&slot) {
            return Err(GraphError::InputOccupied {
                node: to.to_owned(),
                index: to_input,
            });
        }

        let connection = Connection::new(
            from,
            port("output", from_output, source.outputs),
            to,
            port("input", to_input, target.inputs),
        );

        if self.connections.contains(&connection) {
            return Err(GraphError::DuplicateConnection);
        }

        self.occupied.insert(slot);
        self.connections.push(connection);

        Ok(&self.connections[self.connections.len() - 1])
    }

    /// Links the nodes one after another: `a -> b -> c -> ...`
    pub fn connect_chain<S: AsRef<str>>(&mut self, ids: &[S]) -> Result<usize, GraphError> {
        for pair in ids.windows(2) {
            self.connect(pair[0].as_ref(), pair[1].as_ref(), 0, 0)?;
        }

        Ok(ids.len().saturating_sub(1))
    }

    /// Feeds every source into consecutive input slots of `target`.
    pub fn connect_many_to_input<S: AsRef<str>>(
        &mut self,
        sources: &[S],
        target: &str,
    ) -> Result<usize, GraphError> {
        let target = target.trim();
        let (inputs, _) = self
            .slots(target)
            .ok_or_else(|| GraphError::UnknownNode(target.to_owned()))?;

        if sources.len() > inputs {
            return Err(GraphError::NotEnoughInputs {
                node: target.to_owned(),
                slots: inputs,
            });
        }

        for (slot, source) in sources.iter().enumerate() {
            self.connect(source.as_ref(), target, 0, slot)?;
        }

        Ok(sources.len())
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> Vec<Node> {
        self.nodes.iter().map(|slotted| slotted.node.clone()).collect()
    }

    /// Connections in creation order.
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn into_parts(self) -> (Vec<Node>, Vec<Connection>) {
        let nodes = self.nodes.into_iter().map(|slotted| slotted.node).collect();
        (nodes, self.connections)
    }

    pub fn build_plan(&self) -> PlanBuild {
        build_plan(&self.nodes(), &self.connections)
    }
}
