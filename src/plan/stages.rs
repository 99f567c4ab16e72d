use std::collections::{BTreeMap, HashMap};

use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;

use crate::core::{Node, NodeId};
use crate::error::Diagnostic;
use crate::plan::deps::DependencyMap;

/// Stage number of every node.
pub type StageMap = BTreeMap<NodeId, usize>;

/// Assigns every node in `dependencies` a stage.
///
/// Nodes without predecessors land in stage 0, every other node one stage
/// after its latest predecessor. Each pass scans the still unassigned nodes
/// in canvas order (`x`, then `y`) and assigns whatever is ready. A pass that
/// assigns nothing means the remaining nodes sit on or behind a cycle, which
/// is reported as [`Diagnostic::Cycle`]. Predecessors missing from
/// `dependencies` are never assigned and stall the same way.
pub fn assign(nodes: &[Node], dependencies: &DependencyMap) -> Result<StageMap, Diagnostic> {
    let lookup: HashMap<&str, &Node> = nodes.iter().map(|node| (node.id.as_str(), node)).collect();

    let mut stages = StageMap::new();
    let mut pending: Vec<&str> = dependencies.keys().map(String::as_str).collect();

    let max_passes = pending.len() + 1;
    let mut passes = 0;

    while !pending.is_empty() && passes < max_passes {
        pending.sort_by(|a, b| match (lookup.get(a), lookup.get(b)) {
            (Some(a), Some(b)) => a.cmp_position(b),
            _ => a.cmp(b),
        });

        let before = pending.len();

        pending.retain(|&id| {
            let inputs = dependencies.get(id).map(Vec::as_slice).unwrap_or_default();

            let stage = inputs
                .iter()
                .try_fold(0, |stage, input| stages.get(input).map(|&s| stage.max(s + 1)));

            match stage {
                Some(stage) => {
                    stages.insert(id.to_owned(), stage);
                    false
                }
                None => true,
            }
        });

        if pending.len() == before {
            break;
        }

        passes += 1;
    }

    if pending.is_empty() {
        Ok(stages)
    } else {
        Err(stall(&pending, dependencies))
    }
}

fn stall(pending: &[&str], dependencies: &DependencyMap) -> Diagnostic {
    let mut stuck: Vec<NodeId> = pending.iter().map(|id| id.to_string()).collect();
    stuck.sort();

    let mut graph = DiGraphMap::<&str, ()>::new();
    for &id in pending {
        graph.add_node(id);
    }
    for &id in pending {
        for input in dependencies.get(id).into_iter().flatten() {
            if graph.contains_node(input.as_str()) {
                graph.add_edge(input.as_str(), id, ());
            }
        }
    }

    let mut cycles: Vec<Vec<NodeId>> = tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .map(|scc| {
            let mut scc: Vec<NodeId> = scc.into_iter().map(str::to_owned).collect();
            scc.sort();
            scc
        })
        .collect();
    cycles.sort();

    tracing::debug!("stage leveling stalled on {} nodes", stuck.len());

    Diagnostic::Cycle { stuck, cycles }
}
