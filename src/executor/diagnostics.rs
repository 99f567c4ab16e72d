use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::core::NodeId;

#[derive(Debug, Clone, Copy)]
pub struct NodeTiming {
    pub start: Instant,
    pub duration: Duration,
}

/// What happened during a single run of a plan.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Nodes that ran, in the order they were merged into the results.
    pub executed: Vec<NodeId>,
    /// Nodes whose output was already present and was reused as is.
    pub skipped: Vec<NodeId>,
    pub timings: HashMap<NodeId, NodeTiming>,
}

impl RunReport {
    pub(crate) fn record(&mut self, node: &str, start: Instant, duration: Duration) {
        self.executed.push(node.to_owned());
        self.timings
            .insert(node.to_owned(), NodeTiming { start, duration });
    }

    /// The executed nodes, slowest first.
    pub fn slowest(&self) -> Vec<(&str, Duration)> {
        let mut nodes: Vec<_> = self
            .timings
            .iter()
            .map(|(id, timing)| (id.as_str(), timing.duration))
            .collect();

        nodes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        nodes
    }

    /// Time from the first node starting to the last one finishing.
    pub fn wall_time(&self) -> Duration {
        let start = self.timings.values().map(|t| t.start).min();
        let end = self.timings.values().map(|t| t.start + t.duration).max();

        match (start, end) {
            (Some(start), Some(end)) => end.duration_since(start),
            _ => Duration::ZERO,
        }
    }

    /// Sum of the time spent inside executors.
    pub fn busy_time(&self) -> Duration {
        self.timings.values().map(|t| t.duration).sum()
    }
}
