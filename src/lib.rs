#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod core;
mod error;
mod executor;
pub mod graph;
pub mod plan;
mod registry;
mod utils;

pub use crate::core::{Connection, Dynamic, Node, NodeId, Properties, Results};
pub use crate::error::*;
pub use crate::executor::{
    Engine, ExecuteOptions, NodeTiming, RunReport, execute, reusable,
};
pub use crate::graph::GraphBuilder;
pub use crate::plan::incremental::{affected, build_incremental_plan};
pub use crate::plan::{ExecutionPlan, PlanBuild, PlanNode, Stage, build_plan};
pub use crate::registry::{Executor, ExecutorMetadata, Inputs, Registry};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;

/// Human-readable rendering of a plan, one line per node.
///
/// ```text
/// Plan Summary:
///   Total Stages: 2
///   Total Nodes: 2
///
/// Stage 0: (1 node)
///   - Image Import (load) (source)
///
/// Stage 1: (1 node)
///   - Blur (blur) <- [load]
///
/// Execution Order: load -> blur
/// ```
pub fn summarize(plan: &ExecutionPlan) -> String {
    plan.summary()
}
