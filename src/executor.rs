mod diagnostics;

use std::collections::{HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::{Dynamic, NodeId, Results};
use crate::error::ExecuteError;
use crate::plan::{ExecutionPlan, PlanNode, Stage};
use crate::registry::{Executor, Inputs, Registry};

pub use diagnostics::{NodeTiming, RunReport};

/// How a plan is run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Run the nodes of parallel stages on a worker pool.
    pub concurrent: bool,
    /// Size of the worker pool, `None` lets rayon decide.
    pub max_workers: Option<usize>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            concurrent: true,
            max_workers: None,
        }
    }
}

impl ExecuteOptions {
    /// Every node runs on the calling thread, in plan order.
    pub fn sequential() -> Self {
        Self {
            concurrent: false,
            max_workers: None,
        }
    }

    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers);
        self
    }
}

/// Runs execution plans against a registry of executors.
pub struct Engine<'a> {
    registry: &'a Registry,
    options: ExecuteOptions,
}

/// A node ready to be dispatched: its executor is resolved and its inputs
/// are gathered.
struct Job<'a> {
    node: &'a PlanNode,
    executor: &'a dyn Executor,
    inputs: Vec<Dynamic>,
}

struct Outcome {
    result: anyhow::Result<Dynamic>,
    start: Instant,
    duration: Duration,
}

impl Job<'_> {
    fn run(&self) -> Outcome {
        let span = tracing::span!(Level::INFO, "node", id = %self.node.id, kind = %self.node.kind);
        if let Ok(style) = crate::utils::task_style() {
            span.pb_set_style(&style);
        }
        span.pb_set_message(&format!("Running {} ({})", self.node.kind, self.node.id));
        let _enter = span.enter();

        let start = Instant::now();

        // Executors only see shared references to data that outlives the
        // stage, so a panic cannot leave anything half-written.
        let result = match catch_unwind(AssertUnwindSafe(|| {
            self.executor
                .execute(&self.node.properties, Inputs::new(&self.inputs))
        })) {
            Ok(result) => result,
            Err(panic) => {
                let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                    format!("Executor panicked: {s}")
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    format!("Executor panicked: {s}")
                } else {
                    String::from("Executor panicked with unknown payload")
                };

                Err(anyhow::anyhow!(msg))
            }
        };

        Outcome {
            result,
            start,
            duration: start.elapsed(),
        }
    }
}

impl<'a> Engine<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            options: ExecuteOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExecuteOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> ExecuteOptions {
        self.options
    }

    /// Runs `plan` stage by stage, adding every output to `results`.
    ///
    /// Nodes already present in `results` count as computed and are skipped
    /// without looking up their executor. Within a stage the executors are
    /// resolved and the inputs gathered before anything is dispatched; the
    /// outputs are collected into a stage-local map and only merged into
    /// `results` once the whole stage has finished.
    ///
    /// The first failure aborts the run. Nodes of the failing stage that were
    /// already dispatched to the pool still run to completion, but none of
    /// that stage's outputs are merged, so `results` holds exactly the
    /// outputs of the stages before it.
    pub fn run(&self, plan: &ExecutionPlan, results: &mut Results) -> Result<RunReport, ExecuteError> {
        let pending = plan
            .execution_order
            .iter()
            .filter(|id| !results.contains_key(*id))
            .count();

        let root_span = tracing::span!(Level::INFO, "executing_plan");
        root_span.pb_set_length(pending as u64);
        if let Ok(style) = crate::utils::progress_style() {
            root_span.pb_set_style(&style);
        }
        root_span.pb_set_message("Executing nodes...");
        let _enter = root_span.enter();

        let pool = if self.needs_pool(plan) {
            Some(self.build_pool()?)
        } else {
            None
        };

        let mut report = RunReport::default();

        for stage in &plan.stages {
            let span = tracing::span!(Level::INFO, "stage", number = stage.number);
            let _enter = span.enter();

            let jobs = self.prepare(stage, results, &mut report)?;
            if jobs.is_empty() {
                continue;
            }

            let outcomes = match &pool {
                Some(pool) if stage.can_parallelize && jobs.len() > 1 => {
                    run_parallel(pool, &jobs)
                }
                _ => run_sequential(&jobs),
            };

            // barrier: the whole stage is done, fold it into the shared map
            let mut local: HashMap<NodeId, Dynamic> = HashMap::with_capacity(outcomes.len());

            for (job, outcome) in jobs.iter().zip(outcomes) {
                let output = outcome.result.map_err(|source| ExecuteError::Node {
                    node: job.node.id.clone(),
                    node_type: job.node.kind.clone(),
                    source,
                })?;

                report.record(&job.node.id, outcome.start, outcome.duration);
                local.insert(job.node.id.clone(), output);
                root_span.pb_inc(1);
            }

            results.extend(local);
        }

        tracing::info!(
            "plan executed: {} nodes run, {} reused",
            report.executed.len(),
            report.skipped.len()
        );

        Ok(report)
    }

    /// Resolves executors and inputs for every node of `stage` that still
    /// needs to run.
    fn prepare<'s>(
        &self,
        stage: &'s Stage,
        results: &Results,
        report: &mut RunReport,
    ) -> Result<Vec<Job<'s>>, ExecuteError>
    where
        'a: 's,
    {
        let mut jobs = Vec::with_capacity(stage.nodes.len());

        for node in &stage.nodes {
            if results.contains_key(&node.id) {
                report.skipped.push(node.id.clone());
                continue;
            }

            let executor = self
                .registry
                .get(&node.kind)
                .map_err(|source| ExecuteError::Lookup {
                    node: node.id.clone(),
                    source,
                })?;

            let inputs = node
                .inputs
                .iter()
                .map(|input| {
                    results
                        .get(input)
                        .cloned()
                        .ok_or_else(|| ExecuteError::MissingInput {
                            node: node.id.clone(),
                            input: input.clone(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;

            jobs.push(Job {
                node,
                executor,
                inputs,
            });
        }

        Ok(jobs)
    }

    fn needs_pool(&self, plan: &ExecutionPlan) -> bool {
        self.options.concurrent
            && plan
                .stages
                .iter()
                .any(|stage| stage.can_parallelize && stage.nodes.len() > 1)
    }

    fn build_pool(&self) -> Result<ThreadPool, ExecuteError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.options.max_workers.unwrap_or(0))
            .thread_name(|index| format!("nodeflow-worker-{index}"))
            .build()?;

        Ok(pool)
    }
}

/// Runs the jobs one after another on the calling thread, stopping at the
/// first failure.
fn run_sequential(jobs: &[Job<'_>]) -> Vec<Outcome> {
    let mut outcomes = Vec::with_capacity(jobs.len());

    for job in jobs {
        tracing::debug!("running node {}", job.node.id);
        let outcome = job.run();
        let failed = outcome.result.is_err();
        outcomes.push(outcome);

        if failed {
            break;
        }
    }

    outcomes
}

/// Runs every job on the pool and waits for all of them.
///
/// Each worker sends its outcome back over a channel; the scope returning is
/// the stage barrier. Outcomes come back in job order.
fn run_parallel(pool: &ThreadPool, jobs: &[Job<'_>]) -> Vec<Outcome> {
    let (sender, receiver) = channel::<(usize, Outcome)>();

    pool.scope(|s| {
        for (index, job) in jobs.iter().enumerate() {
            let sender = sender.clone();

            s.spawn(move |_| {
                tracing::debug!("dispatching node {}", job.node.id);
                let outcome = job.run();
                // the receiver lives until after the scope
                let _ = sender.send((index, outcome));
            });
        }
    });

    drop(sender);

    let mut outcomes: Vec<(usize, Outcome)> = receiver.into_iter().collect();
    outcomes.sort_by_key(|(index, _)| *index);
    outcomes.into_iter().map(|(_, outcome)| outcome).collect()
}

/// Runs `plan` on top of `initial_results` and returns the combined results.
///
/// With `concurrent` set, stages that allow it run their nodes on a worker
/// pool sized by rayon. Use [`Engine`] for finer control.
///
/// On error the results map is dropped, seed included. Callers that need the
/// partial results of a failed run, or want to keep their cached seed, should
/// call [`Engine::run`] with a map they own.
pub fn execute(
    plan: &ExecutionPlan,
    registry: &Registry,
    initial_results: Results,
    concurrent: bool,
) -> Result<Results, ExecuteError> {
    let mut results = initial_results;

    Engine::new(registry)
        .with_options(ExecuteOptions::default().concurrent(concurrent))
        .run(plan, &mut results)?;

    Ok(results)
}

/// Everything in `previous` that `plan` does not recompute.
///
/// This is the seed an incremental plan expects: outputs of nodes outside the
/// affected set are carried over, the affected nodes run again.
pub fn reusable(previous: &Results, plan: &ExecutionPlan) -> Results {
    let scheduled: HashSet<&str> = plan.execution_order.iter().map(String::as_str).collect();

    previous
        .iter()
        .filter(|(id, _)| !scheduled.contains(id.as_str()))
        .map(|(id, output)| (id.clone(), output.clone()))
        .collect()
}
