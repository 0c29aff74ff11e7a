//! Concurrency-bounded scheduler
//!
//! Drives the resolver's execution layers through a `JoinSet` of workers
//! under a global semaphore. Layer boundaries are strict barriers: no task
//! of layer *k*+1 is dispatched before every task of layer *k* has
//! completed, so template evaluation for a task always sees every
//! dependency already published.
//!
//! Failure policy: a failed required task marks the workflow failed but
//! execution continues; downstream tasks whose dependency chain includes
//! the failure are skipped with "dependency failed" unless they set
//! `always_run`. Cancellation is cooperative: running tasks get a child
//! token and come back as `failed`/"cancelled", undispatched tasks are
//! recorded as skipped.

use std::sync::Arc;

use chrono::Utc;
use colored::Colorize;
use rustc_hash::FxHashSet;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::ast::{ExecutionMode, TaskConfig, Workflow};
use crate::context::WorkflowContext;
use crate::dag::TaskGraph;
use crate::error::{Result, SkeinError};
use crate::result::{TaskResult, TaskStatus, WorkflowResult, WorkflowStatus};
use crate::task::TaskRegistry;
use crate::template;

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub dry_run: bool,
    pub max_concurrency: usize,
    pub mode: ExecutionMode,
}

impl ExecutorConfig {
    pub const DEFAULT_CONCURRENCY: usize = 10;
    pub const MAX_CONCURRENCY: usize = 256;

    /// Validate and normalize: 0 selects the default, anything outside
    /// [1, 256] is rejected.
    pub fn validated(dry_run: bool, max_concurrency: usize, mode: ExecutionMode) -> Result<Self> {
        let max_concurrency = if max_concurrency == 0 {
            Self::DEFAULT_CONCURRENCY
        } else {
            max_concurrency
        };
        if max_concurrency > Self::MAX_CONCURRENCY {
            return Err(SkeinError::InvalidConcurrency {
                value: max_concurrency,
            });
        }
        Ok(Self {
            dry_run,
            max_concurrency,
            mode,
        })
    }
}

/// The main graph plus the optional hook graphs, built pre-execution
pub struct ExecutionPlan {
    pub main: TaskGraph,
    pub on_success: Option<TaskGraph>,
    pub on_failure: Option<TaskGraph>,
}

/// Layer-driven workflow executor
pub struct Scheduler {
    registry: Arc<TaskRegistry>,
    config: ExecutorConfig,
}

/// Book-keeping carried across layers of one run
struct RunState {
    result: WorkflowResult,
    /// Ids of failed required tasks plus everything skipped downstream of
    /// them; membership taints dependents.
    poisoned: FxHashSet<String>,
    completed: usize,
    total: usize,
}

impl Scheduler {
    pub fn new(registry: Arc<TaskRegistry>, config: ExecutorConfig) -> Self {
        Self { registry, config }
    }

    /// Execute the whole plan: main graph, then the hook list selected by
    /// the aggregate status. Hook failures never change the aggregate.
    #[instrument(skip_all, fields(workflow = %workflow.name, mode = %self.config.mode))]
    pub async fn execute(
        &self,
        workflow: &Workflow,
        plan: &ExecutionPlan,
        ctx: Arc<WorkflowContext>,
        cancel: &CancellationToken,
    ) -> WorkflowResult {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut state = RunState {
            result: WorkflowResult::running(&workflow.name),
            poisoned: FxHashSet::default(),
            completed: 0,
            total: workflow.tasks.len(),
        };

        println!(
            "{} Running workflow '{}' with {} tasks...",
            "→".cyan(),
            workflow.name,
            state.total
        );

        self.run_graph(&plan.main, &ctx, cancel, &semaphore, &mut state)
            .await;

        let status = self.aggregate_status(workflow, &state.result, cancel.is_cancelled());

        // Post-hooks share context and dispatcher; a fresh poison set keeps
        // main-graph failures from skipping them.
        let hooks = match status {
            WorkflowStatus::Failed => plan.on_failure.as_ref(),
            _ => plan.on_success.as_ref(),
        };
        if let Some(hook_graph) = hooks {
            if !cancel.is_cancelled() && !hook_graph.execution_layers().is_empty() {
                debug!("running post hooks");
                state.poisoned = FxHashSet::default();
                state.total += hook_graph.stats().task_count;
                self.run_graph(hook_graph, &ctx, cancel, &semaphore, &mut state)
                    .await;
            }
        }

        let mut result = state.result;
        if cancel.is_cancelled() && status == WorkflowStatus::Failed {
            result.error = Some("cancelled".to_string());
        }
        result.variables = ctx.variables().clone();
        result.metadata = ctx.metadata().clone();
        result.finish(status);

        let symbol = match status {
            WorkflowStatus::Success => "✓".green(),
            WorkflowStatus::PartialSuccess => "⚠".yellow(),
            _ => "✗".red(),
        };
        println!("{} Workflow '{}' finished: {}\n", symbol, workflow.name, status);
        result
    }

    /// Run one graph layer by layer (or task by task in sequential mode)
    async fn run_graph(
        &self,
        graph: &TaskGraph,
        ctx: &Arc<WorkflowContext>,
        cancel: &CancellationToken,
        semaphore: &Arc<Semaphore>,
        state: &mut RunState,
    ) {
        let layers: Vec<Vec<Arc<TaskConfig>>> = match self.config.mode {
            ExecutionMode::Parallel => graph
                .execution_layers()
                .iter()
                .map(|layer| layer.tasks.clone())
                .collect(),
            // Sequential mode: topological order, one task per layer
            ExecutionMode::Sequential => graph
                .task_order()
                .into_iter()
                .map(|task| vec![task])
                .collect(),
        };

        for layer in layers {
            if cancel.is_cancelled() {
                for task in &layer {
                    let skipped = TaskResult::skipped(task, "cancelled");
                    self.absorb(state, ctx, task, skipped);
                }
                continue;
            }

            let mut join_set: JoinSet<(Arc<TaskConfig>, TaskResult)> = JoinSet::new();

            for task in &layer {
                // Transitive failure propagation: any direct dependency in
                // the poison set taints this task (and its own dependents,
                // even when always_run forces it to execute).
                let tainted = graph
                    .dependencies_of(&task.id)
                    .iter()
                    .any(|dep| state.poisoned.contains(*dep));
                if tainted {
                    state.poisoned.insert(task.id.clone());
                    if !task.always_run {
                        let skipped = TaskResult::skipped(task, "dependency failed");
                        self.absorb(state, ctx, task, skipped);
                        continue;
                    }
                    debug!(task = %task.id, "always_run forces dispatch despite failed dependency");
                }

                // Pre-evaluate the when gate; skipped tasks never occupy a
                // semaphore slot.
                if let Some(when) = &task.when {
                    match template::evaluate(when, ctx.as_ref()) {
                        Ok(rendered) if !template::is_truthy(&rendered) => {
                            let skipped =
                                TaskResult::skipped(task, "when condition evaluated to false");
                            self.absorb(state, ctx, task, skipped);
                            continue;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            let failed = TaskResult::failed(
                                task,
                                format!("when template evaluation failed: {}", e),
                            );
                            self.absorb(state, ctx, task, failed);
                            continue;
                        }
                    }
                }

                println!("  {} {} {}", "[⟳]".yellow(), task.id, "running...".dimmed());

                let registry = Arc::clone(&self.registry);
                let task = Arc::clone(task);
                let ctx = Arc::clone(ctx);
                let semaphore = Arc::clone(semaphore);
                let token = cancel.child_token();
                let dry_run = self.config.dry_run;

                join_set.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    let result = run_task(&registry, &task, &ctx, token, dry_run).await;
                    (task, result)
                });
            }

            // Layer barrier: drain every worker before the next layer
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((task, result)) => self.absorb(state, ctx, &task, result),
                    Err(e) => {
                        warn!(error = %e, "task worker panicked");
                        state.result.error = Some(format!("task worker panicked: {}", e));
                    }
                }
            }
        }
    }

    /// Publish a finished result, record it, maintain the poison set, and
    /// print the progress line.
    fn absorb(
        &self,
        state: &mut RunState,
        ctx: &Arc<WorkflowContext>,
        task: &TaskConfig,
        result: TaskResult,
    ) {
        ctx.publish(result.clone(), task.register.as_deref());

        if result.is_failed() && task.required {
            state.poisoned.insert(task.id.clone());
        }

        state.completed += 1;
        let counter = format!("[{}/{}]", state.completed, state.total);
        let line = match result.status {
            TaskStatus::Failed => format!(
                "  {} {} {} {}",
                counter.red(),
                task.id,
                "✗".red(),
                result.message.red()
            ),
            TaskStatus::Skipped => format!(
                "  {} {} {} {}",
                counter.dimmed(),
                task.id,
                "↷".dimmed(),
                result.message.dimmed()
            ),
            _ => format!(
                "  {} {} {} {}",
                counter.green(),
                task.id,
                "✓".green(),
                format!("({:.1}s)", result.duration.as_secs_f32()).dimmed()
            ),
        };
        println!("{}", line);

        state.result.record(result);
    }

    /// Aggregate status rule over the main tasks:
    /// - any required task failed -> failed
    /// - cancelled before every required task was decided -> failed
    /// - any non-required task failed -> partial_success
    /// - otherwise -> success
    fn aggregate_status(
        &self,
        workflow: &Workflow,
        result: &WorkflowResult,
        cancelled: bool,
    ) -> WorkflowStatus {
        let mut any_failed = false;
        let mut required_failed = false;
        let mut required_undecided = false;

        for task in &workflow.tasks {
            match result.task(&task.id) {
                Some(r) if r.is_failed() => {
                    any_failed = true;
                    if task.required {
                        required_failed = true;
                        if r.message == "cancelled" {
                            required_undecided = true;
                        }
                    }
                }
                Some(r) if r.is_skipped() && r.message == "cancelled" => {
                    if task.required {
                        required_undecided = true;
                    }
                }
                Some(_) => {}
                None => {
                    if task.required {
                        required_undecided = true;
                    }
                }
            }
        }

        if required_failed || (cancelled && required_undecided) {
            WorkflowStatus::Failed
        } else if any_failed {
            WorkflowStatus::PartialSuccess
        } else {
            WorkflowStatus::Success
        }
    }
}

/// Per-task execution pipeline: render config, dry-run gate, deadline
/// wrapping, retry loop. Always returns a result; never panics upward.
async fn run_task(
    registry: &TaskRegistry,
    task: &Arc<TaskConfig>,
    ctx: &Arc<WorkflowContext>,
    cancel: CancellationToken,
    dry_run: bool,
) -> TaskResult {
    let type_name = task.task_type.as_deref().unwrap_or("");
    let Some(implementation) = registry.get(type_name) else {
        // Unreachable after validation; encoded as a failure regardless
        return TaskResult::failed(task, format!("unknown task type '{}'", type_name));
    };

    // Render the free-form config against the current context; a template
    // failure is a task failure, not a workflow abort.
    let rendered = match render_config(task, ctx.as_ref()) {
        Ok(rendered) => rendered,
        Err(e) => {
            let mut r =
                TaskResult::failed(task, format!("template evaluation failed: {}", e));
            r.attempt_count = 0;
            return r;
        }
    };

    if dry_run && implementation.supports_dry_run() {
        debug!(task = %task.id, "dry run short-circuit");
        return TaskResult::skipped(task, "Dry run mode");
    }

    // Per-task timeout wraps the cancellation token with a deadline
    let token = cancel.child_token();
    if let Some(deadline) = task.timeout() {
        let watchdog = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(deadline) => watchdog.cancel(),
                _ = watchdog.cancelled() => {}
            }
        });
    }

    let attempts = task.retry_count + 1;
    let delay = task.retry_delay();
    let overall_start = Utc::now();
    let mut outcome = None;

    for attempt in 1..=attempts {
        let mut result = implementation.execute(&token, &rendered, ctx.as_ref()).await;
        result.attempt_count = attempt;

        let failed = result.is_failed();
        outcome = Some(result);
        if !failed || token.is_cancelled() {
            break;
        }
        if attempt < attempts {
            debug!(task = %task.id, attempt, "retrying after {:?}", delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = token.cancelled() => break,
            }
        }
    }
    token.cancel(); // stop the deadline watchdog

    let mut result =
        outcome.unwrap_or_else(|| TaskResult::failed(task, "task produced no result"));
    // The task-level window spans every attempt, retries included
    result.start_time = Some(overall_start);
    let end = Utc::now();
    result.end_time = Some(end);
    result.duration = (end - overall_start)
        .to_std()
        .unwrap_or(std::time::Duration::ZERO);
    result
}

/// Clone the task config with every string leaf of its config map rendered
fn render_config(task: &TaskConfig, ctx: &WorkflowContext) -> Result<TaskConfig> {
    let mut rendered = task.clone();
    match template::evaluate_value(&Value::Object(task.config.clone()), ctx)? {
        Value::Object(map) => rendered.config = map,
        _ => unreachable!("object input renders to object"),
    }
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_zero_selects_default() {
        let config = ExecutorConfig::validated(false, 0, ExecutionMode::Parallel).unwrap();
        assert_eq!(config.max_concurrency, ExecutorConfig::DEFAULT_CONCURRENCY);
    }

    #[test]
    fn concurrency_bounds() {
        assert!(ExecutorConfig::validated(false, 1, ExecutionMode::Parallel).is_ok());
        assert!(ExecutorConfig::validated(false, 256, ExecutionMode::Parallel).is_ok());
        let err = ExecutorConfig::validated(false, 300, ExecutionMode::Parallel).unwrap_err();
        assert!(matches!(err, SkeinError::InvalidConcurrency { value: 300 }));
    }
}
