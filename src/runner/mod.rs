//! Workflow orchestration
//!
//! [`Runner`] drives the phases of one invocation — parse, normalize,
//! validate, resolve, context init, execute — and reports them through the
//! [`RunOutcome`] envelope so callers can tell which phase failed:
//! parse and validation/dependency errors short-circuit with no
//! `WorkflowResult`; execution-phase errors are localized to task results
//! and the aggregate status.

mod scheduler;

use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::ast::{ExecutionMode, TaskConfig, Workflow};
use crate::context::WorkflowContext;
use crate::dag::TaskGraph;
use crate::error::SkeinError;
use crate::result::WorkflowResult;
use crate::task::TaskRegistry;

pub use scheduler::{ExecutionPlan, ExecutorConfig, Scheduler};

/// Caller-facing knobs for one run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    /// 0 selects the default of 10
    pub max_concurrency: usize,
    /// `KEY=VALUE` environment overrides
    pub env_overrides: Vec<String>,
    /// Override the workflow's declared mode
    pub mode: Option<ExecutionMode>,
}

/// Result envelope with one slot per failure phase
///
/// Callers inspect the slots in order: parse, dependency, validation,
/// execution, then the workflow result itself.
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub parse_error: Option<SkeinError>,
    pub dependency_error: Option<SkeinError>,
    pub validation_errors: Vec<SkeinError>,
    pub execution_error: Option<SkeinError>,
    pub workflow_result: Option<WorkflowResult>,
}

impl RunOutcome {
    fn parse_failure(error: SkeinError) -> Self {
        Self {
            parse_error: Some(error),
            ..Default::default()
        }
    }

    /// True when every phase passed (the aggregate workflow status may
    /// still be failed or partial)
    pub fn phases_ok(&self) -> bool {
        self.parse_error.is_none()
            && self.dependency_error.is_none()
            && self.validation_errors.is_empty()
            && self.execution_error.is_none()
    }

    /// First phase error, in inspection order
    pub fn phase_error(&self) -> Option<&SkeinError> {
        self.parse_error
            .as_ref()
            .or(self.dependency_error.as_ref())
            .or_else(|| self.validation_errors.first())
            .or(self.execution_error.as_ref())
    }

    /// Machine-readable rendering for `--output json`
    pub fn to_json(&self) -> Value {
        fn err(e: &Option<SkeinError>) -> Value {
            e.as_ref()
                .map(|e| json!({"code": e.code(), "message": e.to_string()}))
                .unwrap_or(Value::Null)
        }
        json!({
            "parse_error": err(&self.parse_error),
            "dependency_error": err(&self.dependency_error),
            "validation_errors": self
                .validation_errors
                .iter()
                .map(|e| json!({"code": e.code(), "message": e.to_string()}))
                .collect::<Vec<_>>(),
            "execution_error": err(&self.execution_error),
            "workflow_result": self
                .workflow_result
                .as_ref()
                .and_then(|r| serde_json::to_value(r).ok())
                .unwrap_or(Value::Null),
        })
    }
}

/// Phase driver for workflow runs
pub struct Runner {
    registry: Arc<TaskRegistry>,
    options: RunOptions,
}

impl Runner {
    pub fn new(options: RunOptions) -> Self {
        Self {
            registry: Arc::new(TaskRegistry::builtin()),
            options,
        }
    }

    /// Use a registry carrying custom task types
    pub fn with_registry(registry: Arc<TaskRegistry>, options: RunOptions) -> Self {
        Self { registry, options }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Run a workflow document from YAML text
    pub async fn run_str(&self, yaml: &str, cancel: CancellationToken) -> RunOutcome {
        match Workflow::parse(yaml) {
            Ok(workflow) => self.run(workflow, cancel).await,
            Err(e) => RunOutcome::parse_failure(e),
        }
    }

    /// Run a workflow file from disk
    pub async fn run_file(&self, path: &str, cancel: CancellationToken) -> RunOutcome {
        let yaml = match tokio::fs::read_to_string(path).await {
            Ok(yaml) => yaml,
            Err(_) => {
                return RunOutcome::parse_failure(SkeinError::WorkflowNotFound {
                    path: path.to_string(),
                })
            }
        };
        self.run_str(&yaml, cancel).await
    }

    /// Phases 0-1 only: parse, normalize, validate, build graphs. Used by
    /// `skein validate` and as the front half of [`run`](Self::run).
    pub fn preflight(&self, workflow: &mut Workflow) -> RunOutcome {
        let mut outcome = RunOutcome::default();

        workflow.normalize(&self.registry);

        let mut validation_errors = workflow.validate();
        validation_errors.extend(self.registry.validate_all(workflow));
        if let Err(e) = ExecutorConfig::validated(
            self.options.dry_run,
            self.options.max_concurrency,
            self.mode(workflow),
        ) {
            validation_errors.push(e);
        }
        if !validation_errors.is_empty() {
            outcome.validation_errors = validation_errors;
            return outcome;
        }

        if let Err(e) = self.build_plan(workflow) {
            outcome.dependency_error = Some(e);
        }
        outcome
    }

    /// Run an already-parsed workflow
    pub async fn run(&self, mut workflow: Workflow, cancel: CancellationToken) -> RunOutcome {
        let mut outcome = self.preflight(&mut workflow);
        if !outcome.phases_ok() {
            return outcome;
        }

        // Preflight proved the plan builds and the config validates
        let plan = match self.build_plan(&workflow) {
            Ok(plan) => plan,
            Err(e) => {
                outcome.dependency_error = Some(e);
                return outcome;
            }
        };
        let config = match ExecutorConfig::validated(
            self.options.dry_run,
            self.options.max_concurrency,
            self.mode(&workflow),
        ) {
            Ok(config) => config,
            Err(e) => {
                outcome.validation_errors.push(e);
                return outcome;
            }
        };

        let ctx = match WorkflowContext::initialize(&workflow, &self.options.env_overrides).await {
            Ok(ctx) => Arc::new(ctx),
            Err(e) if e.is_validation() => {
                outcome.validation_errors.push(e);
                return outcome;
            }
            Err(e) => {
                outcome.execution_error = Some(e);
                return outcome;
            }
        };

        debug!(stats = ?plan.main.stats(), "execution plan ready");
        let scheduler = Scheduler::new(Arc::clone(&self.registry), config);
        let result = scheduler.execute(&workflow, &plan, ctx, &cancel).await;
        outcome.workflow_result = Some(result);
        outcome
    }

    /// Effective execution mode: CLI override beats the document
    fn mode(&self, workflow: &Workflow) -> ExecutionMode {
        self.options.mode.unwrap_or(workflow.mode)
    }

    /// Build the main graph and the hook graphs
    fn build_plan(&self, workflow: &Workflow) -> Result<ExecutionPlan, SkeinError> {
        let main = TaskGraph::build(&arcs(&workflow.tasks))?;
        let on_success = if workflow.on_success.is_empty() {
            None
        } else {
            Some(TaskGraph::build(&arcs(&workflow.on_success))?)
        };
        let on_failure = if workflow.on_failure.is_empty() {
            None
        } else {
            Some(TaskGraph::build(&arcs(&workflow.on_failure))?)
        };
        Ok(ExecutionPlan {
            main,
            on_success,
            on_failure,
        })
    }
}

fn arcs(tasks: &[TaskConfig]) -> Vec<Arc<TaskConfig>> {
    tasks.iter().cloned().map(Arc::new).collect()
}
