//! Execution results for tasks and workflows
//!
//! `TaskResult` is produced by exactly one worker, then published into the
//! context store and never mutated again. `WorkflowResult` is the aggregate
//! handed back to the caller, serializable for `--output json`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::ast::TaskConfig;

/// Status of a single task execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Warning,
    Failed,
    Skipped,
}

impl TaskStatus {
    /// Terminal statuses that count as "went through"
    pub fn is_ok(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Warning | TaskStatus::Skipped)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Warning => "warning",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of one task, including captured process output and timing
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub status: TaskStatus,
    pub message: String,
    /// Structured task output, addressable from templates as
    /// `.tasks.<id>.output.<key>`
    pub output: Map<String, Value>,
    pub stdout: String,
    pub stderr: String,
    pub return_code: Option<i32>,
    pub error: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Duration,
    pub attempt_count: u32,
}

impl TaskResult {
    /// Fresh pending result for a task about to be dispatched
    pub fn pending(config: &TaskConfig) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            task_type: config.task_type.clone().unwrap_or_default(),
            status: TaskStatus::Pending,
            message: String::new(),
            output: Map::new(),
            stdout: String::new(),
            stderr: String::new(),
            return_code: None,
            error: None,
            start_time: None,
            end_time: None,
            duration: Duration::ZERO,
            attempt_count: 0,
        }
    }

    pub fn success(config: &TaskConfig, message: impl Into<String>) -> Self {
        let mut r = Self::pending(config);
        r.status = TaskStatus::Success;
        r.message = message.into();
        r
    }

    pub fn failed(config: &TaskConfig, message: impl Into<String>) -> Self {
        let mut r = Self::pending(config);
        let message = message.into();
        r.status = TaskStatus::Failed;
        r.error = Some(message.clone());
        r.message = message;
        r
    }

    pub fn skipped(config: &TaskConfig, message: impl Into<String>) -> Self {
        let mut r = Self::pending(config);
        r.status = TaskStatus::Skipped;
        r.message = message.into();
        r
    }

    /// Stamp the start of execution
    pub fn mark_started(&mut self) {
        self.status = TaskStatus::Running;
        self.start_time = Some(Utc::now());
    }

    /// Stamp the end of execution and derive the duration
    pub fn mark_finished(&mut self) {
        let end = Utc::now();
        self.end_time = Some(end);
        if let Some(start) = self.start_time {
            self.duration = (end - start).to_std().unwrap_or(Duration::ZERO);
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, TaskStatus::Success | TaskStatus::Warning)
    }

    pub fn is_failed(&self) -> bool {
        self.status == TaskStatus::Failed
    }

    pub fn is_skipped(&self) -> bool {
        self.status == TaskStatus::Skipped
    }

    /// Attach a structured output entry
    pub fn with_output(mut self, key: impl Into<String>, value: Value) -> Self {
        self.output.insert(key.into(), value);
        self
    }
}

/// Aggregate status of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Success,
    PartialSuccess,
    Failed,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Success => "success",
            WorkflowStatus::PartialSuccess => "partial_success",
            WorkflowStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Aggregate result of one workflow invocation
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    pub name: String,
    pub status: WorkflowStatus,
    /// Task results keyed by canonical id (hooks included)
    pub tasks: Map<String, Value>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Duration,
    pub error: Option<String>,
    /// Snapshot of the workflow variables at completion
    pub variables: Map<String, Value>,
    /// Snapshot of the workflow metadata at completion
    pub metadata: Map<String, Value>,
    #[serde(skip)]
    results: Vec<TaskResult>,
}

impl WorkflowResult {
    pub fn running(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: WorkflowStatus::Running,
            tasks: Map::new(),
            start_time: Some(Utc::now()),
            end_time: None,
            duration: Duration::ZERO,
            error: None,
            variables: Map::new(),
            metadata: Map::new(),
            results: Vec::new(),
        }
    }

    /// Record a finished task result
    pub fn record(&mut self, result: TaskResult) {
        self.tasks.insert(
            result.id.clone(),
            serde_json::to_value(&result).unwrap_or(Value::Null),
        );
        self.results.push(result);
    }

    /// All recorded task results, in completion order
    pub fn task_results(&self) -> &[TaskResult] {
        &self.results
    }

    /// Look up a recorded result by canonical id
    pub fn task(&self, id: &str) -> Option<&TaskResult> {
        self.results.iter().find(|r| r.id == id)
    }

    /// Stamp the end of the run and derive the duration
    pub fn finish(&mut self, status: WorkflowStatus) {
        let end = Utc::now();
        self.end_time = Some(end);
        if let Some(start) = self.start_time {
            self.duration = (end - start).to_std().unwrap_or(Duration::ZERO);
        }
        self.status = status;
    }

    pub fn completed(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.is_failed()).count()
    }

    pub fn skipped(&self) -> usize {
        self.results.iter().filter(|r| r.is_skipped()).count()
    }
}
