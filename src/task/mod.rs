//! Task contract and registry
//!
//! A task type is a value implementing [`Task`]: pure structural validation,
//! a dry-run capability flag, and an async execute that must honor
//! cancellation and always come back with a [`TaskResult`] (never a panic or
//! an error type — internal failures are encoded as `status: failed`).
//!
//! The [`TaskRegistry`] maps type names and aliases to shared
//! implementations. It is populated once at process start; custom types may
//! be registered before execution but not during (registration takes
//! `&mut self`, execution holds the registry behind an `Arc`).

mod command;
mod debug;
mod file;
mod http;

use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;

use crate::ast::{TaskConfig, Workflow};
use crate::context::WorkflowContext;
use crate::error::{Result, SkeinError};
use crate::result::TaskResult;

pub use command::CommandTask;
pub use debug::DebugTask;
pub use file::FileTask;
pub use http::HttpTask;

/// One executable task type
#[async_trait]
pub trait Task: Send + Sync {
    /// Structural check of the config; pure, no I/O, no side effects
    fn validate(&self, config: &TaskConfig) -> Result<()>;

    /// Whether dry-run mode short-circuits this type to `skipped`
    fn supports_dry_run(&self) -> bool;

    /// Perform the task's effect
    ///
    /// The config arrives with templates already rendered. Implementations
    /// must watch the cancellation token and return promptly when it trips.
    async fn execute(
        &self,
        cancel: &CancellationToken,
        config: &TaskConfig,
        context: &WorkflowContext,
    ) -> TaskResult;
}

/// Name-to-implementation map for task types
#[derive(Default)]
pub struct TaskRegistry {
    implementations: FxHashMap<String, Arc<dyn Task>>,
    /// alias (including the canonical name itself) -> canonical name
    aliases: FxHashMap<String, String>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in task types
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("command", &["shell", "cmd"], Arc::new(CommandTask));
        registry.register("http", &["fetch"], Arc::new(HttpTask::new()));
        registry.register("file", &[], Arc::new(FileTask));
        registry.register("debug", &["print", "echo"], Arc::new(DebugTask));
        registry
    }

    /// Register a task type under its canonical name plus aliases
    pub fn register(&mut self, name: &str, aliases: &[&str], implementation: Arc<dyn Task>) {
        self.implementations
            .insert(name.to_string(), implementation);
        self.aliases.insert(name.to_string(), name.to_string());
        for alias in aliases {
            self.aliases.insert(alias.to_string(), name.to_string());
        }
    }

    /// Look up an implementation by type name or alias
    pub fn get(&self, type_name: &str) -> Option<Arc<dyn Task>> {
        let canonical = self.aliases.get(type_name)?;
        self.implementations.get(canonical).cloned()
    }

    /// Canonical type name for a recognized key (used for type inference)
    pub fn resolve_type(&self, key: &str) -> Option<&str> {
        self.aliases.get(key).map(String::as_str)
    }

    /// Validate every task in the workflow (main tasks and hooks), returning
    /// all problems at once. Unknown types carry the task's id, name, type.
    pub fn validate_all(&self, workflow: &Workflow) -> Vec<SkeinError> {
        let mut errors = Vec::new();
        for task in workflow.all_tasks() {
            let type_name = task.task_type.as_deref().unwrap_or("");
            match self.get(type_name) {
                None => errors.push(SkeinError::UnknownTaskType {
                    id: task.id.clone(),
                    name: task.name.clone(),
                    task_type: type_name.to_string(),
                }),
                Some(implementation) => {
                    if let Err(e) = implementation.validate(task) {
                        errors.push(e);
                    }
                }
            }
        }
        errors
    }
}
