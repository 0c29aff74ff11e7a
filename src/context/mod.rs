//! Context store
//!
//! Shared state of one workflow invocation: the process environment
//! snapshot, workflow variables, workflow metadata, and the results of
//! completed tasks. Template evaluation for every task reads from here.
//!
//! Concurrency discipline:
//! - Environment, variables and metadata are written only during
//!   [`WorkflowContext::initialize`], before any task runs. The mutating
//!   methods take `&mut self`, so sharing the context behind an `Arc`
//!   freezes them for the whole execution window.
//! - Task results are append-only through [`WorkflowContext::publish`];
//!   the `DashMap` serializes writers while readers stay lock-free and see
//!   a stable snapshot per lookup. A published result is never mutated.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::ast::Workflow;
use crate::error::{Result, SkeinError};
use crate::result::TaskResult;
use crate::template::{self, Scope};

/// Bounded fixed point for templates among declared env/var entries
const MAX_RESOLVE_PASSES: usize = 5;

/// Shared, concurrently-readable state of one workflow run
#[derive(Debug, Default)]
pub struct WorkflowContext {
    environment: BTreeMap<String, String>,
    variables: Map<String, Value>,
    tasks: DashMap<Arc<str>, Arc<TaskResult>>,
    metadata: Map<String, Value>,
}

impl WorkflowContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// One-shot initialization protocol, run before execution begins:
    /// process env snapshot, declared environment (with bounded template
    /// convergence), `KEY=VALUE` overrides, variable files, declared
    /// variables, workflow metadata.
    pub async fn initialize(workflow: &Workflow, env_overrides: &[String]) -> Result<Self> {
        let mut ctx = Self::new();

        for (key, value) in std::env::vars() {
            ctx.environment.insert(key, value);
        }

        ctx.apply_declared_environment(&workflow.environment);
        ctx.apply_env_overrides(env_overrides)?;
        ctx.load_variable_files(&workflow.variable_files).await?;
        ctx.apply_declared_variables(&workflow.vars);
        ctx.set_workflow_metadata(workflow);

        debug!(
            env = ctx.environment.len(),
            vars = ctx.variables.len(),
            "context initialized"
        );
        Ok(ctx)
    }

    /// Declared environment entries may reference each other; resolve with
    /// up to [`MAX_RESOLVE_PASSES`] passes, storing stragglers verbatim.
    fn apply_declared_environment(&mut self, declared: &BTreeMap<String, String>) {
        let mut pending: Vec<(&String, &String)> = declared.iter().collect();
        for _pass in 0..MAX_RESOLVE_PASSES {
            if pending.is_empty() {
                break;
            }
            let mut unresolved = Vec::new();
            for (key, raw) in pending {
                match template::evaluate(raw, self) {
                    Ok(rendered) => {
                        self.environment.insert(key.clone(), rendered);
                    }
                    Err(_) => unresolved.push((key, raw)),
                }
            }
            pending = unresolved;
        }
        for (key, raw) in pending {
            debug!(key = %key, "environment entry did not converge, storing verbatim");
            self.environment.insert(key.clone(), raw.clone());
        }
    }

    /// `KEY=VALUE` command-line overrides
    fn apply_env_overrides(&mut self, overrides: &[String]) -> Result<()> {
        for entry in overrides {
            let Some((key, value)) = entry.split_once('=') else {
                return Err(SkeinError::MalformedEnvOverride {
                    entry: entry.clone(),
                });
            };
            if key.is_empty() {
                return Err(SkeinError::MalformedEnvOverride {
                    entry: entry.clone(),
                });
            }
            self.environment.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    /// Load YAML variable files; paths are template-evaluated first, later
    /// files override earlier ones key by key.
    async fn load_variable_files(&mut self, paths: &[String]) -> Result<()> {
        for raw_path in paths {
            let path = template::evaluate(raw_path, self)?;
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| SkeinError::VariableFile {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
            let loaded: Map<String, Value> =
                serde_yaml::from_str(&content).map_err(|e| SkeinError::VariableFile {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
            for (key, value) in loaded {
                self.variables.insert(key, value);
            }
        }
        Ok(())
    }

    /// Declared variables: string values are template-rendered with the same
    /// bounded convergence as the environment; other types pass through.
    fn apply_declared_variables(&mut self, declared: &Map<String, Value>) {
        let mut pending: Vec<(&String, &str)> = Vec::new();
        for (key, value) in declared {
            match value {
                Value::String(raw) => pending.push((key, raw)),
                other => {
                    self.variables.insert(key.clone(), other.clone());
                }
            }
        }

        for _pass in 0..MAX_RESOLVE_PASSES {
            if pending.is_empty() {
                break;
            }
            let mut unresolved = Vec::new();
            for (key, raw) in pending {
                match template::evaluate(raw, self) {
                    Ok(rendered) => {
                        self.variables.insert(key.clone(), Value::String(rendered));
                    }
                    Err(_) => unresolved.push((key, raw)),
                }
            }
            pending = unresolved;
        }
        for (key, raw) in pending {
            debug!(key = %key, "variable did not converge, storing verbatim");
            self.variables
                .insert(key.clone(), Value::String(raw.to_string()));
        }
    }

    fn set_workflow_metadata(&mut self, workflow: &Workflow) {
        self.metadata.insert(
            "workflow".to_string(),
            json!({
                "name": workflow.name,
                "version": workflow.version,
                "description": workflow.description,
                "mode": workflow.mode.to_string(),
                "task_count": workflow.tasks.len(),
            }),
        );
        self.metadata.insert(
            "run_id".to_string(),
            Value::String(uuid::Uuid::new_v4().to_string()),
        );
    }

    // ─────────────────────────────────────────────────────────────
    // Task results (the only writers during execution)
    // ─────────────────────────────────────────────────────────────

    /// Publish a completed task result under its id, its name (when
    /// different), and an optional register alias. The result is immutable
    /// from here on.
    pub fn publish(&self, result: TaskResult, register: Option<&str>) {
        let result = Arc::new(result);
        self.tasks
            .insert(Arc::from(result.id.as_str()), Arc::clone(&result));
        if result.name != result.id {
            self.tasks
                .insert(Arc::from(result.name.as_str()), Arc::clone(&result));
        }
        if let Some(alias) = register {
            self.tasks.insert(Arc::from(alias), result);
        }
    }

    /// Look up a published result by id, name, or register alias
    pub fn task_result(&self, key: &str) -> Option<Arc<TaskResult>> {
        self.tasks.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn has_task_result(&self, key: &str) -> bool {
        self.tasks.contains_key(key)
    }

    // ─────────────────────────────────────────────────────────────
    // Frozen maps
    // ─────────────────────────────────────────────────────────────

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Set a variable; `&mut self` keeps this outside the executing-tasks
    /// window (the scheduler holds the context behind an `Arc`).
    pub fn set_variable(&mut self, key: impl Into<String>, value: Value) {
        self.variables.insert(key.into(), value);
    }

    /// Set an environment entry; same window restriction as
    /// [`set_variable`](Self::set_variable).
    pub fn set_environment(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.environment.insert(key.into(), value.into());
    }

    /// Deep copy for isolated sub-runs; the clone shares nothing with the
    /// original.
    pub fn clone_deep(&self) -> Self {
        let tasks = DashMap::with_capacity(self.tasks.len());
        for entry in self.tasks.iter() {
            tasks.insert(
                Arc::from(entry.key().as_ref()),
                Arc::new(entry.value().as_ref().clone()),
            );
        }
        Self {
            environment: self.environment.clone(),
            variables: self.variables.clone(),
            tasks,
            metadata: self.metadata.clone(),
        }
    }
}

impl Scope for WorkflowContext {
    fn resolve(&self, path: &[String]) -> Option<Value> {
        let (root, rest) = path.split_first()?;
        match root.as_str() {
            "env" => match rest {
                [] => Some(Value::Object(
                    self.environment
                        .iter()
                        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                        .collect(),
                )),
                [key] => self.environment.get(key).cloned().map(Value::String),
                _ => None,
            },
            "vars" => match rest {
                [] => Some(Value::Object(self.variables.clone())),
                _ => walk(&Value::Object(self.variables.clone()), rest),
            },
            "tasks" => {
                let (key, fields) = rest.split_first()?;
                let result = self.task_result(key)?;
                let value = serde_json::to_value(result.as_ref()).ok()?;
                walk(&value, fields)
            }
            "workflow" => {
                let workflow = self.metadata.get("workflow")?;
                walk(workflow, rest)
            }
            "metadata" => match rest {
                [] => Some(Value::Object(self.metadata.clone())),
                _ => walk(&Value::Object(self.metadata.clone()), rest),
            },
            _ => None,
        }
    }
}

/// Traverse a value by path segments (object keys or array indices)
fn walk(value: &Value, path: &[String]) -> Option<Value> {
    let mut current = value;
    for segment in path {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}
