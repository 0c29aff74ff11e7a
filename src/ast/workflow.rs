//! Workflow model
//!
//! The immutable in-memory representation of a parsed workflow document:
//! tasks, declared environment and variables, execution mode, and the
//! `on_success` / `on_failure` hook lists. The YAML front-end hands the raw
//! parse here; `normalize` and `validate` bring it into the invariants the
//! resolver and scheduler rely on.

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{Result, SkeinError};
use crate::task::TaskRegistry;

use super::task::TaskConfig;

/// Parallel (layered) or sequential (topological order) dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Parallel,
    Sequential,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Parallel => write!(f, "parallel"),
            ExecutionMode::Sequential => write!(f, "sequential"),
        }
    }
}

/// Root workflow structure
#[derive(Debug, Clone, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Declared environment entries; values are template-rendered at init
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Paths to YAML variable files, merged in order (later overrides earlier)
    #[serde(default)]
    pub variable_files: Vec<String>,
    /// Workflow variables; top-level string values are template-rendered
    #[serde(default)]
    pub vars: Map<String, Value>,
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
    /// Hook tasks run after the main graph when it succeeded
    #[serde(default)]
    pub on_success: Vec<TaskConfig>,
    /// Hook tasks run after the main graph when it failed
    #[serde(default)]
    pub on_failure: Vec<TaskConfig>,
}

impl Workflow {
    /// Parse a workflow document from YAML
    pub fn parse(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Fill derived fields: missing ids from names, task types from config
    /// keys. Runs over main tasks and both hook lists.
    pub fn normalize(&mut self, registry: &TaskRegistry) {
        let mut index = 0usize;
        for task in self.all_tasks_mut() {
            if task.id.is_empty() {
                let slug = slugify(&task.name);
                task.id = if slug.is_empty() {
                    format!("task_{}", index)
                } else {
                    slug
                };
            }
            if task.task_type.is_none() {
                // First recognized config key wins, in document order
                task.task_type = task
                    .config
                    .keys()
                    .find_map(|key| registry.resolve_type(key))
                    .map(str::to_string);
            }
            index += 1;
        }
    }

    /// Structural validation of the normalized form
    ///
    /// Returns every problem found rather than stopping at the first, so the
    /// caller can report them as a batch.
    pub fn validate(&self) -> Vec<SkeinError> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push(SkeinError::Validation {
                reason: "workflow name must not be empty".to_string(),
            });
        }
        if self.tasks.is_empty() {
            errors.push(SkeinError::Validation {
                reason: "workflow declares no tasks".to_string(),
            });
        }

        let mut ids: HashSet<&str> = HashSet::new();
        let mut names: HashSet<&str> = HashSet::new();
        for task in self.all_tasks() {
            if task.name.trim().is_empty() {
                errors.push(SkeinError::Validation {
                    reason: format!("task '{}' has an empty name", task.id),
                });
            }
            if !ids.insert(&task.id) {
                errors.push(SkeinError::DuplicateTaskId {
                    id: task.id.clone(),
                });
            }
            if !names.insert(&task.name) {
                errors.push(SkeinError::DuplicateTaskName {
                    name: task.name.clone(),
                });
            }
        }

        // depends_on references resolve within the task list they belong to;
        // hook graphs are independent of the main graph.
        for group in [&self.tasks, &self.on_success, &self.on_failure] {
            let known: HashSet<&str> = group
                .iter()
                .flat_map(|t| [t.id.as_str(), t.name.as_str()])
                .collect();
            for task in group {
                for dep in &task.depends_on {
                    if !known.contains(dep.as_str()) {
                        errors.push(SkeinError::UnknownDependency {
                            task: task.id.clone(),
                            reference: dep.clone(),
                        });
                    }
                }
            }
        }

        // register aliases must not shadow another task's id or name;
        // aliasing the task itself is harmless (same key, same result)
        for task in self.all_tasks() {
            if let Some(register) = &task.register {
                let collides = self
                    .all_tasks()
                    .any(|t| t.id != task.id && (t.id == *register || t.name == *register));
                if collides {
                    errors.push(SkeinError::RegisterCollision {
                        register: register.clone(),
                        task: task.id.clone(),
                    });
                }
            }
        }

        errors
    }

    /// Main tasks followed by both hook lists
    pub fn all_tasks(&self) -> impl Iterator<Item = &TaskConfig> {
        self.tasks
            .iter()
            .chain(self.on_success.iter())
            .chain(self.on_failure.iter())
    }

    fn all_tasks_mut(&mut self) -> impl Iterator<Item = &mut TaskConfig> {
        self.tasks
            .iter_mut()
            .chain(self.on_success.iter_mut())
            .chain(self.on_failure.iter_mut())
    }

    /// Look up a main task by id or name
    pub fn get_task(&self, key: &str) -> Option<&TaskConfig> {
        self.tasks.iter().find(|t| t.id == key || t.name == key)
    }
}

/// Snake-case a task name into an id: lowercase, word separators become
/// underscores, everything else non-alphanumeric is stripped.
fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(ch.to_ascii_lowercase());
        } else if ch == ' ' || ch == '-' || ch == '_' {
            pending_sep = true;
        }
    }
    out
}
