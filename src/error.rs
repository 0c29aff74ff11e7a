//! Error types with stable error codes
//!
//! Error code ranges:
//! - SKEIN-001..009: parse / workflow-file errors
//! - SKEIN-010..019: validation errors
//! - SKEIN-020..029: dependency / graph errors
//! - SKEIN-030..039: template errors
//! - SKEIN-040..049: task registry / task validation errors
//! - SKEIN-050..059: execution errors
//!
//! Every variant carries its code in the Display output so log lines and CLI
//! output are greppable without a lookup table.

use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SkeinError>;

#[derive(Error, Debug, Diagnostic)]
pub enum SkeinError {
    // ═══════════════════════════════════════════
    // PARSE ERRORS (001-009)
    // ═══════════════════════════════════════════
    #[error("[SKEIN-001] failed to parse workflow: {0}")]
    #[diagnostic(
        code(skein::yaml_parse),
        help("Check YAML syntax: indentation must be consistent, strings with special chars need quoting")
    )]
    YamlParse(#[from] serde_yaml::Error),

    #[error("[SKEIN-002] workflow file not found: {path}")]
    #[diagnostic(code(skein::workflow_not_found), help("Check the file path exists"))]
    WorkflowNotFound { path: String },

    #[error("[SKEIN-003] IO error: {0}")]
    #[diagnostic(code(skein::io), help("Check file path and permissions"))]
    Io(#[from] std::io::Error),

    // ═══════════════════════════════════════════
    // VALIDATION ERRORS (010-019)
    // ═══════════════════════════════════════════
    #[error("[SKEIN-010] workflow validation failed: {reason}")]
    #[diagnostic(
        code(skein::validation),
        help("Check workflow structure against the documented schema")
    )]
    Validation { reason: String },

    #[error("[SKEIN-011] duplicate task id '{id}'")]
    #[diagnostic(code(skein::duplicate_id), help("Task ids must be unique; rename one of the tasks"))]
    DuplicateTaskId { id: String },

    #[error("[SKEIN-012] duplicate task name '{name}'")]
    #[diagnostic(code(skein::duplicate_name), help("Task names must be unique within a workflow"))]
    DuplicateTaskName { name: String },

    #[error("[SKEIN-013] malformed environment override '{entry}' (expected KEY=VALUE)")]
    #[diagnostic(
        code(skein::env_override),
        help("Pass overrides as KEY=VALUE, e.g. --env REGION=eu-west-1")
    )]
    MalformedEnvOverride { entry: String },

    #[error("[SKEIN-014] register alias '{register}' on task '{task}' collides with an existing task id or name")]
    #[diagnostic(
        code(skein::register_collision),
        help("Pick a register name that is not already a task id or name")
    )]
    RegisterCollision { register: String, task: String },

    #[error("[SKEIN-015] invalid max_concurrency {value} (expected 1-256)")]
    #[diagnostic(
        code(skein::concurrency),
        help("Use a value between 1 and 256; 0 selects the default of 10")
    )]
    InvalidConcurrency { value: usize },

    #[error("[SKEIN-016] variable file error for '{path}': {reason}")]
    #[diagnostic(
        code(skein::variable_file),
        help("Variable files must be YAML mappings of name to value")
    )]
    VariableFile { path: String, reason: String },

    // ═══════════════════════════════════════════
    // DEPENDENCY ERRORS (020-029)
    // ═══════════════════════════════════════════
    #[error("[SKEIN-020] circular dependency detected: {cycle}")]
    #[diagnostic(code(skein::cycle), help("Remove circular depends_on references from your workflow"))]
    CycleDetected { cycle: String },

    #[error("[SKEIN-021] task '{task}' depends on unknown task '{reference}'")]
    #[diagnostic(
        code(skein::unknown_dependency),
        help("depends_on entries must match an existing task id or name")
    )]
    UnknownDependency { task: String, reference: String },

    #[error("[SKEIN-022] dependency graph inconsistent: {detail}")]
    #[diagnostic(code(skein::graph_internal))]
    GraphInconsistent { detail: String },

    // ═══════════════════════════════════════════
    // TEMPLATE ERRORS (030-039)
    // ═══════════════════════════════════════════
    #[error("[SKEIN-030] template parse error at offset {position}: {detail}")]
    #[diagnostic(
        code(skein::template_parse),
        help("Templates are {{ .vars.name }} expressions with matching delimiters")
    )]
    TemplateParse { position: usize, detail: String },

    #[error("[SKEIN-031] unknown template function '{name}'")]
    #[diagnostic(
        code(skein::template_function),
        help("See the documented function set: upper, lower, trim, split, join, date, env, ...")
    )]
    UnknownFunction { name: String },

    #[error("[SKEIN-032] missing key '{path}' in template")]
    #[diagnostic(
        code(skein::template_missing_key),
        help("Missing lookups are errors; declare the variable or use the env/default functions")
    )]
    MissingKey { path: String },

    #[error("[SKEIN-033] template error in {context}: {reason}")]
    #[diagnostic(code(skein::template))]
    Template { context: String, reason: String },

    // ═══════════════════════════════════════════
    // TASK ERRORS (040-049)
    // ═══════════════════════════════════════════
    #[error("[SKEIN-040] unknown task type '{task_type}' for task '{name}' ({id})")]
    #[diagnostic(
        code(skein::unknown_task_type),
        help("Set 'type:' explicitly or use a recognized config key (command, http, file, debug)")
    )]
    UnknownTaskType {
        id: String,
        name: String,
        task_type: String,
    },

    #[error("[SKEIN-041] task '{name}' ({task_type}): {reason}")]
    #[diagnostic(
        code(skein::task_config),
        help("Check the task's config block against its documented parameters")
    )]
    TaskInvalid {
        name: String,
        task_type: String,
        reason: String,
    },

    // ═══════════════════════════════════════════
    // EXECUTION ERRORS (050-059)
    // ═══════════════════════════════════════════
    #[error("[SKEIN-050] execution failed: {reason}")]
    #[diagnostic(code(skein::execution))]
    Execution { reason: String },

    #[error("[SKEIN-051] workflow cancelled")]
    #[diagnostic(code(skein::cancelled))]
    Cancelled,
}

impl SkeinError {
    /// Stable error code (e.g., "SKEIN-020")
    pub fn code(&self) -> &'static str {
        match self {
            Self::YamlParse(_) => "SKEIN-001",
            Self::WorkflowNotFound { .. } => "SKEIN-002",
            Self::Io(_) => "SKEIN-003",
            Self::Validation { .. } => "SKEIN-010",
            Self::DuplicateTaskId { .. } => "SKEIN-011",
            Self::DuplicateTaskName { .. } => "SKEIN-012",
            Self::MalformedEnvOverride { .. } => "SKEIN-013",
            Self::RegisterCollision { .. } => "SKEIN-014",
            Self::InvalidConcurrency { .. } => "SKEIN-015",
            Self::VariableFile { .. } => "SKEIN-016",
            Self::CycleDetected { .. } => "SKEIN-020",
            Self::UnknownDependency { .. } => "SKEIN-021",
            Self::GraphInconsistent { .. } => "SKEIN-022",
            Self::TemplateParse { .. } => "SKEIN-030",
            Self::UnknownFunction { .. } => "SKEIN-031",
            Self::MissingKey { .. } => "SKEIN-032",
            Self::Template { .. } => "SKEIN-033",
            Self::UnknownTaskType { .. } => "SKEIN-040",
            Self::TaskInvalid { .. } => "SKEIN-041",
            Self::Execution { .. } => "SKEIN-050",
            Self::Cancelled => "SKEIN-051",
        }
    }

    /// True for errors that belong in the validation slot of the result
    /// envelope rather than the execution slot.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::DuplicateTaskId { .. }
                | Self::DuplicateTaskName { .. }
                | Self::MalformedEnvOverride { .. }
                | Self::RegisterCollision { .. }
                | Self::InvalidConcurrency { .. }
                | Self::UnknownTaskType { .. }
                | Self::TaskInvalid { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code() {
        let err = SkeinError::CycleDetected {
            cycle: "a -> b -> a".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("[SKEIN-020]"));
        assert!(msg.contains("a -> b -> a"));
    }

    #[test]
    fn code_extraction() {
        assert_eq!(
            SkeinError::MissingKey {
                path: ".vars.x".into()
            }
            .code(),
            "SKEIN-032"
        );
        assert_eq!(SkeinError::Cancelled.code(), "SKEIN-051");
    }

    #[test]
    fn validation_classification() {
        assert!(SkeinError::DuplicateTaskId { id: "x".into() }.is_validation());
        assert!(SkeinError::MalformedEnvOverride { entry: "FOO".into() }.is_validation());
        assert!(!SkeinError::CycleDetected { cycle: "a -> a".into() }.is_validation());
        assert!(!SkeinError::Execution { reason: "boom".into() }.is_validation());
    }
}
