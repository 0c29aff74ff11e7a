//! Task declaration types
//!
//! `TaskConfig` is the declarative shape of a task before execution: a name,
//! an optional type (inferred from config keys when omitted), a free-form
//! config mapping whose string leaves may carry templates, and scheduling
//! attributes (depends_on, when, retry, register).

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::util::parse_duration;

fn default_true() -> bool {
    true
}

/// One declared unit of work
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Unique id; auto-generated from the name when omitted
    #[serde(default)]
    pub id: String,

    /// Display name (required, unique within the workflow)
    pub name: String,

    /// Task type; inferred from the first recognized config key when omitted
    #[serde(default, rename = "type")]
    pub task_type: Option<String>,

    /// Free-form, task-type-specific parameters. String leaves are rendered
    /// against the workflow context immediately before dispatch.
    #[serde(default)]
    pub config: Map<String, Value>,

    /// Upstream task references (by id or name)
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Template expression gating execution; falsy result skips the task
    #[serde(default)]
    pub when: Option<String>,

    /// Whether a failure of this task fails the whole workflow
    #[serde(default = "default_true")]
    pub required: bool,

    /// Run even when an upstream required task has failed
    #[serde(default)]
    pub always_run: bool,

    /// Additional key under which the result is published
    #[serde(default)]
    pub register: Option<String>,

    /// Number of retries after the first failed attempt
    #[serde(default)]
    pub retry_count: u32,

    /// Pause between attempts ("500ms", "5s", "1m"); default none
    #[serde(default)]
    pub retry_delay: Option<String>,

    /// Per-task deadline; wraps the cancellation token
    #[serde(default)]
    pub timeout: Option<String>,
}

impl TaskConfig {
    /// Minimal config for building workflows programmatically (tests, hooks)
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            task_type: None,
            config: Map::new(),
            depends_on: Vec::new(),
            when: None,
            required: true,
            always_run: false,
            register: None,
            retry_count: 0,
            retry_delay: None,
            timeout: None,
        }
    }

    /// Parsed retry delay; zero when unset or unparseable
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
            .as_deref()
            .and_then(parse_duration)
            .unwrap_or(Duration::ZERO)
    }

    /// Parsed per-task deadline, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.as_deref().and_then(parse_duration)
    }

    /// String-valued config entry
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    /// First config value found under any of the given keys
    ///
    /// Built-in tasks accept their primary parameter under the type name or
    /// any of its aliases (`command:` / `shell:` / `cmd:`).
    pub fn primary_value(&self, keys: &[&str]) -> Option<&Value> {
        keys.iter().find_map(|k| self.config.get(*k))
    }

    /// Like [`primary_value`](Self::primary_value) but coerced to a string
    pub fn primary_str(&self, keys: &[&str]) -> Option<&str> {
        self.primary_value(keys).and_then(Value::as_str)
    }
}
