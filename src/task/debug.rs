//! Debug task: records a rendered message
//!
//! Pure observation, so it runs even under dry-run.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::ast::TaskConfig;
use crate::context::WorkflowContext;
use crate::error::Result;
use crate::result::{TaskResult, TaskStatus};

use super::Task;

const KEYS: &[&str] = &["debug", "print", "echo", "message"];

pub struct DebugTask;

#[async_trait]
impl Task for DebugTask {
    fn validate(&self, _config: &TaskConfig) -> Result<()> {
        // Anything renders; a missing message just prints empty
        Ok(())
    }

    fn supports_dry_run(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        _cancel: &CancellationToken,
        config: &TaskConfig,
        _context: &WorkflowContext,
    ) -> TaskResult {
        let mut result = TaskResult::pending(config);
        result.mark_started();

        let message = match config.primary_value(KEYS) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => serde_json::to_string_pretty(other).unwrap_or_default(),
            None => String::new(),
        };
        info!(task = %config.id, "{}", message);

        result.stdout = message.clone();
        result
            .output
            .insert("message".to_string(), Value::String(message));
        result.status = TaskStatus::Success;
        result.message = "debug output recorded".to_string();
        result.mark_finished();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(yaml: &str) -> TaskConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[tokio::test]
    async fn records_message() {
        let cfg = config("name: t\nconfig: { debug: 'state of the world' }\n");
        let ctx = WorkflowContext::new();
        let result = DebugTask
            .execute(&CancellationToken::new(), &cfg, &ctx)
            .await;

        assert_eq!(result.status, TaskStatus::Success);
        assert_eq!(result.stdout, "state of the world");
        assert_eq!(result.output["message"], "state of the world");
    }

    #[tokio::test]
    async fn structured_message_is_pretty_printed() {
        let cfg = config("name: t\nconfig: { debug: { nested: [1, 2] } }\n");
        let ctx = WorkflowContext::new();
        let result = DebugTask
            .execute(&CancellationToken::new(), &cfg, &ctx)
            .await;
        assert!(result.stdout.contains("nested"));
    }

    #[test]
    fn does_not_support_dry_run_short_circuit() {
        assert!(!DebugTask.supports_dry_run());
    }
}
