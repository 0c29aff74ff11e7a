//! Shell command task
//!
//! Runs the command through the system shell (`sh -c`), capturing stdout,
//! stderr and the exit code. Cancellation kills the child process.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::ast::TaskConfig;
use crate::context::WorkflowContext;
use crate::error::{Result, SkeinError};
use crate::result::{TaskResult, TaskStatus};

use super::Task;

/// Config keys accepted for the command string
const KEYS: &[&str] = &["command", "shell", "cmd"];

pub struct CommandTask;

#[async_trait]
impl Task for CommandTask {
    fn validate(&self, config: &TaskConfig) -> Result<()> {
        match config.primary_str(KEYS) {
            Some(cmd) if !cmd.trim().is_empty() => {}
            _ => {
                return Err(SkeinError::TaskInvalid {
                    name: config.name.clone(),
                    task_type: "command".to_string(),
                    reason: "missing 'command' string".to_string(),
                })
            }
        }
        if let Some(cwd) = config.config.get("cwd") {
            if !cwd.is_string() {
                return Err(SkeinError::TaskInvalid {
                    name: config.name.clone(),
                    task_type: "command".to_string(),
                    reason: "'cwd' must be a string".to_string(),
                });
            }
        }
        Ok(())
    }

    fn supports_dry_run(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        config: &TaskConfig,
        _context: &WorkflowContext,
    ) -> TaskResult {
        let mut result = TaskResult::pending(config);
        result.mark_started();

        let Some(cmd) = config.primary_str(KEYS) else {
            result.status = TaskStatus::Failed;
            result.message = "missing 'command' string".to_string();
            result.error = Some(result.message.clone());
            result.mark_finished();
            return result;
        };

        debug!(task = %config.id, command = %cmd, "spawning shell command");

        let mut command = tokio::process::Command::new("sh");
        command.arg("-c").arg(cmd);
        if let Some(cwd) = config.config_str("cwd") {
            command.current_dir(cwd);
        }
        if let Some(Value::Object(env)) = config.config.get("env") {
            for (key, value) in env {
                if let Some(v) = value.as_str() {
                    command.env(key, v);
                }
            }
        }
        // Dropping the in-flight future on cancellation must reap the child
        command.kill_on_drop(true);

        tokio::select! {
            output = command.output() => match output {
                Ok(output) => {
                    result.stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                    result.stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                    result.return_code = output.status.code();
                    result
                        .output
                        .insert("exit_code".to_string(), Value::from(output.status.code()));
                    if output.status.success() {
                        result.status = TaskStatus::Success;
                        result.message = "command succeeded".to_string();
                    } else {
                        result.status = TaskStatus::Failed;
                        result.message = format!(
                            "command exited with code {}",
                            output.status.code().unwrap_or(-1)
                        );
                        result.error = Some(if result.stderr.trim().is_empty() {
                            result.message.clone()
                        } else {
                            result.stderr.trim().to_string()
                        });
                    }
                }
                Err(e) => {
                    result.status = TaskStatus::Failed;
                    result.message = format!("failed to spawn command: {}", e);
                    result.error = Some(result.message.clone());
                }
            },
            _ = cancel.cancelled() => {
                result.status = TaskStatus::Failed;
                result.message = "cancelled".to_string();
                result.error = Some("cancelled".to_string());
            }
        }

        result.mark_finished();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(yaml: &str) -> TaskConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn validate_requires_command() {
        let ok = config("name: t\nconfig: { command: 'echo hi' }\n");
        let missing = config("name: t\nconfig: {}\n");
        let blank = config("name: t\nconfig: { command: '  ' }\n");

        assert!(CommandTask.validate(&ok).is_ok());
        assert!(CommandTask.validate(&missing).is_err());
        assert!(CommandTask.validate(&blank).is_err());
    }

    #[tokio::test]
    async fn runs_and_captures_stdout() {
        let cfg = config("name: t\nconfig: { command: 'echo hello' }\n");
        let ctx = WorkflowContext::new();
        let result = CommandTask
            .execute(&CancellationToken::new(), &cfg, &ctx)
            .await;

        assert_eq!(result.status, TaskStatus::Success);
        assert_eq!(result.stdout.trim(), "hello");
        assert_eq!(result.return_code, Some(0));
        assert!(result.start_time.is_some() && result.end_time.is_some());
    }

    #[tokio::test]
    async fn nonzero_exit_is_failed() {
        let cfg = config("name: t\nconfig: { command: 'echo oops >&2; exit 3' }\n");
        let ctx = WorkflowContext::new();
        let result = CommandTask
            .execute(&CancellationToken::new(), &cfg, &ctx)
            .await;

        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.return_code, Some(3));
        assert!(result.message.contains("code 3"));
        assert_eq!(result.error.as_deref(), Some("oops"));
    }

    #[tokio::test]
    async fn shell_alias_key_works() {
        let cfg = config("name: t\nconfig: { shell: 'echo via-alias' }\n");
        let ctx = WorkflowContext::new();
        let result = CommandTask
            .execute(&CancellationToken::new(), &cfg, &ctx)
            .await;
        assert_eq!(result.stdout.trim(), "via-alias");
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_command() {
        let cfg = config("name: t\nconfig: { command: 'sleep 30' }\n");
        let ctx = WorkflowContext::new();
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let result = CommandTask.execute(&cancel, &cfg, &ctx).await;
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.message, "cancelled");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cwd_is_honored() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!("name: t\nconfig: {{ command: pwd, cwd: '{}' }}\n", dir.path().display());
        let cfg = config(&yaml);
        let ctx = WorkflowContext::new();
        let result = CommandTask
            .execute(&CancellationToken::new(), &cfg, &ctx)
            .await;
        assert!(result.stdout.trim().ends_with(
            dir.path().file_name().unwrap().to_str().unwrap()
        ));
    }
}
