//! File operations task
//!
//! Operations: write, append, copy, delete, mkdir. Paths and content arrive
//! template-rendered.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::ast::TaskConfig;
use crate::context::WorkflowContext;
use crate::error::{Result, SkeinError};
use crate::result::{TaskResult, TaskStatus};

use super::Task;

const KEYS: &[&str] = &["file"];

const OPERATIONS: &[&str] = &["write", "append", "copy", "delete", "mkdir"];

pub struct FileTask;

impl FileTask {
    fn invalid(config: &TaskConfig, reason: impl Into<String>) -> SkeinError {
        SkeinError::TaskInvalid {
            name: config.name.clone(),
            task_type: "file".to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Task for FileTask {
    fn validate(&self, config: &TaskConfig) -> Result<()> {
        let Some(operation) = config.primary_str(KEYS) else {
            return Err(Self::invalid(config, "missing 'file' operation"));
        };
        if !OPERATIONS.contains(&operation) {
            return Err(Self::invalid(
                config,
                format!(
                    "unknown operation '{}' (expected one of: {})",
                    operation,
                    OPERATIONS.join(", ")
                ),
            ));
        }
        match operation {
            "copy" => {
                if config.config_str("from").is_none() || config.config_str("to").is_none() {
                    return Err(Self::invalid(config, "copy needs 'from' and 'to'"));
                }
            }
            _ => {
                if config.config_str("path").is_none() {
                    return Err(Self::invalid(
                        config,
                        format!("'{}' needs a 'path'", operation),
                    ));
                }
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

        if cancel.is_cancelled() {
            result.status = TaskStatus::Failed;
            result.message = "cancelled".to_string();
            result.error = Some("cancelled".to_string());
            result.mark_finished();
            return result;
        }

        let operation = config.primary_str(KEYS).unwrap_or_default().to_string();
        debug!(task = %config.id, %operation, "file operation");

        let outcome = match operation.as_str() {
            "write" | "append" => {
                let path = config.config_str("path").unwrap_or_default();
                let content = config.config_str("content").unwrap_or_default();
                let r = if operation == "append" {
                    use tokio::io::AsyncWriteExt;
                    match tokio::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(path)
                        .await
                    {
                        Ok(mut f) => f.write_all(content.as_bytes()).await,
                        Err(e) => Err(e),
                    }
                } else {
                    tokio::fs::write(path, content).await
                };
                r.map(|_| format!("{} {}", operation, path))
            }
            "copy" => {
                let from = config.config_str("from").unwrap_or_default();
                let to = config.config_str("to").unwrap_or_default();
                tokio::fs::copy(from, to)
                    .await
                    .map(|bytes| format!("copied {} bytes to {}", bytes, to))
            }
            "delete" => {
                let path = config.config_str("path").unwrap_or_default();
                let meta = tokio::fs::metadata(path).await;
                match meta {
                    Ok(m) if m.is_dir() => tokio::fs::remove_dir_all(path).await,
                    Ok(_) => tokio::fs::remove_file(path).await,
                    Err(e) => Err(e),
                }
                .map(|_| format!("deleted {}", path))
            }
            "mkdir" => {
                let path = config.config_str("path").unwrap_or_default();
                tokio::fs::create_dir_all(path)
                    .await
                    .map(|_| format!("created {}", path))
            }
            other => {
                result.status = TaskStatus::Failed;
                result.message = format!("unknown operation '{}'", other);
                result.error = Some(result.message.clone());
                result.mark_finished();
                return result;
            }
        };

        match outcome {
            Ok(message) => {
                result.status = TaskStatus::Success;
                result
                    .output
                    .insert("operation".to_string(), Value::String(operation));
                result.message = message;
            }
            Err(e) => {
                result.status = TaskStatus::Failed;
                result.message = format!("{} failed: {}", operation, e);
                result.error = Some(result.message.clone());
            }
        }

        result.mark_finished();
        result
    }
}
