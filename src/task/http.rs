//! HTTP request task
//!
//! One shared client across all invocations: connection pooling, bounded
//! timeouts, limited redirects.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::ast::TaskConfig;
use crate::context::WorkflowContext;
use crate::error::{Result, SkeinError};
use crate::result::{TaskResult, TaskStatus};

use super::Task;

/// Config keys accepted for the request URL
const KEYS: &[&str] = &["http", "fetch", "url"];

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD"];

pub struct HttpTask {
    client: reqwest::Client,
}

impl HttpTask {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(concat!("skein/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("default reqwest client configuration is valid");
        Self { client }
    }
}

impl Default for HttpTask {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Task for HttpTask {
    fn validate(&self, config: &TaskConfig) -> Result<()> {
        match config.primary_str(KEYS) {
            Some(url) if !url.trim().is_empty() => {}
            _ => {
                return Err(SkeinError::TaskInvalid {
                    name: config.name.clone(),
                    task_type: "http".to_string(),
                    reason: "missing request 'url'".to_string(),
                })
            }
        }
        if let Some(method) = config.config_str("method") {
            if !METHODS.contains(&method.to_ascii_uppercase().as_str()) {
                return Err(SkeinError::TaskInvalid {
                    name: config.name.clone(),
                    task_type: "http".to_string(),
                    reason: format!("unsupported method '{}'", method),
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

        let Some(url) = config.primary_str(KEYS) else {
            result.status = TaskStatus::Failed;
            result.message = "missing request 'url'".to_string();
            result.error = Some(result.message.clone());
            result.mark_finished();
            return result;
        };
        let method = config
            .config_str("method")
            .map(str::to_ascii_uppercase)
            .unwrap_or_else(|| "GET".to_string());

        debug!(task = %config.id, %method, %url, "sending http request");

        let mut request = match method.as_str() {
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "DELETE" => self.client.delete(url),
            "PATCH" => self.client.patch(url),
            "HEAD" => self.client.head(url),
            _ => self.client.get(url),
        };

        if let Some(Value::Object(headers)) = config.config.get("headers") {
            for (key, value) in headers {
                if let Some(v) = value.as_str() {
                    request = request.header(key, v);
                }
            }
        }
        if let Some(body) = config.config.get("body") {
            request = match body {
                Value::String(s) => request.body(s.clone()),
                other => request.json(other),
            };
        }

        let response = tokio::select! {
            response = request.send() => response,
            _ = cancel.cancelled() => {
                result.status = TaskStatus::Failed;
                result.message = "cancelled".to_string();
                result.error = Some("cancelled".to_string());
                result.mark_finished();
                return result;
            }
        };

        match response {
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                result
                    .output
                    .insert("status".to_string(), Value::from(status.as_u16()));
                if let Ok(json) = serde_json::from_str::<Value>(&body) {
                    result.output.insert("json".to_string(), json);
                }
                result.stdout = body;
                if status.is_success() {
                    result.status = TaskStatus::Success;
                    result.message = format!("{} {} -> {}", method, url, status.as_u16());
                } else {
                    result.status = TaskStatus::Failed;
                    result.message = format!("{} {} -> {}", method, url, status.as_u16());
                    result.error = Some(result.message.clone());
                }
            }
            Err(e) => {
                result.status = TaskStatus::Failed;
                result.message = format!("request failed: {}", e);
                result.error = Some(result.message.clone());
            }
        }

        result.mark_finished();
        result
    }
}
