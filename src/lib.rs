//! # Skein
//!
//! Declarative workflow engine: a YAML document describes named tasks with
//! explicit dependencies; skein resolves them into a directed acyclic
//! execution graph, renders every task's configuration against a shared
//! template context, and runs the graph with bounded parallelism.
//!
//! ## Architecture
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`ast`] | Workflow model: parsing, normalization, validation |
//! | [`dag`] | Dependency resolver: cycle detection, execution layers |
//! | [`context`] | Shared state: environment, variables, task results |
//! | [`template`] | `{{ ... }}` expression evaluation |
//! | [`task`] | Task contract, registry, built-in task types |
//! | [`runner`] | Scheduler, retries, cancellation, result envelope |
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use skein::runner::{RunOptions, Runner};
//! use tokio_util::sync::CancellationToken;
//!
//! let yaml = r#"
//! name: release
//! vars:
//!   version: "1.4.0"
//! tasks:
//!   - name: build
//!     config: { command: "make build VERSION={{ .vars.version }}" }
//!   - name: package
//!     depends_on: [build]
//!     config: { command: "make package" }
//! "#;
//!
//! let runner = Runner::new(RunOptions::default());
//! let outcome = runner.run_str(yaml, CancellationToken::new()).await;
//! if let Some(result) = outcome.workflow_result {
//!     println!("{}: {}", result.name, result.status);
//! }
//! ```
//!
//! ## Execution model
//!
//! Tasks within one layer may run concurrently, capped by a global
//! semaphore (`max_concurrency`, default 10). Layer boundaries are strict
//! barriers, so a task's templates always see every dependency's published
//! result. A failed required task fails the workflow and skips its
//! dependents ("dependency failed") but independent branches keep running;
//! non-required failures downgrade the aggregate to `partial_success`.

pub mod ast;
pub mod context;
pub mod dag;
pub mod error;
pub mod result;
pub mod runner;
pub mod task;
pub mod template;
pub mod util;

pub use ast::{ExecutionMode, TaskConfig, Workflow};
pub use context::WorkflowContext;
pub use dag::{ExecutionLayer, GraphStats, TaskGraph, TaskNode};
pub use error::{Result, SkeinError};
pub use result::{TaskResult, TaskStatus, WorkflowResult, WorkflowStatus};
pub use runner::{ExecutorConfig, RunOptions, RunOutcome, Runner};
pub use task::{Task, TaskRegistry};
