//! Skein CLI - declarative DAG workflow runner

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use skein::ast::{ExecutionMode, Workflow};
use skein::dag::TaskGraph;
use skein::runner::{RunOptions, RunOutcome, Runner};
use skein::WorkflowStatus;

#[derive(Parser)]
#[command(name = "skein")]
#[command(about = "Skein - declarative DAG workflow runner")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow file
    Run {
        /// Path to the workflow YAML file
        file: String,

        /// Short-circuit side-effecting tasks to skipped
        #[arg(long)]
        dry_run: bool,

        /// Concurrency cap (1-256); 0 selects the default of 10
        #[arg(long, default_value_t = 0)]
        max_concurrency: usize,

        /// Force sequential execution regardless of the document's mode
        #[arg(long)]
        sequential: bool,

        /// Environment overrides, KEY=VALUE (repeatable)
        #[arg(short, long = "env")]
        env: Vec<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Validate a workflow file without running it
    Validate {
        /// Path to the workflow YAML file
        file: String,
    },

    /// Print the execution layers and resolver statistics
    Graph {
        /// Path to the workflow YAML file
        file: String,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file (ignore if not present)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Run {
            file,
            dry_run,
            max_concurrency,
            sequential,
            env,
            output,
        } => {
            let options = RunOptions {
                dry_run,
                max_concurrency,
                env_overrides: env,
                mode: sequential.then_some(ExecutionMode::Sequential),
            };
            run_workflow(&file, options, output).await
        }
        Commands::Validate { file } => validate_workflow(&file).await,
        Commands::Graph { file } => graph_workflow(&file).await,
    };

    std::process::exit(exit_code);
}

async fn run_workflow(file: &str, options: RunOptions, output: OutputFormat) -> i32 {
    let runner = Runner::new(options);
    let cancel = CancellationToken::new();

    // Ctrl-C trips the cancellation token; a second Ctrl-C kills the process
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "interrupt received, cancelling workflow...".yellow());
            ctrl_c_token.cancel();
        }
    });

    let outcome = runner.run_file(file, cancel).await;

    if matches!(output, OutputFormat::Json) {
        match serde_json::to_string_pretty(&outcome.to_json()) {
            Ok(rendered) => println!("{}", rendered),
            Err(e) => eprintln!("{} {}", "Error:".red().bold(), e),
        }
        return exit_code_for(&outcome);
    }

    if outcome.phase_error().is_some() {
        report_errors(&outcome);
        return exit_code_for(&outcome);
    }

    if let Some(result) = &outcome.workflow_result {
        println!(
            "  {} completed, {} failed, {} skipped ({:.1}s)",
            result.completed(),
            result.failed(),
            result.skipped(),
            result.duration.as_secs_f32()
        );
        if result.status == WorkflowStatus::PartialSuccess {
            println!(
                "{} optional tasks failed; workflow reported partial success",
                "⚠".yellow()
            );
        }
    }
    exit_code_for(&outcome)
}

async fn validate_workflow(file: &str) -> i32 {
    let runner = Runner::new(RunOptions::default());

    let yaml = match tokio::fs::read_to_string(file).await {
        Ok(yaml) => yaml,
        Err(e) => {
            eprintln!("{} cannot read {}: {}", "Error:".red().bold(), file, e);
            return 2;
        }
    };
    let mut workflow = match Workflow::parse(&yaml) {
        Ok(workflow) => workflow,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            return 2;
        }
    };

    let outcome = runner.preflight(&mut workflow);
    if outcome.phases_ok() {
        println!(
            "{} {} is valid ({} tasks)",
            "✓".green(),
            file,
            workflow.tasks.len()
        );
        0
    } else {
        report_errors(&outcome);
        2
    }
}

async fn graph_workflow(file: &str) -> i32 {
    let runner = Runner::new(RunOptions::default());

    let yaml = match tokio::fs::read_to_string(file).await {
        Ok(yaml) => yaml,
        Err(e) => {
            eprintln!("{} cannot read {}: {}", "Error:".red().bold(), file, e);
            return 2;
        }
    };
    let mut workflow = match Workflow::parse(&yaml) {
        Ok(workflow) => workflow,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            return 2;
        }
    };

    let outcome = runner.preflight(&mut workflow);
    if !outcome.phases_ok() {
        report_errors(&outcome);
        return 2;
    }

    let tasks: Vec<_> = workflow.tasks.iter().cloned().map(std::sync::Arc::new).collect();
    let graph = match TaskGraph::build(&tasks) {
        Ok(graph) => graph,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            return 2;
        }
    };

    println!("{} Execution plan for '{}':", "→".cyan(), workflow.name);
    for layer in graph.execution_layers() {
        let ids: Vec<&str> = layer.tasks.iter().map(|t| t.id.as_str()).collect();
        println!("  layer {}: {}", layer.index, ids.join(", "));
    }
    let stats = graph.stats();
    println!(
        "  {} tasks, {} edges, {} layers, max parallelism {}",
        stats.task_count, stats.edge_count, stats.layer_count, stats.max_parallelism
    );
    0
}

fn report_errors(outcome: &RunOutcome) {
    if let Some(e) = &outcome.parse_error {
        eprintln!("{} {}", "Error:".red().bold(), e);
    }
    if let Some(e) = &outcome.dependency_error {
        eprintln!("{} {}", "Error:".red().bold(), e);
    }
    for e in &outcome.validation_errors {
        eprintln!("{} {}", "Error:".red().bold(), e);
    }
    if let Some(e) = &outcome.execution_error {
        eprintln!("{} {}", "Error:".red().bold(), e);
    }
}

/// success / partial_success -> 0, workflow failed -> 1, phase errors -> 2
fn exit_code_for(outcome: &RunOutcome) -> i32 {
    if !outcome.phases_ok() {
        return 2;
    }
    match outcome.workflow_result.as_ref().map(|r| r.status) {
        Some(WorkflowStatus::Failed) => 1,
        _ => 0,
    }
}
