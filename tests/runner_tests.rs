//! End-to-end workflow execution tests
//!
//! Each test builds a workflow from YAML and drives it through the full
//! pipeline: parse, normalize, validate, resolve, execute.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use skein::runner::{RunOptions, RunOutcome, Runner};
use skein::{SkeinError, TaskStatus, WorkflowStatus};

async fn run(yaml: &str) -> RunOutcome {
    run_with(yaml, RunOptions::default()).await
}

async fn run_with(yaml: &str, options: RunOptions) -> RunOutcome {
    Runner::new(options)
        .run_str(yaml, CancellationToken::new())
        .await
}

// ═══════════════════════════════════════════════════════════════
// DIAMOND DEPENDENCY
// ═══════════════════════════════════════════════════════════════

#[tokio::test(flavor = "multi_thread")]
async fn diamond_runs_middle_layer_in_parallel() {
    let yaml = r#"
name: diamond
tasks:
  - name: a
    config: { command: "sleep 0.1" }
  - name: b
    depends_on: [a]
    config: { command: "sleep 0.1" }
  - name: c
    depends_on: [a]
    config: { command: "sleep 0.1" }
  - name: d
    depends_on: [b, c]
    config: { command: "sleep 0.1" }
"#;
    let started = Instant::now();
    let outcome = run_with(
        yaml,
        RunOptions {
            max_concurrency: 2,
            ..Default::default()
        },
    )
    .await;
    let elapsed = started.elapsed();

    let result = outcome.workflow_result.expect("workflow ran");
    assert_eq!(result.status, WorkflowStatus::Success);

    // Three layers of 100 ms each, not four sequential sleeps
    assert!(
        elapsed >= Duration::from_millis(280),
        "three layers cannot finish faster than 3 sleeps: {:?}",
        elapsed
    );
    assert!(
        elapsed < Duration::from_millis(390),
        "b and c should overlap: {:?}",
        elapsed
    );

    // Topological soundness: each edge's upstream ends before its
    // downstream starts
    let end = |id: &str| result.task(id).unwrap().end_time.unwrap();
    let start = |id: &str| result.task(id).unwrap().start_time.unwrap();
    for (up, down) in [("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")] {
        assert!(
            end(up) <= start(down),
            "{} must finish before {} starts",
            up,
            down
        );
    }
}

// ═══════════════════════════════════════════════════════════════
// CYCLE DETECTION
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn cycle_is_rejected_before_any_task_runs() {
    let marker = tempfile::tempdir().unwrap();
    let witness = marker.path().join("ran");
    let yaml = format!(
        r#"
name: cyclic
tasks:
  - name: x
    depends_on: [y]
    config: {{ command: "touch {}" }}
  - name: y
    depends_on: [x]
    config: {{ command: "touch {}" }}
"#,
        witness.display(),
        witness.display()
    );

    let outcome = run(&yaml).await;
    assert!(matches!(
        outcome.dependency_error,
        Some(SkeinError::CycleDetected { .. })
    ));
    assert!(outcome.workflow_result.is_none());
    assert!(!witness.exists(), "no task may run in a cyclic workflow");
}

// ═══════════════════════════════════════════════════════════════
// TEMPLATE FAILURES
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn missing_template_key_fails_only_that_task() {
    let yaml = r#"
name: templates
tasks:
  - name: broken
    required: false
    config: { debug: "{{ .vars.does_not_exist }}" }
  - name: independent
    config: { debug: "fine" }
"#;
    let outcome = run(yaml).await;
    let result = outcome.workflow_result.expect("workflow ran");

    let broken = result.task("broken").unwrap();
    assert_eq!(broken.status, TaskStatus::Failed);
    assert!(broken.message.contains("template evaluation"));

    let independent = result.task("independent").unwrap();
    assert_eq!(independent.status, TaskStatus::Success);

    // The failed task is optional, so the aggregate downgrades only
    assert_eq!(result.status, WorkflowStatus::PartialSuccess);
}

#[tokio::test]
async fn missing_key_on_required_task_fails_the_workflow() {
    let yaml = r#"
name: templates
tasks:
  - name: broken
    config: { debug: "{{ .vars.does_not_exist }}" }
"#;
    let result = run(yaml).await.workflow_result.expect("workflow ran");
    assert_eq!(result.status, WorkflowStatus::Failed);
}

// ═══════════════════════════════════════════════════════════════
// RETRIES
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn retry_until_success_counts_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let counter = dir.path().join("attempts");
    // Fails on attempts 1 and 2, succeeds on attempt 3
    let yaml = format!(
        r#"
name: flaky
tasks:
  - name: eventually
    retry_count: 2
    retry_delay: 50ms
    config:
      command: "n=$(cat {c} 2>/dev/null || echo 0); n=$((n+1)); echo $n > {c}; [ $n -ge 3 ]"
"#,
        c = counter.display()
    );

    let result = run(&yaml).await.workflow_result.expect("workflow ran");
    let task = result.task("eventually").unwrap();

    assert_eq!(task.status, TaskStatus::Success);
    assert_eq!(task.attempt_count, 3);
    assert!(
        task.duration >= Duration::from_millis(100),
        "two retry delays must be included in the duration: {:?}",
        task.duration
    );
    assert_eq!(result.status, WorkflowStatus::Success);
}

#[tokio::test]
async fn retries_exhausted_keeps_last_failure() {
    let yaml = r#"
name: hopeless
tasks:
  - name: always_fails
    retry_count: 2
    retry_delay: 10ms
    config: { command: "exit 1" }
"#;
    let result = run(yaml).await.workflow_result.expect("workflow ran");
    let task = result.task("always_fails").unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.attempt_count, 3);
    assert_eq!(result.status, WorkflowStatus::Failed);
}

// ═══════════════════════════════════════════════════════════════
// REQUIRED VS OPTIONAL FAILURES
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn required_failure_skips_downstream_and_fails_workflow() {
    let yaml = r#"
name: failures
tasks:
  - name: p
    config: { command: "true" }
  - name: q
    config: { command: "exit 1" }
  - name: s
    required: false
    config: { command: "exit 1" }
  - name: r
    depends_on: [q]
    config: { command: "true" }
"#;
    let result = run(yaml).await.workflow_result.expect("workflow ran");

    assert_eq!(result.task("p").unwrap().status, TaskStatus::Success);
    assert_eq!(result.task("q").unwrap().status, TaskStatus::Failed);
    assert_eq!(result.task("s").unwrap().status, TaskStatus::Failed);

    let downstream = result.task("r").unwrap();
    assert_eq!(downstream.status, TaskStatus::Skipped);
    assert_eq!(downstream.message, "dependency failed");

    assert_eq!(result.status, WorkflowStatus::Failed);
}

#[tokio::test]
async fn only_optional_failures_report_partial_success() {
    let yaml = r#"
name: optional
tasks:
  - name: fine
    config: { command: "true" }
  - name: shaky
    required: false
    config: { command: "exit 1" }
"#;
    let result = run(yaml).await.workflow_result.expect("workflow ran");
    assert_eq!(result.status, WorkflowStatus::PartialSuccess);
}

#[tokio::test]
async fn always_run_executes_despite_failed_dependency() {
    let yaml = r#"
name: cleanup
tasks:
  - name: q
    config: { command: "exit 1" }
  - name: cleanup
    depends_on: [q]
    always_run: true
    config: { command: "true" }
  - name: after_cleanup
    depends_on: [cleanup]
    config: { command: "true" }
"#;
    let result = run(yaml).await.workflow_result.expect("workflow ran");

    // always_run forces dispatch; the dependency chain still taints
    // everything downstream of the original failure
    assert_eq!(result.task("cleanup").unwrap().status, TaskStatus::Success);
    let after = result.task("after_cleanup").unwrap();
    assert_eq!(after.status, TaskStatus::Skipped);
    assert_eq!(after.message, "dependency failed");
    assert_eq!(result.status, WorkflowStatus::Failed);
}

// ═══════════════════════════════════════════════════════════════
// DRY RUN
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn dry_run_skips_file_task_without_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("does-not-exist-yet.txt");
    let yaml = format!(
        r#"
name: dry
tasks:
  - name: create file
    config:
      file: write
      path: "{}"
      content: "payload"
"#,
        path.display()
    );

    let outcome = run_with(
        &yaml,
        RunOptions {
            dry_run: true,
            ..Default::default()
        },
    )
    .await;
    let result = outcome.workflow_result.expect("workflow ran");

    let task = result.task("create_file").unwrap();
    assert_eq!(task.status, TaskStatus::Skipped);
    assert!(task.message.contains("Dry run"));
    assert!(!path.exists(), "dry run must not create the file");
}

#[tokio::test]
async fn dry_run_still_runs_tasks_without_dry_run_support() {
    let yaml = r#"
name: dry
tasks:
  - name: observer
    config: { debug: "still runs" }
"#;
    let outcome = run_with(
        yaml,
        RunOptions {
            dry_run: true,
            ..Default::default()
        },
    )
    .await;
    let result = outcome.workflow_result.expect("workflow ran");
    assert_eq!(result.task("observer").unwrap().status, TaskStatus::Success);
}

// ═══════════════════════════════════════════════════════════════
// CONCURRENCY CAP
// ═══════════════════════════════════════════════════════════════

#[tokio::test(flavor = "multi_thread")]
async fn concurrency_cap_serializes_a_wide_layer() {
    let tasks: String = (0..6)
        .map(|i| format!("  - name: w{}\n    config: {{ command: \"sleep 0.1\" }}\n", i))
        .collect();
    let yaml = format!("name: wide\ntasks:\n{}", tasks);

    // Cap 2: six 100 ms sleeps need at least three rounds
    let started = Instant::now();
    let outcome = run_with(
        &yaml,
        RunOptions {
            max_concurrency: 2,
            ..Default::default()
        },
    )
    .await;
    let capped = started.elapsed();
    assert_eq!(
        outcome.workflow_result.unwrap().status,
        WorkflowStatus::Success
    );
    assert!(
        capped >= Duration::from_millis(280),
        "cap of 2 must serialize six sleeps into >= 3 rounds: {:?}",
        capped
    );

    // Cap 6: all sleeps overlap
    let started = Instant::now();
    run_with(
        &yaml,
        RunOptions {
            max_concurrency: 6,
            ..Default::default()
        },
    )
    .await;
    let uncapped = started.elapsed();
    assert!(
        uncapped < Duration::from_millis(280),
        "cap of 6 should let all sleeps overlap: {:?}",
        uncapped
    );
}

// ═══════════════════════════════════════════════════════════════
// CONTEXT, TEMPLATES, DUAL KEYS
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn downstream_tasks_see_dependency_results() {
    let yaml = r#"
name: plumbing
vars:
  greeting: hello
tasks:
  - name: produce
    config: { command: "echo {{ .vars.greeting }}" }
  - name: consume
    depends_on: [produce]
    config: { command: "echo got:{{ .tasks.produce.stdout | trim }}" }
"#;
    let result = run(yaml).await.workflow_result.expect("workflow ran");
    assert_eq!(
        result.task("consume").unwrap().stdout.trim(),
        "got:hello"
    );
}

#[tokio::test]
async fn results_are_addressable_by_id_name_and_register() {
    let yaml = r#"
name: aliases
tasks:
  - name: Fetch the data
    register: payload
    config: { command: "echo 42" }
  - name: by_id
    depends_on: [fetch_the_data]
    config: { debug: "{{ .tasks.fetch_the_data.stdout | trim }}" }
  - name: by_name
    depends_on: ["Fetch the data"]
    config: { debug: "{{ .tasks.payload.stdout | trim }}" }
"#;
    let result = run(yaml).await.workflow_result.expect("workflow ran");
    assert_eq!(result.status, WorkflowStatus::Success);
    assert_eq!(result.task("by_id").unwrap().stdout, "42");
    assert_eq!(result.task("by_name").unwrap().stdout, "42");
}

#[tokio::test]
async fn when_condition_skips_without_failing() {
    let yaml = r#"
name: gated
vars:
  deploy: "false"
tasks:
  - name: maybe deploy
    when: "{{ .vars.deploy }}"
    config: { command: "exit 1" }
  - name: always
    config: { command: "true" }
"#;
    let result = run(yaml).await.workflow_result.expect("workflow ran");
    let gated = result.task("maybe_deploy").unwrap();
    assert_eq!(gated.status, TaskStatus::Skipped);
    assert_eq!(result.status, WorkflowStatus::Success);
}

// ═══════════════════════════════════════════════════════════════
// SEQUENTIAL MODE
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn sequential_mode_respects_topological_order() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("order.log");
    let yaml = format!(
        r#"
name: strict
mode: sequential
tasks:
  - name: first
    config: {{ command: "echo first >> {log}" }}
  - name: second
    depends_on: [first]
    config: {{ command: "echo second >> {log}" }}
  - name: third
    depends_on: [second]
    config: {{ command: "echo third >> {log}" }}
"#,
        log = log.display()
    );

    let result = run(&yaml).await.workflow_result.expect("workflow ran");
    assert_eq!(result.status, WorkflowStatus::Success);
    assert_eq!(
        std::fs::read_to_string(&log).unwrap(),
        "first\nsecond\nthird\n"
    );
}

// ═══════════════════════════════════════════════════════════════
// HOOKS
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn on_failure_hook_runs_and_does_not_flip_status() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("notified");
    let yaml = format!(
        r#"
name: hooked
tasks:
  - name: boom
    config: {{ command: "exit 1" }}
on_failure:
  - name: notify
    config: {{ command: "touch {}" }}
on_success:
  - name: celebrate
    config: {{ command: "echo nope" }}
"#,
        marker.display()
    );

    let result = run(&yaml).await.workflow_result.expect("workflow ran");
    assert_eq!(result.status, WorkflowStatus::Failed);
    assert!(marker.exists(), "on_failure hook must run");
    assert_eq!(result.task("notify").unwrap().status, TaskStatus::Success);
    assert!(result.task("celebrate").is_none(), "on_success must not run");
}

#[tokio::test]
async fn on_success_hook_failure_keeps_aggregate_success() {
    let yaml = r#"
name: hooked
tasks:
  - name: fine
    config: { command: "true" }
on_success:
  - name: fragile hook
    config: { command: "exit 1" }
"#;
    let result = run(yaml).await.workflow_result.expect("workflow ran");
    assert_eq!(result.task("fragile_hook").unwrap().status, TaskStatus::Failed);
    assert_eq!(result.status, WorkflowStatus::Success);
}

// ═══════════════════════════════════════════════════════════════
// CANCELLATION
// ═══════════════════════════════════════════════════════════════

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_interrupts_running_tasks_and_fails_the_workflow() {
    let yaml = r#"
name: cancellable
tasks:
  - name: slow
    config: { command: "sleep 30" }
  - name: after
    depends_on: [slow]
    config: { command: "true" }
"#;
    let cancel = CancellationToken::new();
    let trip = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trip.cancel();
    });

    let started = Instant::now();
    let outcome = Runner::new(RunOptions::default()).run_str(yaml, cancel).await;
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "cancellation must interrupt the sleep promptly"
    );

    let result = outcome.workflow_result.expect("workflow ran");
    let slow = result.task("slow").unwrap();
    assert_eq!(slow.status, TaskStatus::Failed);
    assert_eq!(slow.message, "cancelled");
    assert_eq!(result.task("after").unwrap().status, TaskStatus::Skipped);
    assert_eq!(result.status, WorkflowStatus::Failed);
}

#[tokio::test(flavor = "multi_thread")]
async fn per_task_timeout_fails_only_that_task() {
    let yaml = r#"
name: deadline
tasks:
  - name: too slow
    timeout: 100ms
    required: false
    config: { command: "sleep 30" }
  - name: quick
    config: { command: "true" }
"#;
    let started = Instant::now();
    let result = run(yaml).await.workflow_result.expect("workflow ran");
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_eq!(result.task("too_slow").unwrap().status, TaskStatus::Failed);
    assert_eq!(result.task("quick").unwrap().status, TaskStatus::Success);
    assert_eq!(result.status, WorkflowStatus::PartialSuccess);
}
