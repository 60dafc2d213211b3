//! Log tailing through `JobExecutor::logs` and `tail_job_logs`.

use narwhal::{ExecutionScope, ExecutionStatus, Output, OutputKind};
use narwhal_testkit::{Harness, execution, line_entry, pod, result_entry, runner_log};
use tokio::sync::mpsc;

async fn drain(mut rx: mpsc::Receiver<Output>) -> Vec<Output> {
    let mut entries = Vec::new();
    while let Some(entry) = rx.recv().await {
        entries.push(entry);
    }
    entries
}

#[tokio::test(start_paused = true)]
async fn running_pod_streams_parsed_entries_in_order() {
    let harness = Harness::new();
    let exec = execution("e1");
    harness.seed(
        &exec,
        "Running",
        &runner_log(&[
            line_entry("starting"),
            "plain text output".to_string(),
            result_entry(ExecutionStatus::Passed, ""),
        ]),
    );

    let scope = ExecutionScope::new();
    let entries = drain(harness.executor.logs("e1", &scope)).await;
    scope.join().await;

    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].content, "starting");
    assert_eq!(entries[1].kind, OutputKind::Line);
    assert_eq!(entries[1].content, "plain text output");
    assert_eq!(entries[2].kind, OutputKind::Result);
}

#[tokio::test(start_paused = true)]
async fn malformed_entries_are_skipped() {
    let harness = Harness::new();
    let exec = execution("e2");
    harness.seed(
        &exec,
        "Running",
        &runner_log(&[r#"{"unexpected": true}"#.to_string(), line_entry("kept")]),
    );

    let scope = ExecutionScope::new();
    let entries = drain(harness.executor.logs("e2", &scope)).await;

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].content, "kept");
}

#[tokio::test(start_paused = true)]
async fn failed_pod_yields_single_error_from_last_line() {
    let harness = Harness::new();
    let exec = execution("e3");
    harness.seed(
        &exec,
        "Failed",
        &runner_log(&[line_entry("cloning"), line_entry("fatal: repository missing")]),
    );

    let scope = ExecutionScope::new();
    let entries = drain(harness.executor.logs("e3", &scope)).await;

    assert_eq!(entries.len(), 1);
    assert!(entries[0].is_error());
    assert!(entries[0].content.contains("error from last log entry"));
    assert!(entries[0].content.contains("fatal: repository missing"));
}

#[tokio::test(start_paused = true)]
async fn failed_pod_without_containers_reports_pod_name() {
    let harness = Harness::new();
    let mut failed = pod("e7", "Failed");
    failed.spec = None;
    harness.cluster.add_pod(failed);

    let scope = ExecutionScope::new();
    let entries = drain(harness.executor.logs("e7", &scope)).await;

    assert_eq!(entries.len(), 1);
    assert!(entries[0].is_error());
    assert!(entries[0].content.contains("pod e7-pod failed"));
}

#[tokio::test(start_paused = true)]
async fn missing_pod_yields_error_entry() {
    let harness = Harness::new();

    let scope = ExecutionScope::new();
    let entries = drain(harness.executor.logs("nope", &scope)).await;

    assert_eq!(entries.len(), 1);
    assert!(entries[0].is_error());
    assert!(entries[0].content.contains("no pods found for job nope"));
}

#[tokio::test(start_paused = true)]
async fn pending_pod_times_out_waiting_to_start() {
    let harness = Harness::new();
    let exec = execution("e4");
    harness.seed(&exec, "Pending", b"");

    let scope = ExecutionScope::new();
    let err = harness
        .executor
        .tail_job_logs("e4", &scope)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("pod to become loggable"));
}

#[tokio::test(start_paused = true)]
async fn raw_tail_delivers_lines_without_newlines() {
    let harness = Harness::new();
    let exec = execution("e5");
    harness.seed(&exec, "Running", b"first\r\nsecond\nthird");

    let scope = ExecutionScope::new();
    let mut rx = harness.executor.tail_job_logs("e5", &scope).await.unwrap();

    let mut lines = Vec::new();
    while let Some(line) = rx.recv().await {
        lines.push(String::from_utf8(line).unwrap());
    }
    assert_eq!(lines, vec!["first", "second", "third"]);
}

#[tokio::test(start_paused = true)]
async fn cancelled_scope_closes_the_stream() {
    let harness = Harness::new();
    let exec = execution("e6");
    harness.seed(&exec, "Running", &runner_log(&[line_entry("one")]));

    let scope = ExecutionScope::new();
    scope.cancel();
    let entries = drain(harness.executor.logs("e6", &scope)).await;

    assert!(entries.iter().all(|e| e.kind != OutputKind::Result));
    scope.join().await;
}
