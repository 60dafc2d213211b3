//! End-to-end executor scenarios against an in-memory cluster.
//!
//! Covers sync and async execution, negative tests, manual abort, timeout
//! finalization and the guard that keeps forced terminal statuses.

use narwhal::{
    ABORTED_TRAILER, EventType, ExecutionResult, ExecutionScope, ExecutionStatus, ExecutorError,
    NEGATIVE_PASSED_TRAILER, NEGATIVE_REVERSED_TRAILER, TIMEOUT_TRAILER, TestExecutionResource,
};
use narwhal_testkit::{
    Harness, StaticSettings, deadline_exceeded_status, error_entry, execute_options, execution,
    init_tracing, line_entry, result_entry, runner_log, succeeded_status,
};

fn sync_options() -> narwhal::ExecuteOptions {
    let mut options = execute_options();
    options.request.sync = true;
    options
}

fn passed_log() -> Vec<u8> {
    runner_log(&[
        line_entry("running 3 checks"),
        result_entry(ExecutionStatus::Passed, "3/3 checks passed"),
    ])
}

#[tokio::test(start_paused = true)]
async fn sync_execution_passes_and_notifies_once() {
    init_tracing();
    let harness = Harness::new();
    let mut exec = execution("e1");
    harness.seed(&exec, "Succeeded", &passed_log());

    let scope = ExecutionScope::new();
    let result = harness
        .executor
        .execute(&scope, &mut exec, &sync_options())
        .await
        .expect("execution should succeed");

    assert_eq!(result.status, ExecutionStatus::Passed);
    assert_eq!(result.output, "running 3 checks");
    assert!(result.end_time.is_some());

    let saved = harness.repository.record("e1").unwrap();
    assert_eq!(saved.status(), ExecutionStatus::Passed);
    assert_eq!(harness.repository.end_writes(), 1);

    assert_eq!(harness.emitter.event_types(), vec![EventType::EndTestSuccess]);
    let counted = harness.counter.records();
    assert_eq!(counted.len(), 1);
    assert_eq!(counted[0].status, "passed");
    assert_eq!(counted[0].dashboard_uri, "https://dashboard.test");

    let sent = harness.usage.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.test_type, "k6/script");
    assert_eq!(sent[0].1.status, "passed");
    assert_eq!(sent[0].1.cluster_id, "cluster-test");

    let test = harness.tests.test("t1").unwrap();
    assert_eq!(test.status.latest_execution.unwrap().id, "e1");
    harness.cluster.assert_created_count_eq(1);
}

#[tokio::test(start_paused = true)]
async fn created_job_carries_default_labels() {
    let harness = Harness::new();
    let mut exec = execution("e1");
    harness.seed(&exec, "Succeeded", &passed_log());

    harness
        .executor
        .execute(&ExecutionScope::new(), &mut exec, &sync_options())
        .await
        .unwrap();

    let job = harness.cluster.created_jobs().remove(0);
    let labels = job.metadata.labels.unwrap();
    assert_eq!(labels["job-name"], "e1");
    assert_eq!(labels["test-name"], "t1");
    assert_eq!(labels["executor"], "k6-executor");
    assert_eq!(labels["test-type"], "k6-script");
}

#[tokio::test(start_paused = true)]
async fn failed_result_without_message_uses_pod_event() {
    let harness = Harness::new();
    let mut exec = execution("e2");
    harness.seed(
        &exec,
        "Succeeded",
        &runner_log(&[result_entry(ExecutionStatus::Failed, "")]),
    );
    harness.cluster.set_event("e2-pod", "Back-off pulling image");

    let result = harness
        .executor
        .execute(&ExecutionScope::new(), &mut exec, &sync_options())
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.error_message, "Back-off pulling image");
    assert_eq!(harness.emitter.event_types(), vec![EventType::EndTestFailed]);
}

#[tokio::test(start_paused = true)]
async fn runner_error_entry_fails_the_execution() {
    let harness = Harness::new();
    let mut exec = execution("e3");
    harness.seed(
        &exec,
        "Succeeded",
        &runner_log(&[line_entry("cloning repo"), error_entry("repository not found")]),
    );

    let result = harness
        .executor
        .execute(&ExecutionScope::new(), &mut exec, &sync_options())
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.error_message, "repository not found");
}

#[tokio::test(start_paused = true)]
async fn negative_test_failure_becomes_pass() {
    let harness = Harness::new();
    let mut exec = execution("e4");
    harness.seed(
        &exec,
        "Succeeded",
        &runner_log(&[result_entry(ExecutionStatus::Failed, "")]),
    );

    let mut options = sync_options();
    options.request.negative_test = true;
    let result = harness
        .executor
        .execute(&ExecutionScope::new(), &mut exec, &options)
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Passed);
    assert!(result.output.ends_with(NEGATIVE_PASSED_TRAILER));
    assert_eq!(harness.emitter.event_types(), vec![EventType::EndTestSuccess]);
}

#[tokio::test(start_paused = true)]
async fn negative_test_pass_becomes_failure() {
    let harness = Harness::new();
    let mut exec = execution("e5");
    harness.seed(&exec, "Succeeded", &passed_log());

    let mut options = sync_options();
    options.request.negative_test = true;
    let result = harness
        .executor
        .execute(&ExecutionScope::new(), &mut exec, &options)
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(result.output.ends_with(NEGATIVE_REVERSED_TRAILER));
    assert_eq!(harness.emitter.event_types(), vec![EventType::EndTestFailed]);
}

#[tokio::test(start_paused = true)]
async fn empty_logs_fail_with_parse_error() {
    let harness = Harness::new();
    let mut exec = execution("e6");
    harness.seed(&exec, "Succeeded", b"");

    let result = harness
        .executor
        .execute(&ExecutionScope::new(), &mut exec, &sync_options())
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.error_message, "parsing runner output: no logs found");
    assert_eq!(
        harness.repository.record("e6").unwrap().status(),
        ExecutionStatus::Failed
    );
}

#[tokio::test(start_paused = true)]
async fn abort_deletes_job_and_finalizes() {
    let harness = Harness::new();
    let mut exec = execution("e7");
    exec.execution_result = ExecutionResult::running();
    harness.repository.insert(exec.clone());

    let result = harness.executor.abort(&mut exec).await;

    assert_eq!(result.status, ExecutionStatus::Aborted);
    assert!(result.output.ends_with(ABORTED_TRAILER));
    assert!(result.start_time.is_some());
    assert_eq!(harness.cluster.deleted_jobs(), vec!["e7".to_string()]);
    assert_eq!(harness.emitter.event_types(), vec![EventType::EndTestAborted]);
}

#[tokio::test(start_paused = true)]
async fn abort_finalizes_even_when_delete_fails() {
    let harness = Harness::new();
    let mut exec = execution("e8");
    harness.repository.insert(exec.clone());
    harness.cluster.fail_delete("forbidden");

    let result = harness.executor.abort(&mut exec).await;

    assert_eq!(result.status, ExecutionStatus::Aborted);
    assert_eq!(
        harness.repository.record("e8").unwrap().status(),
        ExecutionStatus::Aborted
    );
}

#[tokio::test(start_paused = true)]
async fn completion_after_abort_keeps_aborted_status() {
    let harness = Harness::new();
    let mut exec = execution("e9");
    harness.seed(&exec, "Succeeded", &passed_log());
    harness.executor.abort(&mut exec.clone()).await;

    let result = harness
        .executor
        .execute(&ExecutionScope::new(), &mut exec, &sync_options())
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Aborted);
    assert_eq!(exec.status(), ExecutionStatus::Aborted);
    assert_eq!(
        harness.repository.record("e9").unwrap().status(),
        ExecutionStatus::Aborted
    );
    assert_eq!(harness.repository.end_writes(), 1);
    assert_eq!(harness.emitter.event_types(), vec![EventType::EndTestAborted]);
}

#[tokio::test(start_paused = true)]
async fn timeout_finalizes_running_execution() {
    let harness = Harness::new();
    let mut exec = execution("e10");
    exec.execution_result = ExecutionResult::running();
    harness.repository.insert(exec);

    let result = harness.executor.timeout("e10").await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Timeout);
    assert!(result.output.ends_with(TIMEOUT_TRAILER));
    assert!(result.start_time.is_some());
    assert_eq!(harness.emitter.event_types(), vec![EventType::EndTestTimeout]);
}

#[tokio::test(start_paused = true)]
async fn timeout_leaves_canceled_execution_untouched() {
    let harness = Harness::new();
    let mut exec = execution("e11");
    exec.execution_result = ExecutionResult::with_status(ExecutionStatus::Canceled);
    harness.repository.insert(exec);

    let result = harness.executor.timeout("e11").await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Canceled);
    assert_eq!(harness.repository.end_writes(), 0);
    harness.emitter.assert_event_count_eq(0);
    assert!(harness.counter.records().is_empty());
}

#[tokio::test(start_paused = true)]
async fn second_timeout_keeps_first_finalization() {
    let harness = Harness::new();
    let mut exec = execution("e20");
    exec.execution_result = ExecutionResult::running();
    harness.repository.insert(exec);

    let first = harness.executor.timeout("e20").await.unwrap();
    let second = harness.executor.timeout("e20").await.unwrap();

    assert_eq!(first.status, ExecutionStatus::Timeout);
    assert_eq!(second.status, ExecutionStatus::Timeout);
    assert_eq!(second.output, first.output);
    assert_eq!(harness.repository.end_writes(), 1);
    assert_eq!(harness.emitter.event_types(), vec![EventType::EndTestTimeout]);
    assert_eq!(harness.counter.records().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn timeout_of_unknown_execution_is_none() {
    let harness = Harness::new();
    assert!(harness.executor.timeout("missing").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn async_execution_finalizes_in_background() {
    let harness = Harness::new();
    let mut exec = execution("e12");
    harness.seed(&exec, "Succeeded", &passed_log());
    harness.cluster.set_job_status("e12", succeeded_status());

    let scope = ExecutionScope::new();
    let result = harness
        .executor
        .execute(&scope, &mut exec, &execute_options())
        .await
        .unwrap();
    assert_eq!(result.status, ExecutionStatus::Running);

    scope.join().await;

    assert_eq!(
        harness.repository.record("e12").unwrap().status(),
        ExecutionStatus::Passed
    );
    assert_eq!(harness.emitter.event_types(), vec![EventType::EndTestSuccess]);
}

#[tokio::test(start_paused = true)]
async fn async_execution_times_out_on_deadline() {
    let harness = Harness::new();
    let mut exec = execution("e13");
    // still running, so no finalization task follows the pod
    harness.seed(&exec, "Running", b"");
    harness.cluster.set_job_status("e13", deadline_exceeded_status());

    let scope = ExecutionScope::new();
    harness
        .executor
        .execute(&scope, &mut exec, &execute_options())
        .await
        .unwrap();
    scope.join().await;

    let saved = harness.repository.record("e13").unwrap();
    assert_eq!(saved.status(), ExecutionStatus::Timeout);
    assert_eq!(harness.emitter.event_types(), vec![EventType::EndTestTimeout]);
}

#[tokio::test(start_paused = true)]
async fn create_failure_is_a_scheduler_error() {
    let harness = Harness::new();
    let mut exec = execution("e14");
    harness.repository.insert(exec.clone());
    harness.cluster.fail_create("quota exceeded");

    let err = harness
        .executor
        .execute(&ExecutionScope::new(), &mut exec, &sync_options())
        .await
        .unwrap_err();

    assert!(matches!(err, ExecutorError::Scheduler { op: "create job", .. }));
    assert!(exec.execution_result.is_failed());
    assert!(exec.execution_result.error_message.contains("quota exceeded"));
    harness.emitter.assert_event_count_eq(0);
}

#[tokio::test(start_paused = true)]
async fn missing_pod_leaves_execution_running() {
    let harness = Harness::new();
    let mut exec = execution("e15");
    harness.repository.insert(exec.clone());

    let result = harness
        .executor
        .execute(&ExecutionScope::new(), &mut exec, &sync_options())
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Running);
    assert_eq!(
        harness.repository.record("e15").unwrap().status(),
        ExecutionStatus::Running
    );
    harness.emitter.assert_event_count_eq(0);
}

#[tokio::test(start_paused = true)]
async fn pod_list_failure_is_a_scheduler_error() {
    let harness = Harness::new();
    let mut exec = execution("e16");
    harness.repository.insert(exec.clone());
    harness.cluster.fail_list_pods("connection refused");

    let err = harness
        .executor
        .execute(&ExecutionScope::new(), &mut exec, &sync_options())
        .await
        .unwrap_err();

    assert!(matches!(err, ExecutorError::Scheduler { op: "list pods", .. }));
    assert!(exec.execution_result.is_failed());
}

#[tokio::test(start_paused = true)]
async fn disabled_telemetry_sends_no_usage() {
    let harness = Harness::with_settings(StaticSettings {
        telemetry_enabled: false,
        ..Default::default()
    });
    let mut exec = execution("e17");
    harness.seed(&exec, "Succeeded", &passed_log());

    harness
        .executor
        .execute(&ExecutionScope::new(), &mut exec, &sync_options())
        .await
        .unwrap();

    assert!(harness.usage.sent().is_empty());
    assert_eq!(harness.counter.records().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_execution_resource_records_result() {
    let harness = Harness::new();
    let mut exec = execution("e18");
    exec.test_execution_name = "te1".to_string();
    harness.seed(&exec, "Succeeded", &passed_log());
    harness.test_executions.insert(TestExecutionResource {
        name: "te1".to_string(),
        generation: 3,
        ..Default::default()
    });

    harness
        .executor
        .execute(&ExecutionScope::new(), &mut exec, &sync_options())
        .await
        .unwrap();

    let resource = harness.test_executions.resource("te1").unwrap();
    assert_eq!(resource.status.generation, 3);
    assert_eq!(
        resource.status.latest_execution.unwrap().status(),
        ExecutionStatus::Passed
    );
}

#[tokio::test(start_paused = true)]
async fn status_update_failure_is_reported_after_persisting() {
    let harness = Harness::new();
    let mut exec = execution("e19");
    harness.seed(&exec, "Succeeded", &passed_log());
    harness.tests.fail_updates();

    let err = harness
        .executor
        .execute(&ExecutionScope::new(), &mut exec, &sync_options())
        .await
        .unwrap_err();

    assert!(matches!(err, ExecutorError::Status { resource: "test", .. }));
    assert_eq!(
        harness.repository.record("e19").unwrap().status(),
        ExecutionStatus::Passed
    );
    harness.emitter.assert_event_count_eq(0);
}
