//! Integration tests for the conditional writes of the PostgreSQL repository.
//!
//! Requires a running Postgres instance.
//! Run with: `cargo test --test postgres_repository --features postgres -- --ignored`

#![cfg(feature = "postgres")]

use narwhal::persistence::PostgresExecutionRepository;
use narwhal::{Execution, ExecutionRepository, ExecutionResult, ExecutionStatus};
use sqlx::PgPool;
use uuid::Uuid;

async fn repository() -> PostgresExecutionRepository {
    let pool = PgPool::connect(&std::env::var("DATABASE_URL").expect("DATABASE_URL required"))
        .await
        .expect("connect");
    let repository = PostgresExecutionRepository::new(pool);
    repository.ensure_schema().await.expect("schema");
    repository
}

fn execution(status: ExecutionStatus) -> Execution {
    let mut execution = Execution::new(format!("pg-{}", Uuid::new_v4()), "t1");
    execution.execution_result = ExecutionResult::with_status(status);
    execution
}

async fn cleanup(repository: &PostgresExecutionRepository, id: &str) {
    sqlx::query("DELETE FROM narwhal_executions WHERE id = $1")
        .bind(id)
        .execute(repository.pool())
        .await
        .ok();
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn end_execution_overwrites_running_record() {
    let repository = repository().await;
    let mut execution = execution(ExecutionStatus::Running);
    repository.insert(&execution).await.expect("insert");

    execution.execution_result.status = ExecutionStatus::Passed;
    assert!(repository.end_execution(&execution).await.expect("end"));

    let saved = repository.get(&execution.id).await.expect("get");
    assert_eq!(saved.status(), ExecutionStatus::Passed);

    cleanup(&repository, &execution.id).await;
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn end_execution_keeps_forced_terminal_status() {
    let repository = repository().await;
    for forced in [
        ExecutionStatus::Canceled,
        ExecutionStatus::Timeout,
        ExecutionStatus::Aborted,
    ] {
        let mut execution = execution(forced);
        repository.insert(&execution).await.expect("insert");

        execution.execution_result.status = ExecutionStatus::Passed;
        assert!(!repository.end_execution(&execution).await.expect("end"));
        assert!(
            !repository
                .update_result(&execution.id, &ExecutionResult::running())
                .await
                .expect("update")
        );

        let saved = repository.get(&execution.id).await.expect("get");
        assert_eq!(saved.status(), forced);

        cleanup(&repository, &execution.id).await;
    }
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn update_result_replaces_embedded_result() {
    let repository = repository().await;
    let execution = execution(ExecutionStatus::Queued);
    repository.insert(&execution).await.expect("insert");

    assert!(
        repository
            .update_result(&execution.id, &ExecutionResult::running())
            .await
            .expect("update")
    );
    let saved = repository.get(&execution.id).await.expect("get");
    assert_eq!(saved.status(), ExecutionStatus::Running);
    assert!(saved.execution_result.start_time.is_some());

    cleanup(&repository, &execution.id).await;
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn missing_execution_is_an_error() {
    let repository = repository().await;
    assert!(repository.get("pg-missing").await.is_err());
}
