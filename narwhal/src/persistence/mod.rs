/// PostgreSQL implementation of the execution repository.
///
/// This module provides `PostgresExecutionRepository`, a PostgreSQL-backed
/// implementation of the [`ExecutionRepository`](crate::repository::ExecutionRepository)
/// trait with conditional terminal writes.
pub mod postgres;

pub use postgres::{PostgresExecutionRepository, SCHEMA};
