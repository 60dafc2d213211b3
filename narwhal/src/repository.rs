use async_trait::async_trait;

use crate::execution::{Execution, ExecutionResult};

/// Durable store of execution records.
///
/// The persisted record is the serialization point between the normal
/// completion path, manual abort and the timeout monitor.
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Load an execution by id.
    async fn get(&self, id: &str) -> anyhow::Result<Execution>;

    /// Write the terminal state of an execution.
    ///
    /// The write is conditional: it is skipped when the persisted record
    /// already carries a forced terminal status (canceled, timeout, aborted)
    /// and the returned flag tells whether the write was applied. Writing a
    /// forced terminal status itself is only blocked by an earlier one.
    async fn end_execution(&self, execution: &Execution) -> anyhow::Result<bool>;

    /// Record an intermediate result, e.g. `Running` after job creation.
    ///
    /// Skipped, with `Ok(false)`, when the record is already forced terminal.
    async fn update_result(&self, id: &str, result: &ExecutionResult) -> anyhow::Result<bool>;
}
