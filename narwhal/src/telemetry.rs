//! Tracing and telemetry instrumentation for narwhal.
//!
//! Span constructors for the execution lifecycle and helpers recording a
//! finished execution. All functions work both with and without the
//! `metrics` feature flag.
//!
//! # Example
//!
//! ```ignore
//! use narwhal::telemetry::execute_span;
//!
//! let span = execute_span("e1", "k6/script");
//! let _enter = span.enter();
//! ```

use std::future::Future;

use tracing::{Instrument, Span, info_span};

use crate::execution::Execution;

/// Create a tracing span for scheduling an execution.
///
/// # Arguments
/// * `execution_id` - The execution identifier, also the job name
/// * `test_type` - The test type the executor runs
#[must_use]
pub fn execute_span(execution_id: impl AsRef<str>, test_type: impl AsRef<str>) -> Span {
    info_span!(
        "narwhal.execute",
        execution_id = %execution_id.as_ref(),
        test_type = %test_type.as_ref(),
    )
}

/// Create a tracing span for collecting and persisting results.
#[must_use]
pub fn finalize_span(execution_id: impl AsRef<str>, pod: impl AsRef<str>) -> Span {
    info_span!(
        "narwhal.finalize",
        execution_id = %execution_id.as_ref(),
        pod = %pod.as_ref(),
    )
}

/// Create a tracing span for the job timeout monitor.
#[must_use]
pub fn monitor_span(job_name: impl AsRef<str>) -> Span {
    info_span!("narwhal.monitor", job_name = %job_name.as_ref())
}

/// Create a tracing span for tailing pod logs.
#[must_use]
pub fn tail_span(pod: impl AsRef<str>) -> Span {
    info_span!("narwhal.tail", pod = %pod.as_ref())
}

/// Instrument a future with a finalize span.
pub fn instrument_finalize<F>(
    execution_id: impl AsRef<str>,
    pod: impl AsRef<str>,
    future: F,
) -> impl Future<Output = F::Output>
where
    F: Future,
{
    future.instrument(finalize_span(execution_id, pod))
}

/// Record a finished execution.
///
/// Logged always, counted in Prometheus when the `metrics` feature is on.
pub fn record_execution_finished(execution: &Execution) {
    let result = &execution.execution_result;
    let duration_secs = result.duration_ms as f64 / 1000.0;

    tracing::info!(
        execution_id = %execution.id,
        test_name = %execution.test_name,
        test_type = %execution.test_type,
        status = %result.status,
        duration_secs,
        "execution finished"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_execution_finished(
        &execution.test_type,
        &execution.test_name,
        result.status.as_str(),
        duration_secs,
    );
}

/// Counts executions once they are finalized.
pub trait ExecutionCounter: Send + Sync {
    fn inc_execute_test(&self, execution: &Execution, dashboard_uri: &str);
}

/// [`ExecutionCounter`] that logs and feeds the `metrics` module.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingExecutionCounter;

impl ExecutionCounter for TracingExecutionCounter {
    fn inc_execute_test(&self, execution: &Execution, dashboard_uri: &str) {
        if !dashboard_uri.is_empty() {
            tracing::debug!(
                execution_id = %execution.id,
                url = %format!(
                    "{}/tests/{}/executions/{}",
                    dashboard_uri.trim_end_matches('/'),
                    execution.test_name,
                    execution.id
                ),
                "execution dashboard link"
            );
        }
        record_execution_finished(execution);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{ExecutionResult, ExecutionStatus};

    #[test]
    fn test_execute_span() {
        let span = execute_span("e1", "k6/script");
        assert_eq!(span.metadata().unwrap().name(), "narwhal.execute");
    }

    #[test]
    fn test_finalize_span() {
        let span = finalize_span("e1", "e1-pod");
        assert_eq!(span.metadata().unwrap().name(), "narwhal.finalize");
    }

    #[test]
    fn test_monitor_span() {
        let span = monitor_span("e1");
        assert_eq!(span.metadata().unwrap().name(), "narwhal.monitor");
    }

    #[test]
    fn test_tail_span() {
        let span = tail_span("e1-pod");
        assert_eq!(span.metadata().unwrap().name(), "narwhal.tail");
    }

    #[test]
    fn test_counter_records_without_panicking() {
        let mut execution = Execution::new("e1", "t1");
        execution.execution_result = ExecutionResult::with_status(ExecutionStatus::Passed);
        TracingExecutionCounter.inc_execute_test(&execution, "https://dashboard.local/");
    }
}
