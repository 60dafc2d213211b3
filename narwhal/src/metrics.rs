//! Prometheus metrics instrumentation for narwhal.
//!
//! All metrics are conditionally compiled behind the `metrics` feature flag.
//!
//! # Metrics
//!
//! ## Counters
//! - `narwhal_executions_total` - Finished executions by test and status
//!
//! ## Histograms
//! - `narwhal_execution_duration_seconds` - Execution duration in seconds
#![cfg(feature = "metrics")]

use std::sync::LazyLock;

use prometheus::{CounterVec, HistogramVec, Opts, Registry, exponential_buckets};

/// Global Prometheus registry for narwhal metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Counter for finished executions.
///
/// Labels:
/// - `test_type`: The executor test type
/// - `test_name`: The test the execution belongs to
/// - `status`: The final execution status
pub static EXECUTIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("narwhal_executions_total", "Total number of finished executions");
    CounterVec::new(opts, &["test_type", "test_name", "status"])
        .expect("narwhal_executions_total metric creation failed")
});

/// Histogram for execution duration in seconds.
///
/// Labels:
/// - `test_type`: The executor test type
/// - `status`: The final execution status
pub static EXECUTION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = exponential_buckets(0.5, 2.0, 16).expect("bucket creation failed");
    let opts = prometheus::HistogramOpts::new(
        "narwhal_execution_duration_seconds",
        "Execution duration in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["test_type", "status"])
        .expect("narwhal_execution_duration_seconds metric creation failed")
});

/// Register all metrics with the global registry.
///
/// Calling it more than once is fine.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(EXECUTIONS_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(EXECUTION_DURATION_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            let msg = e.to_string();
            if !msg.contains("Duplicate metrics collector registration attempted") {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

/// Helper to record a finished execution.
pub fn record_execution_finished(test_type: &str, test_name: &str, status: &str, duration_secs: f64) {
    EXECUTIONS_TOTAL
        .with_label_values(&[test_type, test_name, status])
        .inc();
    EXECUTION_DURATION_SECONDS
        .with_label_values(&[test_type, status])
        .observe(duration_secs);
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        init_metrics().expect("metrics initialization should succeed");
        init_metrics().expect("second initialization should be a no-op");
    }

    #[test]
    fn test_gather_metrics() {
        init_metrics().expect("metrics initialization should succeed");

        record_execution_finished("k6/script", "t1", "passed", 12.5);

        let output = gather_metrics().expect("gather should succeed");
        assert!(output.contains("narwhal_executions_total"));
        assert!(output.contains("narwhal_execution_duration_seconds"));
    }
}
