//! Narwhal - Kubernetes job orchestration for test executions.
//!
//! A crate that runs a single test execution as a cluster Job, follows the
//! pod the job spawns, turns the runner's structured output into a result
//! and finalizes the execution exactly once.
//!
//! # Core Concepts
//!
//! - **Execution**: One run of a test. [`Execution`] carries the variables,
//!   content and the [`ExecutionResult`] the engine fills in.
//!
//! - **Manifest**: [`build_job_spec`] renders the job template, merges any
//!   extension overlay and injects the runtime environment.
//!
//! - **Executor**: [`JobExecutor`] schedules the job, waits for its pod and
//!   finalizes through the [`ExecutionRepository`] with a forced-terminal
//!   guard, so manual aborts and timeouts are never overwritten.
//!
//! - **Monitor**: [`TimeoutMonitor`] watches a job and finalizes it as timed
//!   out when the cluster kills it for exceeding its deadline.
//!
//! - **Logs**: [`JobExecutor::logs`] tails a pod and yields parsed
//!   [`Output`] entries.
//!
//! # Feature Flags
//!
//! - `postgres` - PostgreSQL execution repository via sqlx
//! - `metrics` - Prometheus metrics support
//!
//! # Example
//!
//! ```ignore
//! use narwhal::*;
//!
//! let executor = JobExecutorBuilder::new(ExecutorConfig::default())
//!     .with_cluster(Arc::new(KubeClusterClient::try_default("tests").await?))
//!     .with_repository(repository)
//!     .with_tests(tests)
//!     .with_test_executions(test_executions)
//!     .with_templates(templates)
//!     .with_settings(settings)
//!     .build()?;
//!
//! let scope = ExecutionScope::new();
//! let result = executor.execute(&scope, &mut execution, &options).await?;
//! ```

/// Anonymized usage telemetry.
pub mod analytics;

/// Cluster access for jobs, pods, logs and events.
///
/// The `cluster` module defines the [`ClusterClient`] trait, its kube-backed
/// implementation and the pod helpers the executor polls with.
pub mod cluster;

/// Executor configuration loaded from TOML and the environment.
pub mod config;

/// Error types for manifest building, polling and finalization.
pub mod error;

/// Execution lifecycle events.
///
/// The `events` module provides [`ExecutionEvent`], the [`EventEmitter`]
/// trait and [`InProcEventBus`] for in-process broadcasting.
pub mod events;

/// Execution records, results and request options.
pub mod execution;

/// The job executor and its background machinery.
///
/// Includes:
/// - [`JobExecutor`] - schedules and finalizes executions
/// - [`JobExecutorBuilder`] - wires its dependencies
/// - [`TimeoutMonitor`] - deadline watcher per job
/// - [`ExecutionScope`] and [`CancelToken`] - task ownership and cancellation
pub mod executor;

/// Follow-mode pod log tailing.
pub mod logs;

/// Job manifest construction.
pub mod manifest;

#[cfg(feature = "metrics")]
/// Prometheus metrics.
pub mod metrics;

/// Runner output parsing.
pub mod output;

#[cfg(feature = "postgres")]
/// PostgreSQL persistence implementation.
///
/// The `persistence` module provides a PostgreSQL-backed
/// [`ExecutionRepository`] when the `postgres` feature is enabled.
pub mod persistence;

/// The execution repository abstraction.
pub mod repository;

/// Test, test execution and template resources the executor updates.
pub mod resources;

/// Tracing spans and execution counters.
pub mod telemetry;

pub use analytics::{HttpUsageReporter, NoopUsageReporter, RunParams, UsageReporter};
pub use cluster::{ClusterClient, KubeClusterClient, LogStream};
pub use config::{ExecutorConfig, RunnerEnv};
pub use error::{BuildError, ExecutorError, OutputError, PollError};
pub use events::{EventEmitter, EventMeta, EventType, ExecutionEvent, InProcEventBus};
pub use execution::*;
pub use executor::*;
pub use manifest::{JobOptions, build_job_spec};
pub use output::{JsonLinesParser, Output, OutputKind, OutputParser};
pub use repository::ExecutionRepository;
pub use resources::*;
pub use telemetry::{ExecutionCounter, TracingExecutionCounter};
