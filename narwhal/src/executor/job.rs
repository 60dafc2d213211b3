use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, warn};

use super::monitor::{TimeoutHandler, TimeoutMonitor};
use super::{CancelToken, ExecutionScope};
use crate::analytics::{self, RUN_TEST_EVENT, RunParams, UsageReporter};
use crate::cluster::pods::{
    self, PHASE_FAILED, PHASE_RUNNING, find_job_pods, is_pod_loggable, is_pod_ready, phase,
    pod_name, poll_until,
};
use crate::cluster::{ClusterClient, JOB_NAME_LABEL};
use crate::config::ExecutorConfig;
use crate::error::{ExecutorError, OutputError, Result};
use crate::events::{EventEmitter, EventType, ExecutionEvent};
use crate::execution::{ExecuteOptions, Execution, ExecutionResult, ExecutionStatus};
use crate::logs::tail_pod_logs;
use crate::manifest::{JobOptions, build_job_spec};
use crate::output::{Output, OutputParser};
use crate::repository::ExecutionRepository;
use crate::resources::{
    ConfigRepository, ExecutionSummary, TemplatesClient, TestExecutionsClient, TestsClient,
};
use crate::telemetry::{self, ExecutionCounter};

pub const NEGATIVE_PASSED_TRAILER: &str = "Test run was expected to fail, and it failed as expected";
pub const NEGATIVE_REVERSED_TRAILER: &str = "Test run was expected to fail, the result will be reversed";
pub const ABORTED_TRAILER: &str = "Test run was aborted manually.";
pub const TIMEOUT_TRAILER: &str = "Test run was aborted due to timeout.";

const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// Runs executions as cluster jobs and finalizes their results.
///
/// Cheap to clone; clones share every collaborator.
#[derive(Clone)]
pub struct JobExecutor {
    pub(super) config: Arc<ExecutorConfig>,
    pub(super) cluster: Arc<dyn ClusterClient>,
    pub(super) repository: Arc<dyn ExecutionRepository>,
    pub(super) tests: Arc<dyn TestsClient>,
    pub(super) test_executions: Arc<dyn TestExecutionsClient>,
    pub(super) templates: Arc<dyn TemplatesClient>,
    pub(super) settings: Arc<dyn ConfigRepository>,
    pub(super) emitter: Arc<dyn EventEmitter>,
    pub(super) counter: Arc<dyn ExecutionCounter>,
    pub(super) usage: Arc<dyn UsageReporter>,
    pub(super) parser: Arc<dyn OutputParser>,
}

impl fmt::Debug for JobExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobExecutor")
            .field("namespace", &self.config.namespace)
            .field("init_image", &self.config.init_image)
            .finish_non_exhaustive()
    }
}

impl JobExecutor {
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Schedule `execution` as a job.
    ///
    /// In async mode the call returns a `Running` result as soon as the job
    /// exists; finalization and the timeout monitor continue on `scope`. In
    /// sync mode it returns once the execution is finalized.
    pub async fn execute(
        &self,
        scope: &ExecutionScope,
        execution: &mut Execution,
        options: &ExecuteOptions,
    ) -> Result<ExecutionResult> {
        let span = telemetry::execute_span(&execution.id, &options.test_type);
        self.execute_inner(scope, execution, options)
            .instrument(span)
            .await
    }

    async fn execute_inner(
        &self,
        scope: &ExecutionScope,
        execution: &mut Execution,
        options: &ExecuteOptions,
    ) -> Result<ExecutionResult> {
        execution.execution_result = ExecutionResult::running();

        if let Err(e) = self.create_job(execution, options).await {
            error!(error = %e, "creating job failed");
            execution.execution_result = execution.execution_result.clone().err(&e);
            return Err(e);
        }

        match self
            .repository
            .update_result(&execution.id, &execution.execution_result)
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!("execution already finalized, running state not recorded"),
            Err(e) => warn!(error = %e, "recording running state failed"),
        }

        let sync = options.request.sync;
        if !sync {
            self.spawn_timeout_monitor(scope, &execution.id);
        }

        let pods = match find_job_pods(
            self.cluster.as_ref(),
            &execution.id,
            self.config.pod_lookup_attempts,
            self.config.pod_lookup_backoff(),
            scope.token(),
        )
        .await
        {
            Ok(pods) => pods,
            Err(e) => {
                let e = ExecutorError::scheduler("list pods", e);
                execution.execution_result = execution.execution_result.clone().err(&e);
                return Err(e);
            }
        };

        let total = pods.len();
        let Some(pod) = pods
            .into_iter()
            .find(|pod| phase(pod) != PHASE_RUNNING && owned_by(pod, &execution.id))
        else {
            debug!(total_pods = total, "no pod to follow yet");
            return Ok(execution.execution_result.clone());
        };

        let negative = options.request.negative_test;
        if sync {
            return self
                .update_results_from_pod(scope.token(), pod, execution, negative)
                .await;
        }

        let executor = self.clone();
        let token = scope.token().clone();
        let mut background = execution.clone();
        scope.spawn(async move {
            if let Err(e) = executor
                .update_results_from_pod(&token, pod, &mut background, negative)
                .await
            {
                error!(execution_id = %background.id, error = %e, "updating results from pod failed");
            }
        });

        Ok(execution.execution_result.clone())
    }

    /// Build the job manifest for `execution` and create it.
    pub async fn create_job(&self, execution: &Execution, options: &ExecuteOptions) -> Result<()> {
        let job_options =
            JobOptions::from_execution(&self.config, self.templates.as_ref(), execution, options)
                .await?;
        let job = build_job_spec(&job_options, &self.config.runner)?;

        self.cluster
            .create_job(&job)
            .await
            .map_err(|e| ExecutorError::scheduler("create job", e))?;
        info!(job_name = %job_options.name, namespace = %job_options.namespace, "job created");
        Ok(())
    }

    fn spawn_timeout_monitor(&self, scope: &ExecutionScope, job_name: &str) {
        let monitor = TimeoutMonitor::new(
            self.cluster.clone(),
            Arc::new(self.clone()),
            self.config.monitor_interval(),
        );
        let token = scope.token().clone();
        let job_name = job_name.to_string();
        let span = telemetry::monitor_span(&job_name);

        scope.spawn(
            async move {
                monitor.run(&job_name, &token).await;
            }
            .instrument(span),
        );
    }

    /// Wait for the pod to finish, collect its result and finalize.
    ///
    /// Finalization runs whatever happened while waiting, unless `cancel`
    /// fired first; then nothing is written.
    pub async fn update_results_from_pod(
        &self,
        cancel: &CancelToken,
        pod: Pod,
        execution: &mut Execution,
        negative_test: bool,
    ) -> Result<ExecutionResult> {
        let id = execution.id.clone();
        let name = pod_name(&pod).to_string();
        telemetry::instrument_finalize(id, name, async {
            let collected = self.collect_result(cancel, &pod, execution).await;

            let captured = match collected {
                Ok(()) => None,
                Err(e) if e.is_cancelled() => {
                    info!("finalization cancelled, nothing persisted");
                    return Err(e);
                }
                Err(e) => {
                    error!(error = %e, "collecting result from pod failed");
                    if !execution.execution_result.status.is_terminal() {
                        execution.execution_result = execution.execution_result.clone().err(&e);
                    }
                    Some(e)
                }
            };

            let result = execution.execution_result.clone();
            self.stop_execution(execution, result, negative_test, captured.as_ref())
                .await?;
            Ok(execution.execution_result.clone())
        })
        .await
    }

    async fn collect_result(
        &self,
        cancel: &CancelToken,
        pod: &Pod,
        execution: &mut Execution,
    ) -> Result<()> {
        let name = pod_name(pod);
        let cluster = &self.cluster;

        if let Err(e) = poll_until(
            self.config.poll_interval(),
            self.config.pod_start_timeout(),
            cancel,
            "pod to become loggable",
            || async move {
                let pod = cluster.get_pod(name).await?;
                Ok::<_, anyhow::Error>(is_pod_loggable(&pod))
            },
        )
        .await
        {
            if e.is_cancelled() {
                return Err(e.into());
            }
            error!(pod = %name, error = %e, "waiting for pod start failed");
        }

        debug!(pod = %name, "waiting for pod to complete");
        if let Err(e) = poll_until(
            self.config.poll_interval(),
            self.config.poll_timeout(),
            cancel,
            "pod to complete",
            || async move {
                let pod = cluster.get_pod(name).await?;
                is_pod_ready(&pod)
            },
        )
        .await
        {
            if e.is_cancelled() {
                return Err(e.into());
            }
            // keep going, the logs may still carry a result
            error!(pod = %name, error = %e, "waiting for pod completion failed");
            execution.execution_result = execution.execution_result.clone().err(&e);
        }

        let logs = pods::collect_pod_logs(cluster.as_ref(), pod, None)
            .await
            .map_err(|e| ExecutorError::scheduler("read pod logs", e))?;

        let mut result = self.parser.parse_result(&logs)?;
        if result.is_failed() && result.error_message.is_empty() {
            let current = match cluster.get_pod(name).await {
                Ok(current) => current,
                Err(_) => pod.clone(),
            };
            result.error_message = pods::pod_error_message(cluster.as_ref(), &current).await;
        }
        if result.start_time.is_none() {
            result.start_time = execution.execution_result.start_time;
        }

        execution.execution_result = result;
        Ok(())
    }

    /// Finalize an execution with `result`.
    ///
    /// When the persisted record already carries a canceled, timeout or
    /// aborted status nothing is written and `execution` is replaced by that
    /// record. Otherwise the result is completed in
    /// memory, written once, and then propagated to resource statuses,
    /// metrics, subscribers and usage telemetry.
    pub async fn stop_execution(
        &self,
        execution: &mut Execution,
        mut result: ExecutionResult,
        is_negative_test: bool,
        passed_err: Option<&ExecutorError>,
    ) -> Result<()> {
        let persistence = |source| ExecutorError::Persistence {
            id: execution.id.clone(),
            source,
        };
        let saved = self.repository.get(&execution.id).await.map_err(persistence)?;
        debug!(
            execution_id = %execution.id,
            status = %result.status,
            saved_status = %saved.status(),
            "stopping execution"
        );

        if saved.status().is_forced_terminal() {
            info!(
                execution_id = %execution.id,
                status = %saved.status(),
                "execution already ended, keeping persisted result"
            );
            *execution = saved;
            return Ok(());
        }

        if result.start_time.is_none() {
            result.start_time = execution
                .execution_result
                .start_time
                .or(saved.execution_result.start_time);
        }
        execution.execution_result = result;
        execution.stop();

        let result = &mut execution.execution_result;
        if is_negative_test {
            if result.is_failed() {
                info!(test = %execution.test_name, "test run failed as expected");
                result.status = ExecutionStatus::Passed;
                result.append_output(NEGATIVE_PASSED_TRAILER);
            } else {
                info!(test = %execution.test_name, "test run was expected to fail, reversing result");
                result.status = ExecutionStatus::Failed;
                result.append_output(NEGATIVE_REVERSED_TRAILER);
            }
        }

        if let Some(e) = passed_err {
            result.error_message = e.to_string();
        }

        let event_type = if result.is_aborted() {
            result.append_output(ABORTED_TRAILER);
            EventType::EndTestAborted
        } else if result.is_timeout() {
            result.append_output(TIMEOUT_TRAILER);
            EventType::EndTestTimeout
        } else if result.is_failed() {
            EventType::EndTestFailed
        } else {
            EventType::EndTestSuccess
        };

        info!(execution_id = %execution.id, status = %execution.status(), "execution ended, saving result");
        let applied = self
            .repository
            .end_execution(execution)
            .await
            .map_err(|source| ExecutorError::Persistence {
                id: execution.id.clone(),
                source,
            })?;
        if !applied {
            info!(execution_id = %execution.id, "execution ended concurrently, skipping notifications");
            if let Ok(current) = self.repository.get(&execution.id).await {
                *execution = current;
            }
            return Ok(());
        }

        self.update_resource_statuses(execution).await?;

        self.counter.inc_execute_test(execution, &self.config.dashboard_uri);
        self.emitter.notify(ExecutionEvent::new(event_type, execution));

        self.send_usage(execution).await;
        Ok(())
    }

    async fn update_resource_statuses(&self, execution: &Execution) -> Result<()> {
        let status_err = |resource, name: &str| {
            let name = name.to_string();
            move |source| ExecutorError::Status {
                resource,
                name,
                source,
            }
        };

        let mut test = self
            .tests
            .get(&execution.test_name)
            .await
            .map_err(status_err("test", &execution.test_name))?;
        test.status.latest_execution = Some(ExecutionSummary::from(execution));
        self.tests
            .update_status(&test)
            .await
            .map_err(status_err("test", &execution.test_name))?;

        if execution.test_execution_name.is_empty() {
            return Ok(());
        }

        let name = &execution.test_execution_name;
        let mut test_execution = self
            .test_executions
            .get(name)
            .await
            .map_err(status_err("test execution", name))?;
        test_execution.record(execution);
        self.test_executions
            .update_status(&test_execution)
            .await
            .map_err(status_err("test execution", name))?;
        Ok(())
    }

    async fn send_usage(&self, execution: &Execution) {
        match self.settings.telemetry_enabled().await {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                debug!(error = %e, "reading telemetry flag failed");
                return;
            }
        }

        let cluster_id = self.settings.unique_cluster_id().await.unwrap_or_else(|e| {
            debug!(error = %e, "reading cluster id failed");
            String::new()
        });

        let params = RunParams {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            data_source: execution
                .content
                .as_ref()
                .map(|c| c.kind.clone())
                .unwrap_or_default(),
            host: analytics::hostname(),
            cluster_id,
            test_type: execution.test_type.clone(),
            duration_ms: execution.duration_ms(),
            status: execution.status().to_string(),
        };

        if let Err(e) = self.usage.send_run_event(RUN_TEST_EVENT, params).await {
            debug!(error = %e, "sending usage event failed");
        }
    }

    /// Delete the job of `execution` and finalize it as aborted.
    ///
    /// A failed delete is logged; the execution is finalized either way.
    pub async fn abort(&self, execution: &mut Execution) -> ExecutionResult {
        if let Err(e) = self.cluster.delete_job(&execution.id).await {
            error!(execution_id = %execution.id, error = %e, "deleting job failed");
        }
        debug!(execution_id = %execution.id, "job aborted");

        if let Err(e) = self
            .stop_execution(execution, ExecutionResult::aborted(), false, None)
            .await
        {
            error!(execution_id = %execution.id, error = %e, "finalizing aborted execution failed");
        }
        execution.execution_result.clone()
    }

    /// Finalize the execution behind `job_name` as timed out.
    pub async fn timeout(&self, job_name: &str) -> Option<ExecutionResult> {
        info!(job_name, "job timeout");
        let mut execution = match self.repository.get(job_name).await {
            Ok(execution) => execution,
            Err(e) => {
                error!(job_name, error = %e, "loading execution failed");
                return None;
            }
        };

        if let Err(e) = self
            .stop_execution(&mut execution, ExecutionResult::timed_out(), false, None)
            .await
        {
            error!(job_name, error = %e, "finalizing timed out execution failed");
        }
        Some(execution.execution_result)
    }

    /// Structured log entries of the job `id`.
    ///
    /// Lines that fail to parse are logged and skipped. A failure to reach
    /// the logs is delivered as a single error entry.
    pub fn logs(&self, id: &str, scope: &ExecutionScope) -> mpsc::Receiver<Output> {
        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let executor = self.clone();
        let tail_scope = scope.clone();
        let id = id.to_string();

        scope.spawn(async move {
            let mut lines = match executor.tail_job_logs(&id, &tail_scope).await {
                Ok(lines) => lines,
                Err(e) => {
                    let _ = tx.send(Output::error(&e)).await;
                    return;
                }
            };

            while let Some(line) = lines.recv().await {
                match executor.parser.parse_line(&line) {
                    Ok(entry) => {
                        if tx.send(entry).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!(execution_id = %id, error = %e, "parsing log entry failed"),
                }
            }
            debug!(execution_id = %id, "log output closed");
        });

        rx
    }

    /// Raw log lines of the pod running job `id`.
    pub async fn tail_job_logs(
        &self,
        id: &str,
        scope: &ExecutionScope,
    ) -> Result<mpsc::Receiver<Vec<u8>>> {
        let pods = find_job_pods(
            self.cluster.as_ref(),
            id,
            self.config.pod_lookup_attempts,
            self.config.pod_lookup_backoff(),
            scope.token(),
        )
        .await
        .map_err(|e| ExecutorError::scheduler("list pods", e))?;

        let Some(pod) = pods.into_iter().find(|pod| owned_by(pod, id)) else {
            return Err(ExecutorError::scheduler(
                "find pod",
                anyhow::anyhow!("no pods found for job {id}"),
            ));
        };

        match phase(&pod) {
            PHASE_RUNNING => {}
            PHASE_FAILED => return Err(self.last_log_line_error(&pod).await),
            _ => {
                let cluster = &self.cluster;
                let name = pod_name(&pod);
                poll_until(
                    self.config.poll_interval(),
                    self.config.pod_start_timeout(),
                    scope.token(),
                    "pod to become loggable",
                    || async move {
                        let pod = cluster.get_pod(name).await?;
                        Ok::<_, anyhow::Error>(is_pod_loggable(&pod))
                    },
                )
                .await?;
            }
        }

        Ok(tail_pod_logs(self.cluster.clone(), &pod, scope))
    }

    /// Error describing a failed pod, built from its last log line.
    async fn last_log_line_error(&self, pod: &Pod) -> ExecutorError {
        let name = pod_name(pod);
        let Some(container) = pods::container_names(pod).pop() else {
            return OutputError::Runner(format!("pod {name} failed")).into();
        };

        let line = match self.cluster.pod_logs(name, &container, Some(1)).await {
            Ok(line) => line,
            Err(e) => return ExecutorError::scheduler("read pod logs", e),
        };

        match self.parser.parse_line(&line) {
            Ok(entry) => {
                info!(pod = %name, entry = %entry, "got last log entry");
                OutputError::Runner(format!("error from last log entry: {entry}")).into()
            }
            Err(e) => e.into(),
        }
    }
}

#[async_trait]
impl TimeoutHandler for JobExecutor {
    async fn on_timeout(&self, job_name: &str) {
        self.timeout(job_name).await;
    }
}

fn owned_by(pod: &Pod, job_name: &str) -> bool {
    pod.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(JOB_NAME_LABEL))
        .is_some_and(|name| name == job_name)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;

    fn labelled(job_name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                labels: Some(BTreeMap::from([(
                    JOB_NAME_LABEL.to_string(),
                    job_name.to_string(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_pod_ownership_follows_job_name_label() {
        assert!(owned_by(&labelled("e1"), "e1"));
        assert!(!owned_by(&labelled("e10"), "e1"));
        assert!(!owned_by(&Pod::default(), "e1"));
    }

    #[test]
    fn test_trailers_name_their_cause() {
        assert!(ABORTED_TRAILER.contains("aborted manually"));
        assert!(TIMEOUT_TRAILER.contains("timeout"));
        assert!(NEGATIVE_PASSED_TRAILER.contains("failed as expected"));
    }
}
