//! Pod lookup and state predicates shared by the executor and the tailer.

use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{ClusterClient, job_selector};
use crate::error::PollError;
use crate::executor::CancelToken;

pub const PHASE_PENDING: &str = "Pending";
pub const PHASE_RUNNING: &str = "Running";
pub const PHASE_SUCCEEDED: &str = "Succeeded";
pub const PHASE_FAILED: &str = "Failed";

pub fn phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or_default()
}

pub fn pod_name(pod: &Pod) -> &str {
    pod.metadata.name.as_deref().unwrap_or_default()
}

/// Container names in log order: init containers first, then main ones.
pub fn container_names(pod: &Pod) -> Vec<String> {
    let Some(spec) = pod.spec.as_ref() else {
        return Vec::new();
    };
    spec.init_containers
        .iter()
        .flatten()
        .chain(spec.containers.iter())
        .map(|c| c.name.clone())
        .collect()
}

/// Logs can be read once the pod has left `Pending`.
pub fn is_pod_loggable(pod: &Pod) -> bool {
    phase(pod) != PHASE_PENDING
}

/// A pod is ready once every container terminated and the pod succeeded.
///
/// A failed pod is reported as an error so polling stops right away.
pub fn is_pod_ready(pod: &Pod) -> anyhow::Result<bool> {
    let statuses = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(Vec::as_slice)
        .unwrap_or_default();

    if statuses.is_empty() {
        return Ok(false);
    }
    let all_terminated = statuses
        .iter()
        .all(|c| c.state.as_ref().is_some_and(|s| s.terminated.is_some()));
    if !all_terminated {
        return Ok(false);
    }

    match phase(pod) {
        PHASE_SUCCEEDED => Ok(true),
        PHASE_FAILED => Err(anyhow::anyhow!("pod {} failed", pod_name(pod))),
        _ => Ok(false),
    }
}

/// Pods owned by `job_name`, retried with a linear backoff while none exist.
///
/// Returns an empty list once `attempts` are exhausted or the token is
/// cancelled; list failures are returned immediately.
pub async fn find_job_pods(
    cluster: &dyn ClusterClient,
    job_name: &str,
    attempts: u32,
    backoff: Duration,
    cancel: &CancelToken,
) -> anyhow::Result<Vec<Pod>> {
    let selector = job_selector(job_name);
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        let pods = cluster.list_pods(&selector).await?;
        if !pods.is_empty() {
            return Ok(pods);
        }
        if attempt == attempts {
            break;
        }

        debug!(job_name, attempt, "no pods yet, retrying");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(backoff * attempt) => {}
        }
    }

    warn!(job_name, attempts, "no pods found for job");
    Ok(Vec::new())
}

/// Logs of every container of `pod`, init containers first.
pub async fn collect_pod_logs(
    cluster: &dyn ClusterClient,
    pod: &Pod,
    tail_lines: Option<i64>,
) -> anyhow::Result<Vec<u8>> {
    let mut logs = Vec::new();
    for container in container_names(pod) {
        let chunk = cluster.pod_logs(pod_name(pod), &container, tail_lines).await?;
        logs.extend_from_slice(&chunk);
        if !chunk.is_empty() && !chunk.ends_with(b"\n") {
            logs.push(b'\n');
        }
    }
    Ok(logs)
}

/// Human readable reason of a pod failure.
///
/// A terminated container's message or reason wins, the latest cluster event
/// for the pod is the fallback.
pub async fn pod_error_message(cluster: &dyn ClusterClient, pod: &Pod) -> String {
    let terminated = pod
        .status
        .iter()
        .flat_map(|s| {
            s.init_container_statuses
                .iter()
                .flatten()
                .chain(s.container_statuses.iter().flatten())
        })
        .filter_map(|c| c.state.as_ref()?.terminated.as_ref())
        .filter(|t| t.exit_code != 0)
        .find_map(|t| {
            t.message
                .clone()
                .filter(|m| !m.is_empty())
                .or_else(|| t.reason.clone().filter(|r| !r.is_empty()))
        });
    if let Some(message) = terminated {
        return message;
    }

    match cluster.latest_event_message(pod_name(pod)).await {
        Ok(Some(message)) => message,
        Ok(None) => String::new(),
        Err(e) => {
            warn!(pod = %pod_name(pod), error = %e, "reading pod events failed");
            String::new()
        }
    }
}

/// Check `cond` immediately and then every `interval` until it holds.
///
/// Gives up after `timeout`, when the token is cancelled or when the
/// condition itself fails.
pub async fn poll_until<F, Fut>(
    interval: Duration,
    timeout: Duration,
    cancel: &CancelToken,
    what: &str,
    mut cond: F,
) -> Result<(), PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<bool>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled {
                what: what.to_string(),
            });
        }

        match cond().await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(source) => {
                return Err(PollError::Condition {
                    what: what.to_string(),
                    source,
                });
            }
        }

        if Instant::now() >= deadline {
            return Err(PollError::Timeout {
                what: what.to_string(),
                after: timeout,
            });
        }

        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
