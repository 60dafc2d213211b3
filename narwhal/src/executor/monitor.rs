use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::CancelToken;
use crate::cluster::{ClusterClient, job_selector};

/// Reason the cluster sets on a job killed by its active deadline.
pub const DEADLINE_EXCEEDED: &str = "DeadlineExceeded";

/// Receives jobs that ran past their deadline.
#[async_trait]
pub trait TimeoutHandler: Send + Sync {
    async fn on_timeout(&self, job_name: &str);
}

/// Why a monitor stopped.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MonitorOutcome {
    Succeeded,
    Failed,
    TimedOut,
    Gone,
    Cancelled,
    Error,
}

/// Watches one job and turns a deadline kill into timeout finalization.
pub struct TimeoutMonitor {
    cluster: Arc<dyn ClusterClient>,
    handler: Arc<dyn TimeoutHandler>,
    interval: Duration,
}

impl std::fmt::Debug for TimeoutMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutMonitor")
            .field("interval", &self.interval)
            .finish()
    }
}

impl TimeoutMonitor {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        handler: Arc<dyn TimeoutHandler>,
        interval: Duration,
    ) -> Self {
        Self {
            cluster,
            handler,
            interval,
        }
    }

    /// Poll the job once per interval until it settles.
    ///
    /// The handler is called at most once, and only when the job failed
    /// because its deadline was exceeded.
    pub async fn run(&self, job_name: &str, cancel: &CancelToken) -> MonitorOutcome {
        let selector = job_selector(job_name);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return MonitorOutcome::Cancelled,
                _ = ticker.tick() => {}
            }

            let jobs = match self.cluster.list_jobs(&selector).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    warn!(job_name, error = %e, "listing jobs failed, monitor stopped");
                    return MonitorOutcome::Error;
                }
            };

            let Some(outcome) = evaluate(&jobs) else {
                continue;
            };

            if outcome == MonitorOutcome::TimedOut {
                if cancel.is_cancelled() {
                    return MonitorOutcome::Cancelled;
                }
                info!(job_name, "job exceeded its deadline");
                self.handler.on_timeout(job_name).await;
            }
            debug!(job_name, ?outcome, "monitor finished");
            return outcome;
        }
    }
}

/// Decide from the listed jobs whether monitoring is over.
fn evaluate(jobs: &[Job]) -> Option<MonitorOutcome> {
    if jobs.is_empty() {
        return Some(MonitorOutcome::Gone);
    }

    for job in jobs {
        let Some(status) = job.status.as_ref() else {
            continue;
        };
        if status.succeeded.unwrap_or_default() > 0 {
            return Some(MonitorOutcome::Succeeded);
        }
        if status.failed.unwrap_or_default() > 0 {
            let deadline = status
                .conditions
                .iter()
                .flatten()
                .any(|c| c.reason.as_deref() == Some(DEADLINE_EXCEEDED));
            return Some(if deadline {
                MonitorOutcome::TimedOut
            } else {
                MonitorOutcome::Failed
            });
        }
    }
    None
}
