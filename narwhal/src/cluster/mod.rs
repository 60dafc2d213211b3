//! Access to the container cluster.
//!
//! The executor only talks to the cluster through [`ClusterClient`], so the
//! engine can be driven against a fake in tests.

mod kube_client;
pub mod pods;

use std::pin::Pin;

use async_trait::async_trait;
use futures::io::AsyncBufRead;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;

pub use kube_client::KubeClusterClient;

/// Follow-mode log stream of one container.
pub type LogStream = Pin<Box<dyn AsyncBufRead + Send>>;

/// Label every pod of a job carries.
pub const JOB_NAME_LABEL: &str = "job-name";

pub fn job_selector(job_name: &str) -> String {
    format!("{JOB_NAME_LABEL}={job_name}")
}

/// Namespaced operations on jobs, pods, logs and events.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn create_job(&self, job: &Job) -> anyhow::Result<()>;

    async fn list_jobs(&self, selector: &str) -> anyhow::Result<Vec<Job>>;

    /// Delete a job immediately, cascading to its pods in the background.
    async fn delete_job(&self, name: &str) -> anyhow::Result<()>;

    async fn list_pods(&self, selector: &str) -> anyhow::Result<Vec<Pod>>;

    async fn get_pod(&self, name: &str) -> anyhow::Result<Pod>;

    /// Fetch the logs of a pod container, optionally only the last lines.
    async fn pod_logs(
        &self,
        pod: &str,
        container: &str,
        tail_lines: Option<i64>,
    ) -> anyhow::Result<Vec<u8>>;

    /// Open a follow-mode log stream for a pod container.
    async fn stream_container_logs(
        &self,
        pod: &str,
        container: &str,
        tail_lines: Option<i64>,
    ) -> anyhow::Result<LogStream>;

    /// Message of the most recent event recorded for the named object.
    async fn latest_event_message(&self, object_name: &str) -> anyhow::Result<Option<String>>;
}
