use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobStatus};
use k8s_openapi::api::core::v1::Pod;
use narwhal::cluster::{ClusterClient, JOB_NAME_LABEL, LogStream};
use parking_lot::Mutex;

/// In-memory cluster.
///
/// Pods, logs, job statuses and events are seeded by the test; created and
/// deleted jobs are recorded. Log streams replay the seeded bytes and end.
#[derive(Clone, Default)]
pub struct FakeCluster {
    inner: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    created: Vec<Job>,
    deleted: Vec<String>,
    job_statuses: HashMap<String, JobStatus>,
    pods: BTreeMap<String, Pod>,
    logs: HashMap<(String, String), Vec<u8>>,
    events: HashMap<String, String>,
    fail_create: Option<String>,
    fail_delete: Option<String>,
    fail_list_pods: Option<String>,
    fail_list_jobs: Option<String>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a pod.
    pub fn add_pod(&self, pod: Pod) {
        let name = pod.metadata.name.clone().unwrap_or_default();
        self.inner.lock().pods.insert(name, pod);
    }

    /// Seed the logs of one container.
    pub fn set_logs(&self, pod: &str, container: &str, logs: impl Into<Vec<u8>>) {
        self.inner
            .lock()
            .logs
            .insert((pod.to_string(), container.to_string()), logs.into());
    }

    /// Set the status reported for job `name`.
    pub fn set_job_status(&self, name: &str, status: JobStatus) {
        self.inner
            .lock()
            .job_statuses
            .insert(name.to_string(), status);
    }

    pub fn set_event(&self, object_name: &str, message: &str) {
        self.inner
            .lock()
            .events
            .insert(object_name.to_string(), message.to_string());
    }

    pub fn fail_create(&self, message: &str) {
        self.inner.lock().fail_create = Some(message.to_string());
    }

    pub fn fail_delete(&self, message: &str) {
        self.inner.lock().fail_delete = Some(message.to_string());
    }

    pub fn fail_list_pods(&self, message: &str) {
        self.inner.lock().fail_list_pods = Some(message.to_string());
    }

    pub fn fail_list_jobs(&self, message: &str) {
        self.inner.lock().fail_list_jobs = Some(message.to_string());
    }

    pub fn created_jobs(&self) -> Vec<Job> {
        self.inner.lock().created.clone()
    }

    pub fn deleted_jobs(&self) -> Vec<String> {
        self.inner.lock().deleted.clone()
    }

    pub fn assert_created_count_eq(&self, expected: usize) {
        let actual = self.inner.lock().created.len();
        assert_eq!(actual, expected, "Expected {expected} created jobs, got {actual}");
    }
}

fn selected_name(selector: &str) -> Option<&str> {
    selector.strip_prefix(JOB_NAME_LABEL)?.strip_prefix('=')
}

fn has_job_label(labels: Option<&BTreeMap<String, String>>, job_name: &str) -> bool {
    labels
        .and_then(|labels| labels.get(JOB_NAME_LABEL))
        .is_some_and(|name| name == job_name)
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn create_job(&self, job: &Job) -> anyhow::Result<()> {
        let mut state = self.inner.lock();
        if let Some(message) = &state.fail_create {
            anyhow::bail!("{message}");
        }
        state.created.push(job.clone());
        Ok(())
    }

    async fn list_jobs(&self, selector: &str) -> anyhow::Result<Vec<Job>> {
        let state = self.inner.lock();
        if let Some(message) = &state.fail_list_jobs {
            anyhow::bail!("{message}");
        }
        let wanted = selected_name(selector);
        Ok(state
            .created
            .iter()
            .filter(|job| !state.deleted.iter().any(|d| Some(d) == job.metadata.name.as_ref()))
            .filter(|job| wanted.is_none_or(|name| has_job_label(job.metadata.labels.as_ref(), name)))
            .map(|job| {
                let mut job = job.clone();
                let name = job.metadata.name.clone().unwrap_or_default();
                job.status = state.job_statuses.get(&name).cloned();
                job
            })
            .collect())
    }

    async fn delete_job(&self, name: &str) -> anyhow::Result<()> {
        let mut state = self.inner.lock();
        if let Some(message) = &state.fail_delete {
            anyhow::bail!("{message}");
        }
        state.deleted.push(name.to_string());
        Ok(())
    }

    async fn list_pods(&self, selector: &str) -> anyhow::Result<Vec<Pod>> {
        let state = self.inner.lock();
        if let Some(message) = &state.fail_list_pods {
            anyhow::bail!("{message}");
        }
        let wanted = selected_name(selector);
        Ok(state
            .pods
            .values()
            .filter(|pod| wanted.is_none_or(|name| has_job_label(pod.metadata.labels.as_ref(), name)))
            .cloned()
            .collect())
    }

    async fn get_pod(&self, name: &str) -> anyhow::Result<Pod> {
        self.inner
            .lock()
            .pods
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("pod {name} not found"))
    }

    async fn pod_logs(
        &self,
        pod: &str,
        container: &str,
        tail_lines: Option<i64>,
    ) -> anyhow::Result<Vec<u8>> {
        let logs = self
            .inner
            .lock()
            .logs
            .get(&(pod.to_string(), container.to_string()))
            .cloned()
            .unwrap_or_default();

        let Some(tail) = tail_lines else {
            return Ok(logs);
        };
        let text = String::from_utf8_lossy(&logs);
        let lines: Vec<&str> = text.lines().collect();
        let skip = lines.len().saturating_sub(tail.max(0) as usize);
        Ok(lines[skip..].join("\n").into_bytes())
    }

    async fn stream_container_logs(
        &self,
        pod: &str,
        container: &str,
        _tail_lines: Option<i64>,
    ) -> anyhow::Result<LogStream> {
        let logs = self
            .inner
            .lock()
            .logs
            .get(&(pod.to_string(), container.to_string()))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("container {pod}/{container} not found"))?;
        Ok(Box::pin(futures::io::Cursor::new(logs)))
    }

    async fn latest_event_message(&self, object_name: &str) -> anyhow::Result<Option<String>> {
        Ok(self.inner.lock().events.get(object_name).cloned())
    }
}
