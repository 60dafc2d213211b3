use anyhow::Context;
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::io::AsyncRead;
use futures::{AsyncReadExt, SinkExt, TryStreamExt};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Event, Pod};
use kube::Client;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams, PropagationPolicy};
use tokio::sync::oneshot;
use tracing::debug;

use super::{ClusterClient, LogStream};

const LOG_CHUNK_BUFFER: usize = 16;
const LOG_READ_SIZE: usize = 8 * 1024;

/// [`ClusterClient`] backed by the Kubernetes API, bound to one namespace.
#[derive(Clone)]
pub struct KubeClusterClient {
    namespace: String,
    jobs: Api<Job>,
    pods: Api<Pod>,
    events: Api<Event>,
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient")
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl KubeClusterClient {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            jobs: Api::namespaced(client.clone(), &namespace),
            pods: Api::namespaced(client.clone(), &namespace),
            events: Api::namespaced(client, &namespace),
            namespace,
        }
    }

    /// Connect using the in-cluster or local kubeconfig.
    pub async fn try_default(namespace: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::try_default()
            .await
            .context("creating kubernetes client")?;
        Ok(Self::new(client, namespace))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn create_job(&self, job: &Job) -> anyhow::Result<()> {
        let name = job.metadata.name.as_deref().unwrap_or_default();
        self.jobs
            .create(&PostParams::default(), job)
            .await
            .with_context(|| format!("creating job {name}"))?;
        debug!(job_name = %name, namespace = %self.namespace, "job created");
        Ok(())
    }

    async fn list_jobs(&self, selector: &str) -> anyhow::Result<Vec<Job>> {
        let jobs = self
            .jobs
            .list(&ListParams::default().labels(selector))
            .await
            .with_context(|| format!("listing jobs {selector}"))?;
        Ok(jobs.items)
    }

    async fn delete_job(&self, name: &str) -> anyhow::Result<()> {
        let params = DeleteParams {
            grace_period_seconds: Some(0),
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };
        self.jobs
            .delete(name, &params)
            .await
            .with_context(|| format!("deleting job {name}"))?;
        Ok(())
    }

    async fn list_pods(&self, selector: &str) -> anyhow::Result<Vec<Pod>> {
        let pods = self
            .pods
            .list(&ListParams::default().labels(selector))
            .await
            .with_context(|| format!("listing pods {selector}"))?;
        Ok(pods.items)
    }

    async fn get_pod(&self, name: &str) -> anyhow::Result<Pod> {
        self.pods
            .get(name)
            .await
            .with_context(|| format!("getting pod {name}"))
    }

    async fn pod_logs(
        &self,
        pod: &str,
        container: &str,
        tail_lines: Option<i64>,
    ) -> anyhow::Result<Vec<u8>> {
        let params = LogParams {
            container: Some(container.to_string()),
            tail_lines,
            ..Default::default()
        };
        let logs = self
            .pods
            .logs(pod, &params)
            .await
            .with_context(|| format!("reading logs of {pod}/{container}"))?;
        Ok(logs.into_bytes())
    }

    async fn stream_container_logs(
        &self,
        pod: &str,
        container: &str,
        tail_lines: Option<i64>,
    ) -> anyhow::Result<LogStream> {
        let params = LogParams {
            container: Some(container.to_string()),
            follow: true,
            tail_lines,
            ..Default::default()
        };

        // the api stream borrows its request, so a task owning both pumps it
        // into a channel-backed reader
        let (ready_tx, ready_rx) = oneshot::channel::<anyhow::Result<()>>();
        let (chunks_tx, chunks_rx) = mpsc::channel::<std::io::Result<Vec<u8>>>(LOG_CHUNK_BUFFER);
        let pods = self.pods.clone();
        let target = format!("{pod}/{container}");
        let pod = pod.to_string();

        tokio::spawn(async move {
            let stream = match pods.log_stream(&pod, &params).await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e.into()));
                    return;
                }
            };
            pump(stream, chunks_tx).await;
        });

        ready_rx
            .await
            .context("log stream task stopped")?
            .with_context(|| format!("streaming logs of {target}"))?;
        Ok(Box::pin(chunks_rx.into_async_read()))
    }

    async fn latest_event_message(&self, object_name: &str) -> anyhow::Result<Option<String>> {
        let params = ListParams::default().fields(&format!("involvedObject.name={object_name}"));
        let events = self
            .events
            .list(&params)
            .await
            .with_context(|| format!("listing events of {object_name}"))?;

        let latest = events
            .items
            .into_iter()
            .filter(|e| e.message.as_deref().is_some_and(|m| !m.is_empty()))
            .max_by_key(|e| {
                e.last_timestamp
                    .as_ref()
                    .or(e.metadata.creation_timestamp.as_ref())
                    .map(|t| t.0)
            });
        Ok(latest.and_then(|e| e.message))
    }
}

async fn pump<R>(stream: R, mut chunks: mpsc::Sender<std::io::Result<Vec<u8>>>)
where
    R: AsyncRead,
{
    futures::pin_mut!(stream);
    let mut buf = vec![0u8; LOG_READ_SIZE];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => return,
            Ok(n) => {
                if chunks.send(Ok(buf[..n].to_vec())).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = chunks.send(Err(e)).await;
                return;
            }
        }
    }
}
