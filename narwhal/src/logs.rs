//! Follow-mode tailing of pod container logs.

use std::sync::Arc;

use futures::AsyncBufReadExt;
use k8s_openapi::api::core::v1::Pod;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, warn};

use crate::cluster::pods::{container_names, pod_name};
use crate::cluster::{ClusterClient, LogStream};
use crate::executor::{CancelToken, ExecutionScope};
use crate::telemetry;

const LOG_CHANNEL_CAPACITY: usize = 256;

/// Only the most recent existing line is replayed when a stream attaches.
const TAIL_LINES: i64 = 1;

/// Stream the lines of every container of `pod` onto one channel.
///
/// Containers are read one after another, init containers first, so lines of
/// one container never interleave with another's. A container whose stream
/// cannot be opened is skipped. The channel closes once every stream ended
/// or the scope was cancelled.
///
/// Reattaching replays the last existing line, so a consumer may see a line
/// twice across reconnects.
pub fn tail_pod_logs(
    cluster: Arc<dyn ClusterClient>,
    pod: &Pod,
    scope: &ExecutionScope,
) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel(LOG_CHANNEL_CAPACITY);
    let name = pod_name(pod).to_string();
    let containers = container_names(pod);
    let token = scope.token().clone();
    let span = telemetry::tail_span(&name);

    scope.spawn(
        async move {
            for container in containers {
                let stream = match cluster
                    .stream_container_logs(&name, &container, Some(TAIL_LINES))
                    .await
                {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!(container = %container, error = %e, "opening log stream failed");
                        continue;
                    }
                };

                debug!(container = %container, "tailing container logs");
                if !forward_lines(stream, &tx, &token).await {
                    break;
                }
            }
            debug!("log tail finished");
        }
        .instrument(span),
    );

    rx
}

/// Forward complete lines until the stream ends. Returns `false` when the
/// consumer is gone or the token was cancelled.
async fn forward_lines(
    mut stream: LogStream,
    tx: &mpsc::Sender<Vec<u8>>,
    token: &CancelToken,
) -> bool {
    loop {
        let mut line = Vec::new();
        let read = tokio::select! {
            _ = token.cancelled() => return false,
            read = stream.read_until(b'\n', &mut line) => read,
        };

        match read {
            Ok(0) => return true,
            Ok(_) => {
                while matches!(line.last(), Some(b'\n' | b'\r')) {
                    line.pop();
                }
                if tx.send(line).await.is_err() {
                    return false;
                }
            }
            Err(e) => {
                warn!(error = %e, "log stream read failed");
                return true;
            }
        }
    }
}
