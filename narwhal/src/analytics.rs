//! Anonymized usage telemetry for finished executions.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Event name reported for every finished execution.
pub const RUN_TEST_EVENT: &str = "narwhal_run_test";

/// Parameters of a run event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunParams {
    pub app_version: String,
    pub data_source: String,
    pub host: String,
    pub cluster_id: String,
    pub test_type: String,
    pub duration_ms: i64,
    pub status: String,
}

#[derive(Debug, Serialize)]
struct RunEvent<'a> {
    name: &'a str,
    params: &'a RunParams,
}

/// Sink for usage events. Failures are logged by the caller, never fatal.
#[async_trait]
pub trait UsageReporter: Send + Sync {
    async fn send_run_event(&self, name: &str, params: RunParams) -> anyhow::Result<()>;
}

/// Posts usage events as JSON to a collector endpoint.
#[derive(Clone, Debug)]
pub struct HttpUsageReporter {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpUsageReporter {
    pub fn new(endpoint: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("building usage telemetry client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl UsageReporter for HttpUsageReporter {
    async fn send_run_event(&self, name: &str, params: RunParams) -> anyhow::Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&RunEvent {
                name,
                params: &params,
            })
            .send()
            .await
            .with_context(|| format!("sending {name} event"))?;

        response
            .error_for_status()
            .with_context(|| format!("collector rejected {name} event"))?;
        debug!(event = name, "usage event sent");
        Ok(())
    }
}

/// Reporter used when telemetry is not configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopUsageReporter;

#[async_trait]
impl UsageReporter for NoopUsageReporter {
    async fn send_run_event(&self, _name: &str, _params: RunParams) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Host name of the machine, `localhost` when it cannot be read.
pub fn hostname() -> String {
    let name = gethostname::gethostname();
    if name.is_empty() {
        return "localhost".to_string();
    }
    name.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hostname_is_not_empty() {
        assert!(!hostname().is_empty());
    }

    #[test]
    fn test_run_event_payload_shape() {
        let params = RunParams {
            test_type: "k6/script".into(),
            status: "passed".into(),
            duration_ms: 1200,
            ..Default::default()
        };
        let json = serde_json::to_value(RunEvent {
            name: RUN_TEST_EVENT,
            params: &params,
        })
        .unwrap();

        assert_eq!(json["name"], RUN_TEST_EVENT);
        assert_eq!(json["params"]["test_type"], "k6/script");
        assert_eq!(json["params"]["duration_ms"], 1200);
    }

    #[tokio::test]
    async fn test_noop_reporter_accepts_everything() {
        NoopUsageReporter
            .send_run_event(RUN_TEST_EVENT, RunParams::default())
            .await
            .unwrap();
    }
}
