use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use k8s_openapi::api::core::v1::EnvVar;
use serde::{Deserialize, Serialize};

/// Job template used when neither the executor nor the request supplies one.
pub const DEFAULT_JOB_TEMPLATE: &str = include_str!("../templates/job.yml");

/// Object storage settings forwarded to every runner container.
///
/// Each populated field becomes a `RUNNER_*` environment variable on the
/// workload containers.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerEnv {
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub token: String,
    pub ssl: bool,
    pub scraper_enabled: bool,
    pub data_dir: String,
    pub cloud_mode: bool,
}

impl RunnerEnv {
    /// Render the storage settings as container environment variables.
    pub fn env_vars(&self) -> Vec<EnvVar> {
        let pairs = [
            ("RUNNER_ENDPOINT", self.endpoint.clone()),
            ("RUNNER_ACCESSKEYID", self.access_key_id.clone()),
            ("RUNNER_SECRETACCESSKEY", self.secret_access_key.clone()),
            ("RUNNER_REGION", self.region.clone()),
            ("RUNNER_TOKEN", self.token.clone()),
            ("RUNNER_SSL", self.ssl.to_string()),
            ("RUNNER_SCRAPPERENABLED", self.scraper_enabled.to_string()),
            ("RUNNER_DATADIR", self.data_dir.clone()),
            ("RUNNER_CLOUD_MODE", self.cloud_mode.to_string()),
        ];

        pairs
            .into_iter()
            .map(|(name, value)| EnvVar {
                name: name.to_string(),
                value: Some(value),
                value_from: None,
            })
            .collect()
    }
}

/// Configuration for [`JobExecutor`](crate::executor::JobExecutor).
///
/// Loadable from TOML; every field has a default so partial files work.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Namespace jobs are created in.
    pub namespace: String,
    /// Service account attached to job pods.
    pub service_account_name: String,
    /// Image of the init container that fetches test content.
    pub init_image: String,
    /// Optional registry prefix for images referenced by templates.
    pub registry: String,
    /// Base job template used when the executor spec has none.
    pub job_template: String,
    /// Upper bound for a pod to become loggable, in milliseconds.
    pub pod_start_timeout_ms: u64,
    /// Interval between pod state polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Ceiling for waiting on a pod to finish, in milliseconds.
    pub poll_timeout_ms: u64,
    /// Interval of the timeout monitor, in milliseconds.
    pub monitor_interval_ms: u64,
    /// Attempts made to find the pods of a freshly created job.
    pub pod_lookup_attempts: u32,
    /// Linear backoff step between pod lookup attempts, in milliseconds.
    pub pod_lookup_backoff_ms: u64,
    /// Identity of the cluster injected into runners.
    pub cluster_id: String,
    /// Dashboard base URI attached to execution metrics.
    pub dashboard_uri: String,
    /// Bucket used when the artifact request does not name one.
    pub default_storage_bucket: String,
    /// Storage settings forwarded to runners.
    pub runner: RunnerEnv,
    /// Endpoint receiving anonymized run events.
    pub usage_endpoint: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            service_account_name: String::new(),
            init_image: "narwhal/init-executor:latest".to_string(),
            registry: String::new(),
            job_template: DEFAULT_JOB_TEMPLATE.to_string(),
            pod_start_timeout_ms: 30 * 60 * 1000,
            poll_interval_ms: 200,
            poll_timeout_ms: 24 * 60 * 60 * 1000,
            monitor_interval_ms: 1000,
            pod_lookup_attempts: 10,
            pod_lookup_backoff_ms: 500,
            cluster_id: String::new(),
            dashboard_uri: String::new(),
            default_storage_bucket: String::new(),
            runner: RunnerEnv::default(),
            usage_endpoint: String::new(),
        }
    }
}

impl ExecutorConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("parsing executor config")
    }

    /// Read and parse a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading executor config {}", path.display()))?;
        Self::from_toml_str(&text)
    }

    /// Apply overrides from the process environment.
    ///
    /// `STORAGE_BUCKET` fills the default bucket, `STORAGE_*` the runner
    /// storage settings, `NARWHAL_NAMESPACE` and `NARWHAL_CLUSTER_ID` the
    /// identity fields.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |target: &mut String, key: &str| {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *target = value;
            }
        };

        set(&mut self.namespace, "NARWHAL_NAMESPACE");
        set(&mut self.cluster_id, "NARWHAL_CLUSTER_ID");
        set(&mut self.default_storage_bucket, "STORAGE_BUCKET");
        set(&mut self.runner.endpoint, "STORAGE_ENDPOINT");
        set(&mut self.runner.access_key_id, "STORAGE_ACCESSKEYID");
        set(&mut self.runner.secret_access_key, "STORAGE_SECRETACCESSKEY");
        set(&mut self.runner.region, "STORAGE_REGION");
        set(&mut self.runner.token, "STORAGE_TOKEN");

        if let Some(ssl) = lookup("STORAGE_SSL").and_then(|v| v.parse().ok()) {
            self.runner.ssl = ssl;
        }
        self
    }

    pub fn pod_start_timeout(&self) -> Duration {
        Duration::from_millis(self.pod_start_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn pod_lookup_backoff(&self) -> Duration {
        Duration::from_millis(self.pod_lookup_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults_match_polling_discipline() {
        let config = ExecutorConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(200));
        assert_eq!(config.poll_timeout(), Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.monitor_interval(), Duration::from_secs(1));
        assert_eq!(config.pod_lookup_attempts, 10);
        assert!(config.job_template.contains("kind: Job"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ExecutorConfig::from_toml_str(
            r#"
            namespace = "testing"
            cluster_id = "cluster-1"

            [runner]
            endpoint = "minio:9000"
            ssl = true
            "#,
        )
        .unwrap();

        assert_eq!(config.namespace, "testing");
        assert_eq!(config.cluster_id, "cluster-1");
        assert_eq!(config.runner.endpoint, "minio:9000");
        assert!(config.runner.ssl);
        assert_eq!(config.poll_interval_ms, 200);
    }

    #[test]
    fn test_from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("narwhal.toml");
        std::fs::write(&path, "namespace = \"from-file\"\n").unwrap();

        let config = ExecutorConfig::from_file(&path).unwrap();
        assert_eq!(config.namespace, "from-file");
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(ExecutorConfig::from_toml_str("namespace = [").is_err());
    }

    #[test]
    fn test_overrides_fill_bucket_and_storage() {
        let env: HashMap<&str, &str> = [
            ("STORAGE_BUCKET", "artifacts"),
            ("STORAGE_ENDPOINT", "s3.local"),
            ("STORAGE_SSL", "true"),
            ("NARWHAL_NAMESPACE", ""),
        ]
        .into_iter()
        .collect();

        let config = ExecutorConfig::default()
            .with_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.default_storage_bucket, "artifacts");
        assert_eq!(config.runner.endpoint, "s3.local");
        assert!(config.runner.ssl);
        // empty values do not override
        assert_eq!(config.namespace, "default");
    }

    #[test]
    fn test_runner_env_vars_are_prefixed() {
        let vars = RunnerEnv {
            endpoint: "minio:9000".into(),
            ..Default::default()
        }
        .env_vars();

        assert!(vars.iter().all(|v| v.name.starts_with("RUNNER_")));
        let endpoint = vars.iter().find(|v| v.name == "RUNNER_ENDPOINT").unwrap();
        assert_eq!(endpoint.value.as_deref(), Some("minio:9000"));
    }
}
