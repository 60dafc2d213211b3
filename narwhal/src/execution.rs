use std::collections::BTreeMap;
use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a test execution.
///
/// `Queued -> Running -> {Passed, Failed, Aborted, Timeout, Canceled}`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Queued,
    Running,
    Passed,
    Failed,
    Aborted,
    Timeout,
    Canceled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Queued => "queued",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Passed => "passed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Aborted => "aborted",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Queued | ExecutionStatus::Running)
    }

    /// Statuses forced onto an execution from outside the normal completion
    /// path. Once persisted they are never overwritten by a later finalization.
    pub fn is_forced_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Canceled | ExecutionStatus::Timeout | ExecutionStatus::Aborted
        )
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(ExecutionStatus::Queued),
            "running" => Some(ExecutionStatus::Running),
            "passed" => Some(ExecutionStatus::Passed),
            "failed" => Some(ExecutionStatus::Failed),
            "aborted" => Some(ExecutionStatus::Aborted),
            "timeout" => Some(ExecutionStatus::Timeout),
            "canceled" => Some(ExecutionStatus::Canceled),
            _ => None,
        }
    }
}

impl Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized outcome of an execution.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: i64,
}

impl ExecutionResult {
    pub fn with_status(status: ExecutionStatus) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    /// A fresh result for a workload that has just been scheduled.
    pub fn running() -> Self {
        Self {
            status: ExecutionStatus::Running,
            start_time: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn aborted() -> Self {
        Self::with_status(ExecutionStatus::Aborted)
    }

    pub fn timed_out() -> Self {
        Self::with_status(ExecutionStatus::Timeout)
    }

    /// Marks the result failed with the given error message.
    pub fn err(mut self, message: impl Display) -> Self {
        self.status = ExecutionStatus::Failed;
        self.error_message = message.to_string();
        self
    }

    pub fn is_failed(&self) -> bool {
        self.status == ExecutionStatus::Failed
    }

    pub fn is_aborted(&self) -> bool {
        self.status == ExecutionStatus::Aborted
    }

    pub fn is_timeout(&self) -> bool {
        self.status == ExecutionStatus::Timeout
    }

    pub fn append_output(&mut self, trailer: &str) {
        self.output.push('\n');
        self.output.push_str(trailer);
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    #[default]
    Basic,
    Secret,
}

/// Reference to a key inside a cluster secret.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SecretRef {
    #[serde(default)]
    pub namespace: String,
    pub name: String,
    pub key: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, rename = "type")]
    pub kind: VariableType,
    #[serde(default)]
    pub secret_ref: Option<SecretRef>,
}

impl Variable {
    pub fn basic(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            kind: VariableType::Basic,
            secret_ref: None,
        }
    }

    pub fn secret(name: impl Into<String>, secret_ref: SecretRef) -> Self {
        Self {
            name: name.into(),
            value: String::new(),
            kind: VariableType::Secret,
            secret_ref: Some(secret_ref),
        }
    }

    pub fn is_secret(&self) -> bool {
        self.kind == VariableType::Secret
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub working_dir: String,
}

/// Where the runner fetches the test content from.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub repository: Option<Repository>,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub uri: String,
}

impl Content {
    pub fn is_git(&self) -> bool {
        matches!(self.kind.as_str(), "git" | "git-dir" | "git-file")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRequest {
    #[serde(default)]
    pub storage_class_name: String,
    #[serde(default)]
    pub volume_mount_path: String,
    #[serde(default)]
    pub storage_bucket: String,
}

/// A single run of a test.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub test_name: String,
    #[serde(default)]
    pub test_execution_name: String,
    #[serde(default)]
    pub test_namespace: String,
    #[serde(default)]
    pub test_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub number: i32,
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub variables: BTreeMap<String, Variable>,
    #[serde(default)]
    pub artifact_request: Option<ArtifactRequest>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub execution_result: ExecutionResult,
}

impl Execution {
    pub fn new(id: impl Into<String>, test_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            test_name: test_name.into(),
            ..Default::default()
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        self.execution_result.status
    }

    pub fn is_canceled(&self) -> bool {
        self.status() == ExecutionStatus::Canceled
    }

    pub fn is_timeout(&self) -> bool {
        self.status() == ExecutionStatus::Timeout
    }

    /// Stamps the end time and duration on the current result.
    pub fn stop(&mut self) {
        let end = Utc::now();
        let result = &mut self.execution_result;
        let start = *result.start_time.get_or_insert(end);
        result.end_time = Some(end);
        result.duration_ms = (end - start).num_milliseconds().max(0);
    }

    pub fn duration_ms(&self) -> i64 {
        self.execution_result.duration_ms
    }
}

/// Per-run request settings coming from the caller.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    #[serde(default)]
    pub negative_test: bool,
    #[serde(default)]
    pub sync: bool,
    #[serde(default)]
    pub envs: BTreeMap<String, String>,
    #[serde(default)]
    pub secret_envs: BTreeMap<String, String>,
    #[serde(default)]
    pub http_proxy: String,
    #[serde(default)]
    pub https_proxy: String,
    #[serde(default)]
    pub active_deadline_seconds: i64,
    /// Extension overlay merged onto the base job template.
    #[serde(default)]
    pub job_template: String,
    #[serde(default)]
    pub job_template_reference: String,
}

/// Settings of the executor type that runs a test.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutorSpec {
    pub image: String,
    #[serde(default)]
    pub job_template: String,
    #[serde(default)]
    pub job_template_reference: String,
}

/// Everything `JobExecutor::execute` needs besides the execution itself.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteOptions {
    pub test_name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub test_type: String,
    #[serde(default)]
    pub executor_name: String,
    pub executor_spec: ExecutorSpec,
    #[serde(default)]
    pub request: ExecutionRequest,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub image_override: String,
    #[serde(default)]
    pub image_pull_secret_names: Vec<String>,
    #[serde(default)]
    pub username_secret: Option<SecretRef>,
    #[serde(default)]
    pub token_secret: Option<SecretRef>,
    #[serde(default)]
    pub certificate_secret: String,
}
