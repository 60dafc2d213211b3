//! Clients for the custom resources an execution reports back to.
//!
//! The engine only needs to read a resource and write its status; the
//! control plane owning these resources is out of reach of this crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::execution::{Execution, ExecutionStatus};

/// Condensed view of an execution stored on the owning Test resource.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub id: String,
    pub number: i32,
    pub status: ExecutionStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl From<&Execution> for ExecutionSummary {
    fn from(execution: &Execution) -> Self {
        Self {
            id: execution.id.clone(),
            number: execution.number,
            status: execution.status(),
            start_time: execution.execution_result.start_time,
            end_time: execution.execution_result.end_time,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TestStatus {
    pub latest_execution: Option<ExecutionSummary>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TestResource {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub status: TestStatus,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TestExecutionStatus {
    pub latest_execution: Option<Execution>,
    pub generation: i64,
}

/// A TestExecution resource: one externally triggered run of a test.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TestExecutionResource {
    pub name: String,
    pub namespace: String,
    pub generation: i64,
    #[serde(default)]
    pub status: TestExecutionStatus,
}

impl TestExecutionResource {
    /// Copy the execution into the status and mark it as observed.
    pub fn record(&mut self, execution: &Execution) {
        self.status.latest_execution = Some(execution.clone());
        self.status.generation = self.generation;
    }
}

#[async_trait]
pub trait TestsClient: Send + Sync {
    async fn get(&self, name: &str) -> anyhow::Result<TestResource>;
    async fn update_status(&self, test: &TestResource) -> anyhow::Result<()>;
}

#[async_trait]
pub trait TestExecutionsClient: Send + Sync {
    async fn get(&self, name: &str) -> anyhow::Result<TestExecutionResource>;
    async fn update_status(&self, test_execution: &TestExecutionResource) -> anyhow::Result<()>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateType {
    Job,
    Container,
    Cronjob,
    Scraper,
    Pvc,
}

/// A named template stored in the cluster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: Option<TemplateType>,
    pub body: String,
}

impl Template {
    pub fn is_job(&self) -> bool {
        self.kind == Some(TemplateType::Job)
    }
}

#[async_trait]
pub trait TemplatesClient: Send + Sync {
    async fn get(&self, name: &str) -> anyhow::Result<Template>;
}

/// Installation-wide settings.
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    async fn telemetry_enabled(&self) -> anyhow::Result<bool>;
    async fn unique_cluster_id(&self) -> anyhow::Result<String>;
}
