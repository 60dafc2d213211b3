use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use narwhal::{
    ConfigRepository, Execution, ExecutionRepository, ExecutionResult, Template, TemplatesClient,
    TestExecutionResource, TestExecutionsClient, TestResource, TestsClient,
};
use parking_lot::Mutex;

/// Execution store with the same conditional write rules as a real one.
#[derive(Clone, Default)]
pub struct InMemoryExecutionRepository {
    records: Arc<Mutex<HashMap<String, Execution>>>,
    end_writes: Arc<Mutex<usize>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record unconditionally.
    pub fn insert(&self, execution: Execution) {
        self.records.lock().insert(execution.id.clone(), execution);
    }

    pub fn record(&self, id: &str) -> Option<Execution> {
        self.records.lock().get(id).cloned()
    }

    /// Number of applied terminal writes.
    pub fn end_writes(&self) -> usize {
        *self.end_writes.lock()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn get(&self, id: &str) -> anyhow::Result<Execution> {
        self.record(id)
            .ok_or_else(|| anyhow::anyhow!("execution {id} not found"))
    }

    async fn end_execution(&self, execution: &Execution) -> anyhow::Result<bool> {
        let mut records = self.records.lock();
        if records
            .get(&execution.id)
            .is_some_and(|saved| saved.status().is_forced_terminal())
        {
            return Ok(false);
        }
        records.insert(execution.id.clone(), execution.clone());
        *self.end_writes.lock() += 1;
        Ok(true)
    }

    async fn update_result(&self, id: &str, result: &ExecutionResult) -> anyhow::Result<bool> {
        let mut records = self.records.lock();
        let Some(saved) = records.get_mut(id) else {
            anyhow::bail!("execution {id} not found");
        };
        if saved.status().is_forced_terminal() {
            return Ok(false);
        }
        saved.execution_result = result.clone();
        Ok(true)
    }
}

/// Test resources keyed by name; unknown names are created on first read.
#[derive(Clone, Default)]
pub struct InMemoryTests {
    tests: Arc<Mutex<HashMap<String, TestResource>>>,
    fail_updates: Arc<Mutex<bool>>,
}

impl InMemoryTests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn test(&self, name: &str) -> Option<TestResource> {
        self.tests.lock().get(name).cloned()
    }

    pub fn fail_updates(&self) {
        *self.fail_updates.lock() = true;
    }
}

#[async_trait]
impl TestsClient for InMemoryTests {
    async fn get(&self, name: &str) -> anyhow::Result<TestResource> {
        Ok(self
            .tests
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| TestResource {
                name: name.to_string(),
                ..Default::default()
            })
            .clone())
    }

    async fn update_status(&self, test: &TestResource) -> anyhow::Result<()> {
        if *self.fail_updates.lock() {
            anyhow::bail!("test {} status update rejected", test.name);
        }
        self.tests.lock().insert(test.name.clone(), test.clone());
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryTestExecutions {
    resources: Arc<Mutex<HashMap<String, TestExecutionResource>>>,
}

impl InMemoryTestExecutions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, resource: TestExecutionResource) {
        self.resources.lock().insert(resource.name.clone(), resource);
    }

    pub fn resource(&self, name: &str) -> Option<TestExecutionResource> {
        self.resources.lock().get(name).cloned()
    }
}

#[async_trait]
impl TestExecutionsClient for InMemoryTestExecutions {
    async fn get(&self, name: &str) -> anyhow::Result<TestExecutionResource> {
        self.resource(name)
            .ok_or_else(|| anyhow::anyhow!("test execution {name} not found"))
    }

    async fn update_status(&self, test_execution: &TestExecutionResource) -> anyhow::Result<()> {
        self.insert(test_execution.clone());
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryTemplates {
    templates: Arc<Mutex<HashMap<String, Template>>>,
}

impl InMemoryTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, template: Template) {
        self.templates.lock().insert(template.name.clone(), template);
    }
}

#[async_trait]
impl TemplatesClient for InMemoryTemplates {
    async fn get(&self, name: &str) -> anyhow::Result<Template> {
        self.templates
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("template {name} not found"))
    }
}

/// Fixed installation settings.
#[derive(Clone, Debug)]
pub struct StaticSettings {
    pub telemetry_enabled: bool,
    pub cluster_id: String,
}

impl Default for StaticSettings {
    fn default() -> Self {
        Self {
            telemetry_enabled: true,
            cluster_id: "cluster-test".to_string(),
        }
    }
}

#[async_trait]
impl ConfigRepository for StaticSettings {
    async fn telemetry_enabled(&self) -> anyhow::Result<bool> {
        Ok(self.telemetry_enabled)
    }

    async fn unique_cluster_id(&self) -> anyhow::Result<String> {
        Ok(self.cluster_id.clone())
    }
}
