use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};
use k8s_openapi::api::core::v1::{
    Container, ContainerState, ContainerStateRunning, ContainerStateTerminated, ContainerStatus,
    Pod, PodSpec, PodStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use narwhal::{
    DEADLINE_EXCEEDED, ExecuteOptions, Execution, ExecutionResult, ExecutionStatus,
    ExecutorConfig, ExecutorSpec, JobExecutor, JobExecutorBuilder,
};
use serde_json::json;

use crate::cluster::FakeCluster;
use crate::mock::{RecordingCounter, RecordingEmitter, RecordingUsageReporter};
use crate::repository::{
    InMemoryExecutionRepository, InMemoryTemplates, InMemoryTestExecutions, InMemoryTests,
    StaticSettings,
};

pub fn execution(id: &str) -> Execution {
    Execution {
        test_type: "k6/script".to_string(),
        name: format!("t1-{id}"),
        number: 1,
        ..Execution::new(id, "t1")
    }
}

pub fn execute_options() -> ExecuteOptions {
    ExecuteOptions {
        test_name: "t1".to_string(),
        namespace: "tests".to_string(),
        test_type: "k6/script".to_string(),
        executor_name: "k6-executor".to_string(),
        executor_spec: ExecutorSpec {
            image: "runner:1".to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Config with polling short enough for paused-time tests.
pub fn fast_config() -> ExecutorConfig {
    ExecutorConfig {
        namespace: "tests".to_string(),
        pod_start_timeout_ms: 5_000,
        poll_interval_ms: 10,
        poll_timeout_ms: 30_000,
        monitor_interval_ms: 10,
        pod_lookup_attempts: 3,
        pod_lookup_backoff_ms: 10,
        dashboard_uri: "https://dashboard.test".to_string(),
        ..Default::default()
    }
}

fn terminated(exit_code: i32, reason: &str) -> ContainerState {
    ContainerState {
        terminated: Some(ContainerStateTerminated {
            exit_code,
            reason: Some(reason.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn running() -> ContainerState {
    ContainerState {
        running: Some(ContainerStateRunning::default()),
        ..Default::default()
    }
}

/// Pod of job `job_name` with one init and one main container.
///
/// Containers are named `<job>-init` and `<job>`.
pub fn pod(job_name: &str, phase: &str) -> Pod {
    let state = match phase {
        "Succeeded" => Some(terminated(0, "Completed")),
        "Failed" => Some(terminated(1, "Error")),
        "Running" => Some(running()),
        _ => None,
    };
    let statuses = state.map(|state| {
        vec![ContainerStatus {
            name: job_name.to_string(),
            state: Some(state),
            ..Default::default()
        }]
    });

    Pod {
        metadata: ObjectMeta {
            name: Some(format!("{job_name}-pod")),
            labels: Some(BTreeMap::from([(
                "job-name".to_string(),
                job_name.to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(PodSpec {
            init_containers: Some(vec![Container {
                name: format!("{job_name}-init"),
                ..Default::default()
            }]),
            containers: vec![Container {
                name: job_name.to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            container_statuses: statuses,
            ..Default::default()
        }),
    }
}

/// Job status of a job killed for exceeding its active deadline.
pub fn deadline_exceeded_status() -> JobStatus {
    JobStatus {
        failed: Some(1),
        conditions: Some(vec![JobCondition {
            type_: "Failed".to_string(),
            status: "True".to_string(),
            reason: Some(DEADLINE_EXCEEDED.to_string()),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

pub fn active_status() -> JobStatus {
    JobStatus {
        active: Some(1),
        ..Default::default()
    }
}

pub fn succeeded_status() -> JobStatus {
    JobStatus {
        succeeded: Some(1),
        ..Default::default()
    }
}

/// A runner `line` entry.
pub fn line_entry(content: &str) -> String {
    json!({"type": "line", "content": content}).to_string()
}

/// A runner `result` entry with the given status.
pub fn result_entry(status: ExecutionStatus, output: &str) -> String {
    let result = ExecutionResult {
        status,
        output: output.to_string(),
        ..Default::default()
    };
    json!({"type": "result", "result": result}).to_string()
}

/// A runner `error` entry.
pub fn error_entry(content: &str) -> String {
    json!({"type": "error", "content": content}).to_string()
}

/// Runner log made of the given entries.
pub fn runner_log(entries: &[String]) -> Vec<u8> {
    let mut log = entries.join("\n");
    log.push('\n');
    log.into_bytes()
}

/// An executor wired to in-memory fakes, with handles to each of them.
#[derive(Clone)]
pub struct Harness {
    pub cluster: FakeCluster,
    pub repository: InMemoryExecutionRepository,
    pub tests: InMemoryTests,
    pub test_executions: InMemoryTestExecutions,
    pub templates: InMemoryTemplates,
    pub emitter: RecordingEmitter,
    pub counter: RecordingCounter,
    pub usage: RecordingUsageReporter,
    pub executor: JobExecutor,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: ExecutorConfig) -> Self {
        Self::build(config, StaticSettings::default())
    }

    pub fn with_settings(settings: StaticSettings) -> Self {
        Self::build(fast_config(), settings)
    }

    fn build(config: ExecutorConfig, settings: StaticSettings) -> Self {
        let cluster = FakeCluster::new();
        let repository = InMemoryExecutionRepository::new();
        let tests = InMemoryTests::new();
        let test_executions = InMemoryTestExecutions::new();
        let templates = InMemoryTemplates::new();
        let emitter = RecordingEmitter::new();
        let counter = RecordingCounter::new();
        let usage = RecordingUsageReporter::new();

        let executor = JobExecutorBuilder::new(config)
            .with_cluster(Arc::new(cluster.clone()))
            .with_repository(Arc::new(repository.clone()))
            .with_tests(Arc::new(tests.clone()))
            .with_test_executions(Arc::new(test_executions.clone()))
            .with_templates(Arc::new(templates.clone()))
            .with_settings(Arc::new(settings))
            .with_emitter(Arc::new(emitter.clone()))
            .with_counter(Arc::new(counter.clone()))
            .with_usage_reporter(Arc::new(usage.clone()))
            .build()
            .expect("harness executor should build");

        Self {
            cluster,
            repository,
            tests,
            test_executions,
            templates,
            emitter,
            counter,
            usage,
            executor,
        }
    }

    /// Persist `execution` and seed a pod for it in `phase` with `log` as
    /// the main container output.
    pub fn seed(&self, execution: &Execution, phase: &str, log: &[u8]) {
        self.repository.insert(execution.clone());
        let pod = pod(&execution.id, phase);
        let pod_name = pod.metadata.name.clone().unwrap_or_default();
        self.cluster.add_pod(pod);
        self.cluster.set_logs(&pod_name, &format!("{}-init", execution.id), "");
        self.cluster.set_logs(&pod_name, &execution.id, log);
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
