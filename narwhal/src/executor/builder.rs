use std::fmt;
use std::sync::Arc;

use crate::analytics::{HttpUsageReporter, NoopUsageReporter, UsageReporter};
use crate::cluster::ClusterClient;
use crate::config::ExecutorConfig;
use crate::events::{EventEmitter, InProcEventBus};
use crate::output::{JsonLinesParser, OutputParser};
use crate::repository::ExecutionRepository;
use crate::resources::{ConfigRepository, TemplatesClient, TestExecutionsClient, TestsClient};
use crate::telemetry::{ExecutionCounter, TracingExecutionCounter};

use super::JobExecutor;

const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Builder for constructing a [`JobExecutor`] with explicit dependencies.
///
/// The cluster, the execution repository and the resource clients are
/// required. Output parsing, metrics, events and usage telemetry fall back
/// to the built-in implementations when not set.
///
/// # Example
///
/// ```ignore
/// use narwhal::*;
///
/// let executor = JobExecutorBuilder::new(config)
///     .with_cluster(cluster)
///     .with_repository(repository)
///     .with_tests(tests)
///     .with_test_executions(test_executions)
///     .with_templates(templates)
///     .with_settings(settings)
///     .build()?;
/// ```
pub struct JobExecutorBuilder {
    config: ExecutorConfig,
    cluster: Option<Arc<dyn ClusterClient>>,
    repository: Option<Arc<dyn ExecutionRepository>>,
    tests: Option<Arc<dyn TestsClient>>,
    test_executions: Option<Arc<dyn TestExecutionsClient>>,
    templates: Option<Arc<dyn TemplatesClient>>,
    settings: Option<Arc<dyn ConfigRepository>>,
    emitter: Option<Arc<dyn EventEmitter>>,
    counter: Option<Arc<dyn ExecutionCounter>>,
    usage: Option<Arc<dyn UsageReporter>>,
    parser: Option<Arc<dyn OutputParser>>,
}

impl fmt::Debug for JobExecutorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobExecutorBuilder")
            .field("config", &self.config)
            .field("cluster_set", &self.cluster.is_some())
            .field("repository_set", &self.repository.is_some())
            .field("tests_set", &self.tests.is_some())
            .field("test_executions_set", &self.test_executions.is_some())
            .field("templates_set", &self.templates.is_some())
            .field("settings_set", &self.settings.is_some())
            .field("emitter_set", &self.emitter.is_some())
            .field("counter_set", &self.counter.is_some())
            .field("usage_set", &self.usage.is_some())
            .field("parser_set", &self.parser.is_some())
            .finish()
    }
}

impl JobExecutorBuilder {
    /// Create a new builder with the given executor configuration.
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            cluster: None,
            repository: None,
            tests: None,
            test_executions: None,
            templates: None,
            settings: None,
            emitter: None,
            counter: None,
            usage: None,
            parser: None,
        }
    }

    /// Set the cluster client jobs are created through.
    pub fn with_cluster(mut self, cluster: Arc<dyn ClusterClient>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Set the execution repository.
    pub fn with_repository(mut self, repository: Arc<dyn ExecutionRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Set the client for test resources.
    pub fn with_tests(mut self, tests: Arc<dyn TestsClient>) -> Self {
        self.tests = Some(tests);
        self
    }

    /// Set the client for test execution resources.
    pub fn with_test_executions(mut self, test_executions: Arc<dyn TestExecutionsClient>) -> Self {
        self.test_executions = Some(test_executions);
        self
    }

    /// Set the client for job templates.
    pub fn with_templates(mut self, templates: Arc<dyn TemplatesClient>) -> Self {
        self.templates = Some(templates);
        self
    }

    /// Set the source of cluster-wide settings.
    pub fn with_settings(mut self, settings: Arc<dyn ConfigRepository>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Set the event emitter.
    pub fn with_emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Set the execution counter.
    pub fn with_counter(mut self, counter: Arc<dyn ExecutionCounter>) -> Self {
        self.counter = Some(counter);
        self
    }

    /// Set the usage reporter.
    pub fn with_usage_reporter(mut self, usage: Arc<dyn UsageReporter>) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Set the runner output parser.
    pub fn with_parser(mut self, parser: Arc<dyn OutputParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Build the `JobExecutor` with all configured dependencies.
    ///
    /// # Errors
    ///
    /// Returns an error if any required dependency is missing or the usage
    /// endpoint client cannot be built.
    pub fn build(self) -> anyhow::Result<JobExecutor> {
        let cluster = self
            .cluster
            .ok_or_else(|| anyhow::anyhow!("cluster dependency missing"))?;
        let repository = self
            .repository
            .ok_or_else(|| anyhow::anyhow!("repository dependency missing"))?;
        let tests = self
            .tests
            .ok_or_else(|| anyhow::anyhow!("tests dependency missing"))?;
        let test_executions = self
            .test_executions
            .ok_or_else(|| anyhow::anyhow!("test_executions dependency missing"))?;
        let templates = self
            .templates
            .ok_or_else(|| anyhow::anyhow!("templates dependency missing"))?;
        let settings = self
            .settings
            .ok_or_else(|| anyhow::anyhow!("settings dependency missing"))?;

        let emitter = self
            .emitter
            .unwrap_or_else(|| Arc::new(InProcEventBus::new(DEFAULT_EVENT_CAPACITY)));
        let counter = self
            .counter
            .unwrap_or_else(|| Arc::new(TracingExecutionCounter));
        let parser = self.parser.unwrap_or_else(|| Arc::new(JsonLinesParser));
        let usage: Arc<dyn UsageReporter> = match self.usage {
            Some(usage) => usage,
            None if self.config.usage_endpoint.is_empty() => Arc::new(NoopUsageReporter),
            None => Arc::new(HttpUsageReporter::new(&self.config.usage_endpoint)?),
        };

        Ok(JobExecutor {
            config: Arc::new(self.config),
            cluster,
            repository,
            tests,
            test_executions,
            templates,
            settings,
            emitter,
            counter,
            usage,
            parser,
        })
    }
}
