use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::ExecutorConfig;
use crate::error::BuildError;
use crate::execution::{ArtifactRequest, ExecuteOptions, Execution, SecretRef, Variable};
use crate::resources::TemplatesClient;

const DATA_DIR: &str = "/data";
const REPO_DIR: &str = "/data/repo";

/// Render context for one job. Built fresh for every execution.
///
/// Every field is visible to templates under its own name.
#[derive(Clone, Debug, Default, Serialize)]
pub struct JobOptions {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub image_override: String,
    pub image_pull_secrets: Vec<String>,
    /// Execution serialized as JSON, with `'` doubled so it can sit inside a
    /// single-quoted YAML scalar.
    pub jsn: String,
    pub test_name: String,
    pub init_image: String,
    pub registry: String,
    pub service_account_name: String,
    pub cluster_id: String,
    pub storage_bucket: String,
    pub working_dir: String,
    pub active_deadline_seconds: i64,
    pub certificate_secret: String,
    pub artifact_request: Option<ArtifactRequest>,
    pub labels: BTreeMap<String, String>,
    pub envs: BTreeMap<String, String>,
    pub secret_envs: BTreeMap<String, String>,
    pub variables: BTreeMap<String, Variable>,
    pub http_proxy: String,
    pub https_proxy: String,
    pub username_secret: Option<SecretRef>,
    pub token_secret: Option<SecretRef>,
    /// Base template source.
    #[serde(skip)]
    pub job_template: String,
    /// Extension overlay source, merged onto the rendered base.
    #[serde(skip)]
    pub job_template_extensions: String,
}

impl JobOptions {
    /// Assemble the render context for `execution`.
    ///
    /// Template references are resolved through `templates`; a reference to a
    /// template that is not of type `job` is ignored.
    pub async fn from_execution(
        config: &ExecutorConfig,
        templates: &dyn TemplatesClient,
        execution: &Execution,
        options: &ExecuteOptions,
    ) -> Result<Self, BuildError> {
        let jsn = serde_json::to_string(execution)
            .map_err(|e| BuildError::Options(e.into()))?
            .replace('\'', "''");

        let mut job_template = if options.executor_spec.job_template.is_empty() {
            config.job_template.clone()
        } else {
            options.executor_spec.job_template.clone()
        };

        for reference in [
            &options.executor_spec.job_template_reference,
            &options.request.job_template_reference,
        ] {
            if let Some(body) = resolve_reference(templates, reference).await? {
                job_template = body;
            }
        }

        let storage_bucket = execution
            .artifact_request
            .as_ref()
            .map(|a| a.storage_bucket.clone())
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| config.default_storage_bucket.clone());

        let namespace = if options.namespace.is_empty() {
            config.namespace.clone()
        } else {
            options.namespace.clone()
        };

        Ok(Self {
            name: execution.id.clone(),
            namespace,
            image: options.executor_spec.image.clone(),
            image_override: options.image_override.clone(),
            image_pull_secrets: options.image_pull_secret_names.clone(),
            jsn,
            test_name: options.test_name.clone(),
            init_image: config.init_image.clone(),
            registry: config.registry.clone(),
            service_account_name: config.service_account_name.clone(),
            cluster_id: config.cluster_id.clone(),
            storage_bucket,
            working_dir: working_dir(execution),
            active_deadline_seconds: options.request.active_deadline_seconds,
            certificate_secret: options.certificate_secret.clone(),
            artifact_request: execution.artifact_request.clone(),
            labels: default_labels(options),
            envs: options.request.envs.clone(),
            secret_envs: options.request.secret_envs.clone(),
            variables: execution.variables.clone(),
            http_proxy: options.request.http_proxy.clone(),
            https_proxy: options.request.https_proxy.clone(),
            username_secret: options.username_secret.clone(),
            token_secret: options.token_secret.clone(),
            job_template,
            job_template_extensions: options.request.job_template.clone(),
        })
    }
}

async fn resolve_reference(
    templates: &dyn TemplatesClient,
    reference: &str,
) -> Result<Option<String>, BuildError> {
    if reference.is_empty() {
        return Ok(None);
    }

    let template = templates.get(reference).await.map_err(BuildError::Options)?;
    if template.is_job() {
        debug!(template = %reference, "using referenced job template");
        Ok(Some(template.body))
    } else {
        warn!(template = %reference, "referenced template is not a job template, ignoring");
        Ok(None)
    }
}

/// Directory the runner works in, inside the shared data volume.
pub fn working_dir(execution: &Execution) -> String {
    let Some(content) = &execution.content else {
        return DATA_DIR.to_string();
    };

    match content.repository.as_ref().map(|r| r.working_dir.as_str()) {
        Some(dir) if !dir.is_empty() => format!("{REPO_DIR}/{}", dir.trim_start_matches('/')),
        _ if content.is_git() => REPO_DIR.to_string(),
        _ => DATA_DIR.to_string(),
    }
}

fn default_labels(options: &ExecuteOptions) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([
        ("executor".to_string(), options.executor_name.clone()),
        ("test-type".to_string(), sanitize_label(&options.test_type)),
        ("test-name".to_string(), options.test_name.clone()),
    ]);
    labels.extend(options.labels.clone());
    labels
}

/// Make a value usable as a label value: lowercase alphanumerics, `-` and `.`.
pub fn sanitize_label(value: &str) -> String {
    let mapped: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    mapped.trim_matches(|c| c == '-' || c == '.').to_string()
}
