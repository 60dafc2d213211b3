//! Job manifest construction.
//!
//! A job is rendered from a base template, optionally merged with an
//! extension overlay, decoded into a typed [`Job`] and then decorated with
//! caller labels and the runtime environment every runner expects.

pub mod env;
pub mod merge;
mod options;
mod template;

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Container, EnvVar};
use serde_yaml::Value;
use tracing::debug;

pub use options::{JobOptions, sanitize_label, working_dir};

use crate::config::RunnerEnv;
use crate::error::BuildError;

/// Build the Job for one execution.
pub fn build_job_spec(options: &JobOptions, runner: &RunnerEnv) -> Result<Job, BuildError> {
    let base = template::render("job", &options.job_template, options)?;

    let document = if options.job_template_extensions.trim().is_empty() {
        serde_yaml::from_str::<Value>(&base).map_err(|e| BuildError::Decode(e.to_string()))?
    } else {
        let overlay =
            template::render("job extensions", &options.job_template_extensions, options)?;
        merge::merge_documents(&base, &overlay)?
    };

    let mut job: Job =
        serde_yaml::from_value(document).map_err(|e| BuildError::Decode(e.to_string()))?;

    let pod_spec = job
        .spec
        .as_mut()
        .and_then(|spec| spec.template.spec.as_mut())
        .filter(|pod| !pod.containers.is_empty())
        .ok_or_else(|| BuildError::Decode("job template defines no containers".to_string()))?;

    let envs = runtime_env(options, runner);
    for container in pod_spec.init_containers.iter_mut().flatten() {
        env::upsert(container.env.get_or_insert_with(Vec::new), &envs);
    }
    for container in pod_spec.containers.iter_mut() {
        env::upsert(container.env.get_or_insert_with(Vec::new), &envs);
        override_image(container, &options.image_override);
    }

    apply_labels(&mut job, &options.labels);

    debug!(
        job_name = %options.name,
        namespace = %options.namespace,
        env_vars = envs.len(),
        "job specification built"
    );
    Ok(job)
}

/// Environment injected into every init and main container, in order.
fn runtime_env(options: &JobOptions, runner: &RunnerEnv) -> Vec<EnvVar> {
    let mut vars = runner.env_vars();
    vars.push(env::plain("RUNNER_CLUSTERID", &options.cluster_id));
    vars.push(env::plain("RUNNER_BUCKET", &options.storage_bucket));

    vars.extend(env::prepare_secrets(&options.secret_envs, &options.variables));
    vars.extend(env::prepare_git_credentials(
        options.username_secret.as_ref(),
        options.token_secret.as_ref(),
    ));

    if !options.http_proxy.is_empty() {
        vars.push(env::plain("HTTP_PROXY", &options.http_proxy));
    }
    if !options.https_proxy.is_empty() {
        vars.push(env::plain("HTTPS_PROXY", &options.https_proxy));
    }

    vars.extend(env::prepare_envs(&options.envs, &options.variables));
    vars.push(env::plain("RUNNER_WORKINGDIR", &options.working_dir));

    // collapse duplicates so later entries win
    let mut unique = Vec::with_capacity(vars.len());
    env::upsert(&mut unique, &vars);
    unique
}

fn override_image(container: &mut Container, image: &str) {
    if !image.is_empty() {
        container.image = Some(image.to_string());
    }
}

fn apply_labels(job: &mut Job, labels: &BTreeMap<String, String>) {
    if labels.is_empty() {
        return;
    }

    job.metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(labels.clone());

    if let Some(spec) = job.spec.as_mut() {
        spec.template
            .metadata
            .get_or_insert_with(Default::default)
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(labels.clone());
    }
}
