use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{EnvVar, EnvVarSource, SecretKeySelector};

use crate::execution::{SecretRef, Variable};

pub const GIT_USERNAME_ENV: &str = "RUNNER_GITUSERNAME";
pub const GIT_TOKEN_ENV: &str = "RUNNER_GITTOKEN";

pub fn plain(name: impl Into<String>, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: Some(value.into()),
        value_from: None,
    }
}

pub fn from_secret(name: impl Into<String>, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: None,
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                optional: None,
            }),
            ..Default::default()
        }),
    }
}

/// Secret-backed variables: request secret envs first (env name doubles as
/// the key inside the named secret), then secret test variables.
pub fn prepare_secrets(
    secret_envs: &BTreeMap<String, String>,
    variables: &BTreeMap<String, Variable>,
) -> Vec<EnvVar> {
    let envs = secret_envs
        .iter()
        .map(|(name, secret)| from_secret(name, secret, name));

    let vars = variables.iter().filter_map(|(name, variable)| {
        let secret_ref = variable.secret_ref.as_ref().filter(|_| variable.is_secret())?;
        Some(from_secret(name, &secret_ref.name, &secret_ref.key))
    });

    envs.chain(vars).collect()
}

/// Git credentials injected from secret references.
pub fn prepare_git_credentials(
    username: Option<&SecretRef>,
    token: Option<&SecretRef>,
) -> Vec<EnvVar> {
    [(GIT_USERNAME_ENV, username), (GIT_TOKEN_ENV, token)]
        .into_iter()
        .filter_map(|(env, secret)| secret.map(|s| from_secret(env, &s.name, &s.key)))
        .collect()
}

/// Plain request envs followed by basic test variables.
pub fn prepare_envs(
    envs: &BTreeMap<String, String>,
    variables: &BTreeMap<String, Variable>,
) -> Vec<EnvVar> {
    let envs = envs.iter().map(|(name, value)| plain(name, value));
    let vars = variables
        .iter()
        .filter(|(_, variable)| !variable.is_secret())
        .map(|(name, variable)| plain(name, &variable.value));

    envs.chain(vars).collect()
}

/// Append `vars` to `target`, replacing any entry with the same name in place.
pub fn upsert(target: &mut Vec<EnvVar>, vars: &[EnvVar]) {
    for var in vars {
        match target.iter_mut().find(|existing| existing.name == var.name) {
            Some(existing) => *existing = var.clone(),
            None => target.push(var.clone()),
        }
    }
}
