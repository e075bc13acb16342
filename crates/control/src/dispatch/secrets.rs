// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Environment and secret materialization for a dispatch.
//!
//! Plain variables and secret values are kept in separate maps: secrets
//! ride the dispatch request's redacted map, never logs. Host
//! credentials are passed in explicitly (read once at startup) so the
//! dispatcher stays pure with respect to process globals.

use crate::store::{ProviderSecret, RepositoryRecord, TaskRecord};
use rp_core::{EnvMap, ExecutionMode, HarnessType};

/// Separated plain/secret env for one run.
#[derive(Debug, Default, Clone)]
pub struct MaterializedEnv {
    pub vars: EnvMap,
    pub secrets: EnvMap,
}

/// `org/repo` slug for GH_REPO, derived from the clone URL.
pub fn gh_repo_slug(clone_url: &str) -> Option<String> {
    let path = if let Some((_, rest)) = clone_url.split_once("://") {
        rest.split_once('/').map(|(_, path)| path)?
    } else if let Some((_, path)) = clone_url.split_once(':') {
        path
    } else {
        return None;
    };
    let slug = path.trim_matches('/').trim_end_matches(".git");
    if slug.split('/').count() == 2 {
        Some(slug.to_string())
    } else {
        None
    }
}

/// Uppercase-underscore env name for a custom provider:
/// `my-provider` -> `SECRET_MY_PROVIDER`.
fn custom_secret_name(provider: &str) -> String {
    let upper: String = provider
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("SECRET_{upper}")
}

/// The effective execution mode: a task-level override wins.
pub fn effective_mode(task: &TaskRecord, requested: ExecutionMode) -> ExecutionMode {
    task.mode_override.unwrap_or(requested)
}

/// Build the env and secret maps for one run.
pub fn materialize(
    repository: &RepositoryRecord,
    task: &TaskRecord,
    requested_mode: ExecutionMode,
    provider_secrets: &[ProviderSecret],
    default_branch: &str,
    host_env: &EnvMap,
) -> MaterializedEnv {
    let mode = effective_mode(task, requested_mode);
    let mut out = MaterializedEnv::default();

    // Seed vars.
    out.vars.insert("GIT_URL", repository.clone_url.clone());
    out.vars.insert("DEFAULT_BRANCH", default_branch);
    out.vars.insert("AUTO_CREATE_PR", "false");
    out.vars.insert("HARNESS_NAME", task.harness.name());
    out.vars.insert("HARNESS_MODE", mode.name());
    if let Some(slug) = gh_repo_slug(&repository.clone_url) {
        out.vars.insert("GH_REPO", slug);
    }

    // Provider secrets map onto harness-specific credential names.
    for secret in provider_secrets {
        match secret.provider.to_ascii_lowercase().as_str() {
            "github" => {
                out.secrets.insert("GH_TOKEN", secret.value.clone());
                out.secrets.insert("GITHUB_TOKEN", secret.value.clone());
            }
            "codex" => {
                out.secrets.insert("CODEX_API_KEY", secret.value.clone());
                out.secrets.insert("OPENAI_API_KEY", secret.value.clone());
            }
            "opencode" => {
                out.secrets.insert("OPENCODE_API_KEY", secret.value.clone());
            }
            other => {
                out.secrets.insert(custom_secret_name(other), secret.value.clone());
            }
        }
    }

    // Host credential fallback for codex runs with no stored credential.
    if task.harness == HarnessType::Codex
        && !out.secrets.contains_key("CODEX_API_KEY")
        && !out.secrets.contains_key("OPENAI_API_KEY")
    {
        for name in ["CODEX_API_KEY", "OPENAI_API_KEY"] {
            if let Some(value) = host_env.get(name) {
                out.secrets.insert(name, value);
            }
        }
    }

    // Harness settings, generic and harness-specific.
    let harness_upper = task.harness.name().to_ascii_uppercase();
    let model = task.harness_model.clone().or_else(|| task.harness_settings.model.clone());
    if let Some(model) = model {
        out.vars.insert("HARNESS_MODEL", model.clone());
        out.vars.insert(format!("{harness_upper}_MODEL"), model);
    }
    if let Some(temperature) = task.harness_settings.temperature {
        out.vars.insert("HARNESS_TEMPERATURE", temperature.to_string());
    }
    if let Some(max_tokens) = task.harness_settings.max_tokens {
        out.vars.insert("HARNESS_MAX_TOKENS", max_tokens.to_string());
        out.vars.insert(format!("{harness_upper}_MAX_TOKENS"), max_tokens.to_string());
    }

    // Mode env plus per-harness approval defaults.
    out.vars.insert("TASK_MODE", mode.name());
    out.vars.insert("RUN_MODE", mode.name());
    match task.harness {
        HarnessType::Codex => {
            if !out.vars.contains_key("CODEX_APPROVAL_POLICY") {
                let policy = if mode.is_read_only() { "never" } else { "on-failure" };
                out.vars.insert("CODEX_APPROVAL_POLICY", policy);
            }
        }
        HarnessType::Opencode => {
            out.vars.insert("OPENCODE_MODE", mode.name());
        }
        HarnessType::Other(_) => {}
    }

    out
}

#[cfg(test)]
#[path = "secrets_tests.rs"]
mod tests;
