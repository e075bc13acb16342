// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Builders and fixtures for other crates' tests.

use crate::envmap::EnvMap;
use crate::id::{ExecutionToken, RepositoryId, RunId, TaskId};
use crate::run::{ArtifactPolicy, ExecutionMode, HarnessType, RunRequest, SandboxProfile};

/// A minimal valid dispatch request for the given run id.
pub fn run_request(run_id: &str) -> RunRequest {
    RunRequest {
        run_id: RunId::from_string(run_id),
        repository_id: RepositoryId::from_string("repo-1"),
        task_id: TaskId::from_string("task-1"),
        execution_token: ExecutionToken::from_string(format!("exc-{run_id}")),
        harness: HarnessType::Codex,
        mode: ExecutionMode::Default,
        instruction: "do X".to_string(),
        clone_url: "https://example.com/repo.git".to_string(),
        branch: None,
        working_directory: None,
        environment_vars: EnvMap::new(),
        secrets: EnvMap::new(),
        timeout_seconds: 600,
        retry_count: 0,
        attempt: 1,
        sandbox: SandboxProfile::default(),
        artifact_policy: ArtifactPolicy::default(),
        artifact_patterns: Vec::new(),
        input_parts: Vec::new(),
        image_attachments: Vec::new(),
        session_profile_id: None,
        instruction_stack_hash: None,
        mcp_config_snapshot_json: None,
        image_tag: "runner:latest".to_string(),
        dispatched_at: 0,
    }
}

/// Same as [`run_request`] but for a specific harness and mode.
pub fn run_request_for(run_id: &str, harness: HarnessType, mode: ExecutionMode) -> RunRequest {
    let mut req = run_request(run_id);
    req.harness = harness;
    req.mode = mode;
    req
}
