// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The dispatch request record and the run state machine.
//!
//! A [`RunRequest`] is immutable after construction: the dispatcher composes
//! it once (instruction, env, secrets, sandbox profile) and the worker
//! executes it as-is. Control-plane progress is tracked separately as
//! [`RunState`], whose transitions are the sole authority of the dispatcher.

use crate::envmap::EnvMap;
use crate::id::{ExecutionToken, RepositoryId, RunId, TaskId};
use serde::{Deserialize, Serialize};

/// Which harness binary a run drives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HarnessType {
    Codex,
    Opencode,
    /// Any other harness; routed by `HARNESS_RUNTIME_MODE`.
    #[serde(untagged)]
    Other(String),
}

impl HarnessType {
    /// Canonical lowercase name as it appears in env vars and labels.
    pub fn name(&self) -> &str {
        match self {
            HarnessType::Codex => "codex",
            HarnessType::Opencode => "opencode",
            HarnessType::Other(name) => name,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "codex" => HarnessType::Codex,
            "opencode" => HarnessType::Opencode,
            _ => HarnessType::Other(s.to_string()),
        }
    }
}

impl std::fmt::Display for HarnessType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Execution mode requested for a run.
///
/// `Plan` and `Review` are read-only modes: the instruction is prefixed
/// with a do-not-modify directive and harness approval defaults tighten.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Default,
    Plan,
    Review,
}

impl ExecutionMode {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionMode::Default => "default",
            ExecutionMode::Plan => "plan",
            ExecutionMode::Review => "review",
        }
    }

    /// Plan and review runs must not modify files.
    pub fn is_read_only(&self) -> bool {
        matches!(self, ExecutionMode::Plan | ExecutionMode::Review)
    }

    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "plan" => ExecutionMode::Plan,
            "review" => ExecutionMode::Review,
            _ => ExecutionMode::Default,
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Resource limits applied to a run's container sandbox.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SandboxProfile {
    /// CPU limit in whole or fractional cores; `None` means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<f64>,
    /// Memory limit in bytes; `None` means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<u64>,
    #[serde(default)]
    pub network_disabled: bool,
    #[serde(default)]
    pub read_only_root: bool,
}

/// Caps on artifact collection for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPolicy {
    pub max_count: u32,
    pub max_total_bytes: u64,
}

impl Default for ArtifactPolicy {
    fn default() -> Self {
        Self { max_count: 16, max_total_bytes: 64 * 1024 * 1024 }
    }
}

/// Optional multimodal image input attached to the instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub content_type: String,
    /// Base64-encoded image bytes.
    pub data: String,
}

/// A single dispatch request. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub run_id: RunId,
    pub repository_id: RepositoryId,
    pub task_id: TaskId,
    pub execution_token: ExecutionToken,
    pub harness: HarnessType,
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Fully composed instruction (prompt layering happens at dispatch).
    pub instruction: String,
    /// Normalized clone URL (https, ssh, git+ssh, or SCP-style).
    pub clone_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub environment_vars: EnvMap,
    /// Logically redacted in all outputs; see [`crate::redact::Redactor`].
    #[serde(default)]
    pub secrets: EnvMap,
    pub timeout_seconds: u64,
    #[serde(default)]
    pub retry_count: u32,
    /// Attempt number, starting at 1.
    #[serde(default = "default_attempt")]
    pub attempt: u32,
    #[serde(default)]
    pub sandbox: SandboxProfile,
    #[serde(default)]
    pub artifact_policy: ArtifactPolicy,
    #[serde(default)]
    pub artifact_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_parts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_attachments: Vec<ImageAttachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_profile_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction_stack_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_config_snapshot_json: Option<String>,
    pub image_tag: String,
    /// Epoch milliseconds at dispatch time.
    #[serde(default)]
    pub dispatched_at: u64,
}

fn default_attempt() -> u32 {
    1
}

impl RunRequest {
    /// Full env the harness sees: secrets layered over plain vars.
    pub fn merged_env(&self) -> EnvMap {
        let mut merged = self.environment_vars.clone();
        for (k, v) in self.secrets.iter() {
            merged.insert(k, v);
        }
        merged
    }

    /// Secret values to register with the redactor for this run.
    pub fn secret_values(&self) -> Vec<String> {
        self.secrets.iter().map(|(_, v)| v.to_string()).collect()
    }
}

/// Control-plane run state. Transitions are monotonic forward; the only
/// permitted regression is `Running -> Queued` on transport failure before
/// the worker accepts the dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Queued,
    PendingApproval,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed | RunState::Cancelled)
    }

    /// Whether a transition to `next` is legal.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Queued, PendingApproval) | (Queued, Running) => true,
            (Queued, Failed) | (Queued, Cancelled) => true,
            (PendingApproval, Queued) | (PendingApproval, Running) => true,
            (PendingApproval, Failed) | (PendingApproval, Cancelled) => true,
            (Running, Succeeded) | (Running, Failed) | (Running, Cancelled) => true,
            // Transport failure before the worker accepted the run.
            (Running, Queued) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Queued => "queued",
            RunState::PendingApproval => "pending_approval",
            RunState::Running => "running",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
