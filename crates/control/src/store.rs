// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store capabilities the dispatcher depends on.
//!
//! The persistence backend is an external collaborator; the dispatcher
//! only sees this trait plus a [`StatusPublisher`] capability, so there
//! are no reverse edges from storage back into dispatch. [`MemoryStore`]
//! backs tests and single-node deployments.

use parking_lot::Mutex;
use rp_core::{
    EnvMap, ExecutionMode, ExecutionToken, FailureClass, HarnessType, RepositoryId, RunId,
    RunState, RuntimeId, TaskId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Where a task/repository instruction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionSource {
    /// Shared instruction collection attached to the repository.
    Collection,
    /// Instruction embedded directly on the record.
    Embedded,
}

/// One layered instruction entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionRecord {
    pub name: String,
    pub content: String,
    /// Lower priority sorts earlier.
    pub priority: i32,
    /// Stable order within a priority band.
    pub order: i32,
    pub source: InstructionSource,
}

/// Approval gating for a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalProfile {
    pub require_approval: bool,
}

/// Per-harness model settings configured on a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarnessSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// A task: the reusable recipe that produces runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub repository_id: RepositoryId,
    pub name: String,
    pub prompt: String,
    pub harness: HarnessType,
    #[serde(default)]
    pub mode: ExecutionMode,
    /// 0 means "use the runtime default parallelism".
    #[serde(default)]
    pub concurrency_limit: u32,
    #[serde(default)]
    pub approval: ApprovalProfile,
    #[serde(default)]
    pub instructions: Vec<InstructionRecord>,
    #[serde(default)]
    pub harness_settings: HarnessSettings,
    /// Task-level mode override from an instruction, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode_override: Option<ExecutionMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub harness_model: Option<String>,
    /// Human-readable sandbox memory limit ("1g", "512m"); unparsable
    /// values mean no limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<String>,
    #[serde(default)]
    pub artifact_patterns: Vec<String>,
    pub image_tag: String,
    #[serde(default)]
    pub timeout_seconds: u64,
}

/// A repository known to the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub id: RepositoryId,
    pub name: String,
    pub clone_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub instructions: Vec<InstructionRecord>,
}

/// One decrypted provider credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSecret {
    /// Provider name, e.g. "github", "codex", "opencode".
    pub provider: String,
    pub value: String,
}

/// Control-plane view of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub repository_id: RepositoryId,
    pub task_id: TaskId,
    pub execution_token: ExecutionToken,
    pub state: RunState,
    pub harness: HarnessType,
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default = "default_attempt")]
    pub attempt: u32,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_id: Option<RuntimeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_class: Option<FailureClass>,
    /// Extra env vars requested for this run.
    #[serde(default)]
    pub environment_vars: EnvMap,
}

fn default_attempt() -> u32 {
    1
}

/// Store accessors the dispatcher needs. Implementations must keep
/// single-run transitions serialized.
pub trait RunStore: Send + Sync {
    fn run(&self, run_id: &RunId) -> Option<RunRecord>;
    fn task(&self, task_id: &TaskId) -> Option<TaskRecord>;
    fn repository(&self, id: &RepositoryId) -> Option<RepositoryRecord>;

    /// Head of a task's queue: the first non-terminal run ordered by
    /// `(created_at asc, run_id asc)`.
    fn queue_head(&self, task_id: &TaskId) -> Option<RunRecord>;

    /// Non-terminal runs queued for a task (for admission depth).
    fn queued_depth(&self, task_id: &TaskId) -> u32;

    /// All runs currently in `Queued` state, oldest first. Drives the
    /// dispatch loop.
    fn queued_runs(&self) -> Vec<RunRecord>;

    /// Runs currently in `Running` state, globally.
    fn active_global(&self) -> u32;

    /// Runs currently in `Running` state for one repository.
    fn active_for_repo(&self, repository_id: &RepositoryId) -> u32;

    /// Record a state transition; rejected (false) when the transition is
    /// illegal for the run's current state.
    fn transition(
        &self,
        run_id: &RunId,
        state: RunState,
        summary: Option<String>,
        failure_class: Option<FailureClass>,
    ) -> bool;

    /// Pin the runtime a run was dispatched to.
    fn assign_runtime(&self, run_id: &RunId, runtime_id: &RuntimeId);

    /// Decrypted provider credentials for a repository.
    fn provider_secrets(&self, repository_id: &RepositoryId) -> Vec<ProviderSecret>;
}

/// Capability for publishing run-state changes to observers.
pub trait StatusPublisher: Send + Sync {
    fn publish_state(&self, run_id: &RunId, state: RunState, summary: &str);
}

/// Collector used by binaries that only log transitions, and by tests.
#[derive(Default, Clone)]
pub struct RecordingPublisher {
    pub published: Arc<Mutex<Vec<(RunId, RunState, String)>>>,
}

impl StatusPublisher for RecordingPublisher {
    fn publish_state(&self, run_id: &RunId, state: RunState, summary: &str) {
        tracing::info!(run_id = %run_id, state = %state, summary, "run state published");
        self.published.lock().push((run_id.clone(), state, summary.to_string()));
    }
}

/// In-memory store for tests and single-node deployments.
#[derive(Default)]
pub struct MemoryStore {
    runs: Mutex<HashMap<RunId, RunRecord>>,
    tasks: Mutex<HashMap<TaskId, TaskRecord>>,
    repositories: Mutex<HashMap<RepositoryId, RepositoryRecord>>,
    secrets: Mutex<HashMap<RepositoryId, Vec<ProviderSecret>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_run(&self, run: RunRecord) {
        self.runs.lock().insert(run.run_id.clone(), run);
    }

    pub fn insert_task(&self, task: TaskRecord) {
        self.tasks.lock().insert(task.id.clone(), task);
    }

    pub fn insert_repository(&self, repository: RepositoryRecord) {
        self.repositories.lock().insert(repository.id.clone(), repository);
    }

    pub fn insert_secrets(&self, repository_id: RepositoryId, secrets: Vec<ProviderSecret>) {
        self.secrets.lock().insert(repository_id, secrets);
    }
}

impl RunStore for MemoryStore {
    fn run(&self, run_id: &RunId) -> Option<RunRecord> {
        self.runs.lock().get(run_id).cloned()
    }

    fn task(&self, task_id: &TaskId) -> Option<TaskRecord> {
        self.tasks.lock().get(task_id).cloned()
    }

    fn repository(&self, id: &RepositoryId) -> Option<RepositoryRecord> {
        self.repositories.lock().get(id).cloned()
    }

    fn queue_head(&self, task_id: &TaskId) -> Option<RunRecord> {
        self.runs
            .lock()
            .values()
            .filter(|r| &r.task_id == task_id && !r.state.is_terminal())
            .min_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.run_id.as_str().cmp(b.run_id.as_str()))
            })
            .cloned()
    }

    fn queued_depth(&self, task_id: &TaskId) -> u32 {
        self.runs
            .lock()
            .values()
            .filter(|r| &r.task_id == task_id && r.state == RunState::Queued)
            .count() as u32
    }

    fn queued_runs(&self) -> Vec<RunRecord> {
        let mut queued: Vec<RunRecord> = self
            .runs
            .lock()
            .values()
            .filter(|r| r.state == RunState::Queued)
            .cloned()
            .collect();
        queued.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.run_id.as_str().cmp(b.run_id.as_str()))
        });
        queued
    }

    fn active_global(&self) -> u32 {
        self.runs.lock().values().filter(|r| r.state == RunState::Running).count() as u32
    }

    fn active_for_repo(&self, repository_id: &RepositoryId) -> u32 {
        self.runs
            .lock()
            .values()
            .filter(|r| &r.repository_id == repository_id && r.state == RunState::Running)
            .count() as u32
    }

    fn transition(
        &self,
        run_id: &RunId,
        state: RunState,
        summary: Option<String>,
        failure_class: Option<FailureClass>,
    ) -> bool {
        let mut runs = self.runs.lock();
        let Some(run) = runs.get_mut(run_id) else {
            return false;
        };
        if !run.state.can_transition_to(state) {
            tracing::warn!(
                run_id = %run_id,
                from = %run.state,
                to = %state,
                "illegal run transition rejected"
            );
            return false;
        }
        run.state = state;
        if summary.is_some() {
            run.summary = summary;
        }
        if failure_class.is_some() {
            run.failure_class = failure_class;
        }
        true
    }

    fn assign_runtime(&self, run_id: &RunId, runtime_id: &RuntimeId) {
        if let Some(run) = self.runs.lock().get_mut(run_id) {
            run.runtime_id = Some(runtime_id.clone());
        }
    }

    fn provider_secrets(&self, repository_id: &RepositoryId) -> Vec<ProviderSecret> {
        self.secrets.lock().get(repository_id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
