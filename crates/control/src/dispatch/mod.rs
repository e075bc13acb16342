// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The dispatch gate.
//!
//! `dispatch` walks the admission pipeline in order: queue-head check,
//! approval gate, depth and concurrency admission, clone-URL
//! normalization, runtime lease, prompt and env composition, and finally
//! the `DispatchJob` RPC. Store and publisher are capabilities passed in;
//! nothing here reaches back into persistence.

pub mod cloneurl;
pub mod prompt;
pub mod secrets;

use crate::client::WorkerConnector;
use crate::lifecycle::LifecycleManager;
use crate::store::{RepositoryRecord, RunRecord, RunStore, StatusPublisher, TaskRecord};
use rp_core::{
    parse_memory_limit, Clock, ControlConfig, EnvMap, FailureClass, Redactor, RunId, RunRequest,
    RunState, SandboxProfile,
};
use std::sync::Arc;

/// Control-plane dispatch engine.
pub struct Dispatcher<S, P, C, W>
where
    S: RunStore,
    P: StatusPublisher,
    C: Clock,
    W: WorkerConnector,
{
    store: Arc<S>,
    publisher: Arc<P>,
    lifecycle: Arc<LifecycleManager<C>>,
    connector: Arc<W>,
    config: ControlConfig,
    clock: C,
    /// Host credentials captured once at startup.
    host_env: EnvMap,
    redactor: Redactor,
}

impl<S, P, C, W> Dispatcher<S, P, C, W>
where
    S: RunStore,
    P: StatusPublisher,
    C: Clock,
    W: WorkerConnector,
{
    pub fn new(
        store: Arc<S>,
        publisher: Arc<P>,
        lifecycle: Arc<LifecycleManager<C>>,
        connector: Arc<W>,
        config: ControlConfig,
        clock: C,
        host_env: EnvMap,
    ) -> Self {
        Self {
            store,
            publisher,
            lifecycle,
            connector,
            config,
            clock,
            host_env,
            redactor: Redactor::new(),
        }
    }

    fn fail(
        &self,
        run: &RunRecord,
        class: FailureClass,
        summary: String,
    ) -> bool {
        let summary = self.redactor.redact(&summary);
        if self.store.transition(&run.run_id, RunState::Failed, Some(summary.clone()), Some(class))
        {
            self.publisher.publish_state(&run.run_id, RunState::Failed, &summary);
        }
        false
    }

    /// Attempt to dispatch one run. Returns true when the run advanced
    /// (to `Running` or `PendingApproval`); false when it stays queued
    /// (deferred) or reached a terminal failure.
    pub async fn dispatch(
        &self,
        repository: &RepositoryRecord,
        task: &TaskRecord,
        run: &RunRecord,
    ) -> bool {
        // 1. Queue-head check: strictly one task run at a time, oldest
        //    first.
        if let Some(head) = self.store.queue_head(&task.id) {
            if head.run_id != run.run_id {
                tracing::debug!(
                    run_id = %run.run_id,
                    head = %head.run_id,
                    "not at queue head, leaving queued"
                );
                return false;
            }
        }

        // 2. Approval gate.
        if task.approval.require_approval && run.state == RunState::Queued {
            if self.store.transition(&run.run_id, RunState::PendingApproval, None, None) {
                self.publisher.publish_state(
                    &run.run_id,
                    RunState::PendingApproval,
                    "waiting for approval",
                );
            }
            return true;
        }

        // 3. Admission: depth cap rejects, concurrency caps defer.
        if self.store.queued_depth(&task.id) > self.config.max_queue_depth {
            return self.fail(
                run,
                FailureClass::AdmissionControl,
                format!("queue depth exceeds {}", self.config.max_queue_depth),
            );
        }
        if self.store.active_global() >= self.config.max_global_concurrent_runs {
            tracing::debug!(run_id = %run.run_id, "global concurrency reached, deferring");
            return false;
        }
        if self.store.active_for_repo(&repository.id) >= self.config.per_repo_concurrency_limit {
            tracing::debug!(run_id = %run.run_id, "per-repo concurrency reached, deferring");
            return false;
        }

        // 4. Clone-URL normalization.
        let Some(clone_url) = cloneurl::normalize_clone_url(&repository.clone_url) else {
            return self.fail(
                run,
                FailureClass::InvalidRepositoryUrl,
                format!("invalid repository url: {}", repository.clone_url),
            );
        };

        // 5. Runtime selection.
        let slots = if task.concurrency_limit > 0 {
            task.concurrency_limit
        } else {
            self.config.default_task_parallel_runs
        };
        let Some(lease) = self.lifecycle.acquire_lease(slots) else {
            tracing::debug!(run_id = %run.run_id, "no runtime lease available, deferring");
            return false;
        };

        // 6–7. Prompt composition and env/secret materialization.
        let default_branch = repository
            .default_branch
            .clone()
            .unwrap_or_else(|| self.config.default_branch.clone());
        let instruction = prompt::compose(repository, task, &default_branch);
        let materialized = secrets::materialize(
            repository,
            task,
            run.mode,
            &self.store.provider_secrets(&repository.id),
            &default_branch,
            &self.host_env,
        );
        self.redactor
            .register_all(materialized.secrets.iter().map(|(_, v)| v.to_string()));

        let mode = secrets::effective_mode(task, run.mode);
        let mut environment_vars = materialized.vars;
        environment_vars.overlay(&run.environment_vars);

        let request = RunRequest {
            run_id: run.run_id.clone(),
            repository_id: repository.id.clone(),
            task_id: task.id.clone(),
            execution_token: run.execution_token.clone(),
            harness: task.harness.clone(),
            mode,
            instruction,
            clone_url,
            branch: repository.default_branch.clone(),
            working_directory: None,
            environment_vars,
            secrets: materialized.secrets,
            timeout_seconds: if task.timeout_seconds > 0 { task.timeout_seconds } else { 3600 },
            retry_count: 0,
            attempt: run.attempt,
            sandbox: SandboxProfile {
                memory_bytes: task.memory_limit.as_deref().and_then(parse_memory_limit),
                ..Default::default()
            },
            artifact_policy: Default::default(),
            artifact_patterns: task.artifact_patterns.clone(),
            input_parts: Vec::new(),
            image_attachments: Vec::new(),
            session_profile_id: None,
            instruction_stack_hash: None,
            mcp_config_snapshot_json: None,
            image_tag: task.image_tag.clone(),
            dispatched_at: self.clock.epoch_ms(),
        };

        // 8. Dispatch RPC.
        match self.connector.dispatch_job(&lease.endpoint, request).await {
            Ok(reply) if reply.success => {
                self.lifecycle.record_dispatch(&lease.runtime_id);
                self.store.assign_runtime(&run.run_id, &lease.runtime_id);
                if self.store.transition(&run.run_id, RunState::Running, None, None) {
                    self.publisher.publish_state(&run.run_id, RunState::Running, "dispatched");
                }
                tracing::info!(
                    run_id = %run.run_id,
                    runtime_id = %lease.runtime_id,
                    "run dispatched"
                );
                true
            }
            Ok(reply) => {
                // The worker answered and said no: terminal failure.
                self.lifecycle.release(&lease);
                let reason = reply.error_message.unwrap_or_else(|| "rejected".to_string());
                self.fail(run, FailureClass::AtCapacity, format!("Dispatch failed: {reason}"))
            }
            Err(e) => {
                // Transport failure before the worker accepted: release
                // the lease and leave the run queued for redispatch.
                self.lifecycle.release(&lease);
                tracing::warn!(
                    run_id = %run.run_id,
                    endpoint = lease.endpoint.as_str(),
                    error = %e,
                    "dispatch transport failed, run stays queued"
                );
                if run.state == RunState::Running {
                    self.store.transition(&run.run_id, RunState::Queued, None, None);
                }
                false
            }
        }
    }

    /// Reap a run stranded on a faulted runtime. Called by the
    /// reconciliation loop once the hard timeout has elapsed; the run
    /// never partially commits — it lands in `Failed(Abandoned)`.
    pub fn reap_abandoned(&self, run_id: &RunId) -> bool {
        let Some(run) = self.store.run(run_id) else {
            return false;
        };
        if run.state.is_terminal() {
            return false;
        }
        self.fail(
            &run,
            FailureClass::Abandoned,
            "run abandoned by faulted runtime".to_string(),
        );
        true
    }

    /// Cancel path: route `StopJob` to the worker owning the run. An
    /// unassigned or unreachable worker is logged and skipped; the
    /// reconciliation loop cleans those up.
    pub async fn cancel(&self, run_id: &RunId) {
        let Some(run) = self.store.run(run_id) else {
            tracing::warn!(run_id = %run_id, "cancel for unknown run, skipping");
            return;
        };
        let Some(runtime_id) = run.runtime_id else {
            tracing::info!(run_id = %run_id, "cancel for unassigned run, skipping");
            return;
        };
        let Some(instance) = self.lifecycle.instance(&runtime_id) else {
            tracing::info!(
                run_id = %run_id,
                runtime_id = %runtime_id,
                "cancel for unavailable worker, skipping"
            );
            return;
        };

        match self.connector.stop_job(&instance.endpoint, run_id).await {
            Ok(stopped) => {
                tracing::info!(run_id = %run_id, stopped, "stop requested");
            }
            Err(e) => {
                tracing::warn!(run_id = %run_id, error = %e, "stop request failed");
            }
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
