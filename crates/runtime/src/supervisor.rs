// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-run supervision.
//!
//! Each run consumed from the queue gets one supervisor task that
//! resolves its workspace, selects the harness adapter, pumps translated
//! events through the stamped publisher, streams artifacts on success,
//! and publishes the terminal `run.status` event. Cancellation cascades
//! from the queue token to the adapter, any commands the run started,
//! and pending artifact streams.

use crate::artifact::ArtifactStreamer;
use crate::bus::EventPublisher;
use crate::command::CommandService;
use crate::error::RuntimeError;
use crate::harness::{
    codex::CodexStdioRuntime, opencode::OpencodeSseRuntime, resolve_runtime_kind, HarnessEnvelope,
    HarnessRuntime, HarnessStatus, RuntimeKind,
};
use crate::queue::{JobQueue, QueuedJob};
use crate::workspace::WorkspaceGuard;
use rp_core::{categories, Clock, FailureClass, JobEvent, Redactor, RunRequest};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::Instrument;

/// Builds the adapter for a resolved runtime kind. Swappable in tests.
pub trait HarnessFactory: Send + Sync {
    fn create(&self, kind: &RuntimeKind) -> Result<Arc<dyn HarnessRuntime>, RuntimeError>;
}

/// Production factory: codex and opencode binaries from the worker image.
pub struct DefaultHarnessFactory {
    pub stderr_capacity: usize,
}

impl HarnessFactory for DefaultHarnessFactory {
    fn create(&self, kind: &RuntimeKind) -> Result<Arc<dyn HarnessRuntime>, RuntimeError> {
        match kind {
            RuntimeKind::Stdio => {
                Ok(Arc::new(CodexStdioRuntime::new("codex", self.stderr_capacity)))
            }
            RuntimeKind::Sse => {
                Ok(Arc::new(OpencodeSseRuntime::new("opencode", self.stderr_capacity)))
            }
            RuntimeKind::Other(mode) => Err(RuntimeError::HarnessStartup(format!(
                "no adapter for runtime mode {mode:?}"
            ))),
        }
    }
}

/// Drives every run admitted by the queue to a terminal state.
pub struct Supervisor<C: Clock> {
    queue: JobQueue,
    publisher: EventPublisher<C>,
    commands: CommandService<C>,
    artifacts: ArtifactStreamer<C>,
    guard: WorkspaceGuard,
    factory: Arc<dyn HarnessFactory>,
    stop_timeout: Duration,
}

impl<C: Clock> Supervisor<C> {
    pub fn new(
        queue: JobQueue,
        publisher: EventPublisher<C>,
        commands: CommandService<C>,
        artifacts: ArtifactStreamer<C>,
        guard: WorkspaceGuard,
        factory: Arc<dyn HarnessFactory>,
        stop_timeout: Duration,
    ) -> Self {
        Self { queue, publisher, commands, artifacts, guard, factory, stop_timeout }
    }

    /// Consume the queue forever, one spawned supervisor per run.
    pub async fn run_loop(self: Arc<Self>) {
        while let Some(job) = self.queue.read_next().await {
            let supervisor = Arc::clone(&self);
            tokio::spawn(async move {
                supervisor.handle_job(job).await;
            });
        }
    }

    /// Execute one run to its terminal state.
    pub async fn handle_job(&self, job: QueuedJob) {
        let span = tracing::info_span!(
            "run.supervise",
            run_id = %job.request.run_id,
            harness = %job.request.harness,
            mode = %job.request.mode,
        );
        self.handle_job_inner(job).instrument(span).await
    }

    async fn handle_job_inner(&self, job: QueuedJob) {
        let request = job.request.clone();
        let started = std::time::Instant::now();

        let redactor = Redactor::new();
        redactor.register_all(request.secret_values());
        tracing::info!(attempt = request.attempt, "run started");

        let envelope = self.execute(&job, &redactor).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match envelope.status {
            HarnessStatus::Succeeded => {
                tracing::info!(elapsed_ms, "run succeeded");
            }
            HarnessStatus::Cancelled => {
                tracing::info!(elapsed_ms, "run cancelled");
            }
            HarnessStatus::Failed => {
                let error = envelope.error.as_ref().map(|e| e.to_string()).unwrap_or_default();
                tracing::error!(elapsed_ms, error = %error, "run failed");
            }
        }

        // Sweep anything the run left behind, then release the slot.
        self.commands.cancel_run(&request.run_id);
        self.publish_terminal(&request, &envelope, &redactor);
        self.queue.mark_completed(&request.run_id);
        self.publisher.forget_run(&request.run_id);
    }

    async fn execute(&self, job: &QueuedJob, redactor: &Redactor) -> HarnessEnvelope {
        let request = &job.request;

        let workspace = match self.guard.resolve(
            request.repository_id.as_str(),
            request.task_id.as_str(),
            request.working_directory.as_deref().unwrap_or(""),
            true,
        ) {
            Ok(path) => path,
            Err(e) => {
                return HarnessEnvelope::new("none", "none", HarnessStatus::Failed)
                    .with_error(RuntimeError::Workspace(e))
            }
        };

        let env = request.merged_env();
        let kind = resolve_runtime_kind(&request.harness, request.mode, &env);
        let adapter = match self.factory.create(&kind) {
            Ok(adapter) => adapter,
            Err(e) => {
                return HarnessEnvelope::new(kind.as_str(), kind.as_str(), HarnessStatus::Failed)
                    .with_error(e)
            }
        };

        // Adapter events flow through the stamped publisher; the pump
        // keeps running until the adapter drops its sender.
        let (tx, mut rx) = mpsc::channel::<JobEvent>(256);
        let publisher = self.publisher.clone();
        let redact = redactor.clone();
        let pump = tokio::spawn(async move {
            while let Some(mut event) = rx.recv().await {
                if let Some(summary) = event.summary.take() {
                    event.summary = Some(redact.redact(&summary));
                }
                publisher.publish(event);
            }
        });

        let cancel = job.cancel.clone();
        let run_future = adapter.run(request, &env, &workspace, tx, cancel.clone());
        tokio::pin!(run_future);

        // A cancelled run must still wind down within the stop timeout.
        let envelope = tokio::select! {
            envelope = &mut run_future => envelope,
            _ = async {
                cancel.cancelled().await;
                tokio::time::sleep(self.stop_timeout).await;
            } => {
                tracing::error!(
                    run_id = %request.run_id,
                    "adapter ignored cancellation past the stop timeout"
                );
                HarnessEnvelope::new(kind.as_str(), kind.as_str(), HarnessStatus::Failed)
                    .with_error(RuntimeError::HarnessTimeout(
                        "cancellation did not complete within stop timeout".to_string(),
                    ))
            }
        };

        let _ = pump.await;

        if envelope.status == HarnessStatus::Succeeded && !request.artifact_patterns.is_empty() {
            let streamed = self
                .artifacts
                .stream_run_artifacts(request, &workspace, &job.cancel)
                .await;
            tracing::info!(run_id = %request.run_id, streamed, "artifacts streamed");
        }

        envelope
    }

    fn publish_terminal(
        &self,
        request: &RunRequest,
        envelope: &HarnessEnvelope,
        redactor: &Redactor,
    ) {
        let state = match envelope.status {
            HarnessStatus::Succeeded => "succeeded",
            HarnessStatus::Failed => "failed",
            HarnessStatus::Cancelled => "cancelled",
        };
        let failure_class: Option<FailureClass> =
            envelope.error.as_ref().map(|e| e.failure_class());

        let metadata: serde_json::Map<String, serde_json::Value> = envelope
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(redactor.redact(v))))
            .collect();

        let mut event = JobEvent::new(
            request.run_id.clone(),
            request.task_id.clone(),
            request.execution_token.clone(),
            "run.status",
            categories::RUN_STATUS,
        )
        .with_payload(json!({
            "state": state,
            "runtime": envelope.runtime,
            "runtimeMode": envelope.runtime_mode,
            "failureClass": failure_class,
            "metadata": metadata,
        }));
        if let Some(error) = &envelope.error {
            event.error = Some(redactor.redact(&error.to_string()));
        }
        self.publisher.publish(event);
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
