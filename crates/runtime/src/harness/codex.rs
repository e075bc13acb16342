// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Codex adapter: child process speaking line-delimited JSON-RPC on stdio.
//!
//! The adapter owns the child's stdin/stdout; stderr is captured into a
//! bounded ring for the envelope. After startup three requests go out in
//! order (`initialize`, `thread/start`, `turn/start`), correlated by id.
//! Notifications stream in as translated [`JobEvent`]s until
//! `turn/completed` ends the run.

use super::{
    mode_instruction, resolve_approval_policy, resolve_model, HarnessEnvelope, HarnessRuntime,
    HarnessStatus, StderrRing,
};
use crate::error::RuntimeError;
use async_trait::async_trait;
use parking_lot::Mutex;
use rp_core::{categories, EnvMap, JobEvent, RunRequest};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const RUNTIME_NAME: &str = "codex-stdio";
const RUNTIME_MODE: &str = "stdio";

/// Map a codex notification method onto a wire category.
pub fn translate_method(method: &str) -> Option<&'static str> {
    match method {
        "item/reasoning/textDelta" | "item/reasoning/summaryTextDelta" => {
            Some(categories::REASONING_DELTA)
        }
        "item/agentMessage/delta" => Some(categories::ASSISTANT_DELTA),
        "item/commandExecution/outputDelta" => Some(categories::COMMAND_DELTA),
        "item/fileChange/outputDelta" | "turn/diff/updated" => Some(categories::DIFF_UPDATE),
        _ => None,
    }
}

/// Drives a codex child process for one run.
pub struct CodexStdioRuntime {
    binary: String,
    stderr_capacity: usize,
}

impl CodexStdioRuntime {
    pub fn new(binary: impl Into<String>, stderr_capacity: usize) -> Self {
        Self { binary: binary.into(), stderr_capacity }
    }
}

impl Default for CodexStdioRuntime {
    fn default() -> Self {
        Self::new("codex", 64 * 1024)
    }
}

enum Incoming {
    Response { id: u64, error: Option<Value>, result: Value },
    Notification { method: String, params: Value },
}

struct Driver {
    request: RunRequest,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
    events: mpsc::Sender<JobEvent>,
    cancel: CancellationToken,
    deadline: tokio::time::Instant,
    thread_id: Option<String>,
    turn_id: Option<String>,
    last_status: Option<String>,
}

enum DriveEnd {
    Completed { status: String },
    Cancelled,
}

impl Driver {
    async fn send_request(
        &mut self,
        id: u64,
        method: &str,
        params: Value,
    ) -> Result<(), RuntimeError> {
        let line = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        let mut buf = line.to_string();
        buf.push('\n');
        self.stdin
            .write_all(buf.as_bytes())
            .await
            .map_err(|e| RuntimeError::HarnessTransport(format!("stdin write failed: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| RuntimeError::HarnessTransport(format!("stdin flush failed: {e}")))?;
        Ok(())
    }

    /// Read the next protocol message, honouring cancel and the deadline.
    async fn next_message(&mut self) -> Result<Option<Incoming>, RuntimeError> {
        loop {
            let line = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep_until(self.deadline) => {
                    return Err(RuntimeError::HarnessTimeout(
                        "no turn completion within run timeout".to_string(),
                    ));
                }
                line = self.lines.next_line() => line
                    .map_err(|e| RuntimeError::HarnessTransport(format!("stdout read failed: {e}")))?,
            };

            let Some(line) = line else {
                return Err(RuntimeError::HarnessTransport(
                    "stdio closed before turn completion".to_string(),
                ));
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let value: Value = match serde_json::from_str(line) {
                Ok(v) => v,
                Err(_) => {
                    // Harnesses interleave diagnostics on stdout; skip
                    // anything that is not a JSON object.
                    tracing::debug!(line, "ignoring non-JSON stdout line");
                    continue;
                }
            };

            if let Some(id) = value.get("id").and_then(Value::as_u64) {
                return Ok(Some(Incoming::Response {
                    id,
                    error: value.get("error").filter(|e| !e.is_null()).cloned(),
                    result: value.get("result").cloned().unwrap_or(Value::Null),
                }));
            }
            if let Some(method) = value.get("method").and_then(Value::as_str) {
                return Ok(Some(Incoming::Notification {
                    method: method.to_string(),
                    params: value.get("params").cloned().unwrap_or(Value::Null),
                }));
            }
            tracing::debug!(line, "ignoring frame with neither id nor method");
        }
    }

    /// Emit the translated event for a notification; returns the final
    /// status when the notification ends the turn.
    async fn handle_notification(&mut self, method: &str, params: &Value) -> Option<String> {
        if method == "turn/completed" {
            let status = params
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            self.last_status = Some(status.clone());
            return Some(status);
        }

        if let Some(turn) = params.get("turnId").and_then(Value::as_str) {
            self.turn_id = Some(turn.to_string());
        }

        if let Some(category) = translate_method(method) {
            let event = JobEvent::new(
                self.request.run_id.clone(),
                self.request.task_id.clone(),
                self.request.execution_token.clone(),
                method,
                category,
            )
            .with_payload(params.clone());
            let _ = self.events.send(event).await;
        } else {
            tracing::debug!(method, "ignoring unmapped notification");
        }
        None
    }

    /// Wait for the response correlating `id`, emitting any notifications
    /// that arrive in between.
    async fn await_response(&mut self, id: u64) -> Result<Option<Value>, RuntimeError> {
        loop {
            match self.next_message().await? {
                None => return Ok(None),
                Some(Incoming::Response { id: got, error, result }) => {
                    if got != id {
                        tracing::debug!(got, expected = id, "ignoring stale response id");
                        continue;
                    }
                    if let Some(error) = error {
                        return Err(RuntimeError::HarnessProtocol(format!(
                            "request {id} failed: {error}"
                        )));
                    }
                    return Ok(Some(result));
                }
                Some(Incoming::Notification { method, params }) => {
                    if let Some(status) = self.handle_notification(&method, &params).await {
                        // A turn completing before all requests are
                        // answered is a protocol violation.
                        return Err(RuntimeError::HarnessProtocol(format!(
                            "turn completed ({status}) before startup finished"
                        )));
                    }
                }
            }
        }
    }

    async fn drive(&mut self, env: &EnvMap) -> Result<DriveEnd, RuntimeError> {
        self.send_request(1, "initialize", json!({ "clientInfo": { "name": "runplane" } }))
            .await?;
        if self.await_response(1).await?.is_none() {
            return Ok(DriveEnd::Cancelled);
        }

        self.send_request(2, "thread/start", json!({ "cwd": self.request.working_directory }))
            .await?;
        match self.await_response(2).await? {
            None => return Ok(DriveEnd::Cancelled),
            Some(result) => {
                self.thread_id = result
                    .get("threadId")
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
        }

        let instruction = mode_instruction(&self.request.instruction, self.request.mode);
        let mut params = json!({ "threadId": self.thread_id, "prompt": instruction });
        if let Some(model) = resolve_model(env, "CODEX_MODEL") {
            params["model"] = Value::String(model);
        }
        self.send_request(3, "turn/start", params).await?;
        match self.await_response(3).await? {
            None => return Ok(DriveEnd::Cancelled),
            Some(result) => {
                if let Some(turn) = result.get("turnId").and_then(Value::as_str) {
                    self.turn_id = Some(turn.to_string());
                }
            }
        }

        // Event loop until the turn completes.
        loop {
            match self.next_message().await? {
                None => return Ok(DriveEnd::Cancelled),
                Some(Incoming::Notification { method, params }) => {
                    if let Some(status) = self.handle_notification(&method, &params).await {
                        return Ok(DriveEnd::Completed { status });
                    }
                }
                Some(Incoming::Response { id, .. }) => {
                    tracing::debug!(id, "ignoring unsolicited response");
                }
            }
        }
    }
}

impl CodexStdioRuntime {
    fn spawn(
        &self,
        request: &RunRequest,
        env: &EnvMap,
        workspace: &Path,
    ) -> Result<Child, RuntimeError> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("serve")
            .arg("--stdio")
            .current_dir(workspace)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        for (k, v) in env.iter() {
            cmd.env(k, v);
        }
        cmd.env("CODEX_APPROVAL_POLICY", resolve_approval_policy(env, request.mode));
        if env.get("CODEX_SANDBOX").is_none() {
            cmd.env("CODEX_SANDBOX", "danger-full-access");
        }
        if let Some(model) = resolve_model(env, "CODEX_MODEL") {
            cmd.env("CODEX_MODEL", model);
        }

        cmd.spawn()
            .map_err(|e| RuntimeError::HarnessStartup(format!("failed to spawn {}: {e}", self.binary)))
    }
}

#[async_trait]
impl HarnessRuntime for CodexStdioRuntime {
    async fn run(
        &self,
        request: &RunRequest,
        env: &EnvMap,
        workspace: &Path,
        events: mpsc::Sender<JobEvent>,
        cancel: CancellationToken,
    ) -> HarnessEnvelope {
        let mut child = match self.spawn(request, env, workspace) {
            Ok(child) => child,
            Err(e) => {
                return HarnessEnvelope::new(RUNTIME_NAME, RUNTIME_MODE, HarnessStatus::Failed)
                    .with_error(e)
            }
        };

        // Stdin/stdout belong to the driver; stderr drains into the ring.
        let stderr_ring = Arc::new(Mutex::new(StderrRing::new(self.stderr_capacity)));
        let stderr_task = child.stderr.take().map(|stderr| {
            let ring = Arc::clone(&stderr_ring);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    ring.lock().push_line(&line);
                }
            })
        });

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                return HarnessEnvelope::new(RUNTIME_NAME, RUNTIME_MODE, HarnessStatus::Failed)
                    .with_error(RuntimeError::HarnessStartup(
                        "child stdio pipes unavailable".to_string(),
                    ))
            }
        };

        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(request.timeout_seconds.max(1));
        let mut driver = Driver {
            request: request.clone(),
            stdin,
            lines: BufReader::new(stdout).lines(),
            events,
            cancel,
            deadline,
            thread_id: None,
            turn_id: None,
            last_status: None,
        };

        let outcome = driver.drive(env).await;

        let _ = child.start_kill();
        let _ = child.wait().await;
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        let mut envelope = match outcome {
            Ok(DriveEnd::Completed { status }) if status == "completed" => {
                HarnessEnvelope::new(RUNTIME_NAME, RUNTIME_MODE, HarnessStatus::Succeeded)
            }
            Ok(DriveEnd::Completed { status }) => {
                HarnessEnvelope::new(RUNTIME_NAME, RUNTIME_MODE, HarnessStatus::Failed).with_error(
                    RuntimeError::HarnessProtocol(format!("turn completed with status {status}")),
                )
            }
            Ok(DriveEnd::Cancelled) => {
                HarnessEnvelope::new(RUNTIME_NAME, RUNTIME_MODE, HarnessStatus::Cancelled)
            }
            Err(e) => HarnessEnvelope::new(RUNTIME_NAME, RUNTIME_MODE, HarnessStatus::Failed)
                .with_error(e),
        };

        if let Some(thread_id) = driver.thread_id {
            envelope = envelope.meta("threadId", thread_id);
        }
        if let Some(turn_id) = driver.turn_id {
            envelope = envelope.meta("turnId", turn_id);
        }
        if let Some(status) = driver.last_status {
            envelope = envelope.meta("turnStatus", status);
        }
        let stderr = stderr_ring.lock().contents();
        if !stderr.is_empty() {
            envelope = envelope.meta("stderr", stderr);
        }
        envelope
    }
}

#[cfg(test)]
#[path = "codex_tests.rs"]
mod tests;
