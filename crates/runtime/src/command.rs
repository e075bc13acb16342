// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ad-hoc command execution on a worker.
//!
//! Commands run as child processes in their own process group so timeout
//! and cancel kills take descendants with them. Output is streamed
//! line-by-line as `command.delta` events until a shared captured-bytes
//! budget is exhausted; after that lines are counted but not emitted and
//! the terminal snapshot reports `output_truncated`.

use crate::bus::EventPublisher;
use crate::error::RuntimeError;
use parking_lot::Mutex;
use rp_core::{
    categories, Clock, CommandId, CommandState, CommandStatus, ExecutionToken, JobEvent, RunId,
    TaskId,
};
use rp_wire::StartCommandRequest;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;

/// Clamp bounds for command execution, derived from [`rp_core::RuntimeConfig`].
#[derive(Debug, Clone)]
pub struct CommandLimits {
    pub default_timeout_seconds: u64,
    pub max_timeout_seconds: u64,
    pub max_output_bytes: u64,
}

impl CommandLimits {
    pub fn from_config(config: &rp_core::RuntimeConfig) -> Self {
        Self {
            default_timeout_seconds: config.command_timeout_seconds,
            max_timeout_seconds: config.max_command_timeout_seconds,
            max_output_bytes: config.max_command_output_bytes,
        }
    }

    /// Requested timeout clamped into `[1, max]`; 0 means "default".
    pub fn clamp_timeout(&self, requested: u64) -> u64 {
        let timeout = if requested == 0 { self.default_timeout_seconds } else { requested };
        timeout.clamp(1, self.max_timeout_seconds)
    }

    /// Requested budget clamped into `[4096, max]`; 0 means "default".
    pub fn clamp_output_bytes(&self, requested: u64) -> u64 {
        let bytes = if requested == 0 { self.max_output_bytes } else { requested };
        bytes.clamp(4096, self.max_output_bytes)
    }
}

struct Tracked {
    state: CommandState,
    cancel: CancellationToken,
}

/// Per-worker command registry and executor.
#[derive(Clone)]
pub struct CommandService<C: Clock> {
    publisher: EventPublisher<C>,
    limits: CommandLimits,
    commands: Arc<Mutex<HashMap<CommandId, Tracked>>>,
}

impl<C: Clock> CommandService<C> {
    pub fn new(publisher: EventPublisher<C>, limits: CommandLimits) -> Self {
        Self { publisher, limits, commands: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Validate, spawn, and start streaming a command. Returns the new
    /// command id once `command.started` has been published.
    pub fn start(&self, request: StartCommandRequest) -> Result<CommandId, RuntimeError> {
        let required: [(&'static str, &str); 4] = [
            ("run_id", &request.run_id),
            ("task_id", &request.task_id),
            ("execution_token", &request.execution_token),
            ("command", &request.command),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(RuntimeError::MissingField { field });
            }
        }

        let cwd = match &request.working_directory {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_dir().map_err(RuntimeError::Io)?,
        };
        if !cwd.is_dir() {
            return Err(RuntimeError::Spawn(format!(
                "working directory {} does not exist",
                cwd.display()
            )));
        }

        let timeout = self.limits.clamp_timeout(request.timeout_seconds);
        let budget = self.limits.clamp_output_bytes(request.max_output_bytes);

        let mut cmd = tokio::process::Command::new(&request.command);
        cmd.args(&request.args)
            .current_dir(&cwd)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        // Request env layers over the worker env; keys are trimmed.
        for (k, v) in &request.env {
            cmd.env(k.trim(), v);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| RuntimeError::Spawn(format!("{}: {e}", request.command)))?;

        let command_id = CommandId::generate();
        let run_id = RunId::from_string(&request.run_id);
        let task_id = TaskId::from_string(&request.task_id);
        let token = ExecutionToken::from_string(&request.execution_token);
        let started_at = self.publisher.clock().epoch_ms();
        let cancel = CancellationToken::new();

        let state = CommandState::started(
            command_id.clone(),
            run_id.clone(),
            task_id.clone(),
            token.clone(),
            started_at,
        );
        self.commands
            .lock()
            .insert(command_id.clone(), Tracked { state, cancel: cancel.clone() });

        self.publisher.publish(
            JobEvent::new(
                run_id.clone(),
                task_id.clone(),
                token.clone(),
                "command.started",
                categories::COMMAND_STARTED,
            )
            .with_payload(json!({
                "commandId": command_id.as_str(),
                "command": request.command,
                "args": request.args,
            }))
            .with_command_id(command_id.clone()),
        );

        // Shared captured-bytes budget across both streams.
        let remaining = Arc::new(AtomicU64::new(budget));
        let truncated = Arc::new(AtomicBool::new(false));

        let stdout_task = child.stdout.take().map(|stdout| {
            tokio::spawn(pump_stream(
                stdout,
                "stdout",
                self.stream_ctx(&command_id, &run_id, &task_id, &token),
                Arc::clone(&remaining),
                Arc::clone(&truncated),
            ))
        });
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(pump_stream(
                stderr,
                "stderr",
                self.stream_ctx(&command_id, &run_id, &task_id, &token),
                Arc::clone(&remaining),
                Arc::clone(&truncated),
            ))
        });

        let service = self.clone();
        let waiter_id = command_id.clone();
        tokio::spawn(async move {
            service
                .supervise(child, waiter_id, timeout, cancel, stdout_task, stderr_task, truncated)
                .await;
        });

        Ok(command_id)
    }

    fn stream_ctx(
        &self,
        command_id: &CommandId,
        run_id: &RunId,
        task_id: &TaskId,
        token: &ExecutionToken,
    ) -> StreamCtx<C> {
        StreamCtx {
            publisher: self.publisher.clone(),
            command_id: command_id.clone(),
            run_id: run_id.clone(),
            task_id: task_id.clone(),
            token: token.clone(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn supervise(
        &self,
        mut child: tokio::process::Child,
        command_id: CommandId,
        timeout_seconds: u64,
        cancel: CancellationToken,
        stdout_task: Option<tokio::task::JoinHandle<u64>>,
        stderr_task: Option<tokio::task::JoinHandle<u64>>,
        truncated: Arc<AtomicBool>,
    ) -> Option<()> {
        let pid = child.id();
        let deadline = Duration::from_secs(timeout_seconds);

        enum WaitEnd {
            Exited(std::io::Result<std::process::ExitStatus>),
            Cancelled,
            TimedOut,
        }

        let end = tokio::select! {
            result = child.wait() => WaitEnd::Exited(result),
            _ = cancel.cancelled() => WaitEnd::Cancelled,
            _ = tokio::time::sleep(deadline) => WaitEnd::TimedOut,
        };

        let (status, exit_code, error_message) = match end {
            WaitEnd::Exited(Ok(exit)) => {
                let code = exit.code();
                if exit.success() {
                    (CommandStatus::Completed, code, None)
                } else {
                    (CommandStatus::Failed, code, None)
                }
            }
            WaitEnd::Exited(Err(e)) => {
                (CommandStatus::Failed, None, Some(format!("wait failed: {e}")))
            }
            WaitEnd::Cancelled => {
                kill_group(pid, &mut child).await;
                (CommandStatus::Canceled, None, None)
            }
            WaitEnd::TimedOut => {
                kill_group(pid, &mut child).await;
                (CommandStatus::TimedOut, None, Some(format!(
                    "timed out after {timeout_seconds}s"
                )))
            }
        };

        // Let the pumps drain whatever the pipes still hold.
        let stdout_bytes = match stdout_task {
            Some(task) => task.await.unwrap_or(0),
            None => 0,
        };
        let stderr_bytes = match stderr_task {
            Some(task) => task.await.unwrap_or(0),
            None => 0,
        };

        let completed_at = self.publisher.clock().epoch_ms();
        let snapshot = {
            let mut commands = self.commands.lock();
            let tracked = commands.get_mut(&command_id)?;
            tracked.state.stdout_bytes = stdout_bytes;
            tracked.state.stderr_bytes = stderr_bytes;
            tracked.state.output_truncated = truncated.load(Ordering::SeqCst);
            tracked.state.finish(status, exit_code, completed_at, error_message);
            tracked.state.clone()
        };

        self.publisher.publish(
            JobEvent::new(
                snapshot.run_id.clone(),
                snapshot.task_id.clone(),
                snapshot.execution_token.clone(),
                "command.completed",
                categories::COMMAND_COMPLETED,
            )
            .with_payload(json!({
                "commandId": command_id.as_str(),
                "status": snapshot.status,
                "exitCode": snapshot.exit_code,
                "stdoutBytes": snapshot.stdout_bytes,
                "stderrBytes": snapshot.stderr_bytes,
                "outputTruncated": snapshot.output_truncated,
                "timedOut": snapshot.status == CommandStatus::TimedOut,
            }))
            .with_command_id(command_id.clone()),
        );
        Some(())
    }

    /// Request cancellation. Returns false once the command is terminal
    /// or unknown.
    pub fn cancel(&self, command_id: &CommandId) -> bool {
        let mut commands = self.commands.lock();
        match commands.get_mut(command_id) {
            Some(tracked) => {
                if tracked.state.request_cancel() {
                    tracked.cancel.cancel();
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    /// Cancel every still-running command belonging to a run.
    pub fn cancel_run(&self, run_id: &RunId) {
        let mut commands = self.commands.lock();
        for tracked in commands.values_mut() {
            if &tracked.state.run_id == run_id && tracked.state.request_cancel() {
                tracked.cancel.cancel();
            }
        }
    }

    /// Current snapshot, if the command is known.
    pub fn status(&self, command_id: &CommandId) -> Option<CommandState> {
        self.commands.lock().get(command_id).map(|t| t.state.clone())
    }

    /// Terminal snapshots older than the cutoff are dropped.
    pub fn prune_finished(&self, before_epoch_ms: u64) {
        self.commands.lock().retain(|_, t| {
            !t.state.status.is_terminal()
                || t.state.completed_at.unwrap_or(u64::MAX) >= before_epoch_ms
        });
    }
}

struct StreamCtx<C: Clock> {
    publisher: EventPublisher<C>,
    command_id: CommandId,
    run_id: RunId,
    task_id: TaskId,
    token: ExecutionToken,
}

/// Stream one pipe line-by-line; returns total bytes observed.
async fn pump_stream<C: Clock, R: AsyncRead + Unpin>(
    stream: R,
    name: &'static str,
    ctx: StreamCtx<C>,
    remaining: Arc<AtomicU64>,
    truncated: Arc<AtomicBool>,
) -> u64 {
    let mut lines = BufReader::new(stream).lines();
    let mut total: u64 = 0;

    while let Ok(Some(line)) = lines.next_line().await {
        let line_bytes = line.len() as u64 + 1;
        total += line_bytes;

        // One-way latch: the first line that does not fit the shared
        // budget flips the truncation flag, and from then on lines are
        // counted but never emitted, even if a shorter one would fit.
        if truncated.load(Ordering::SeqCst) {
            continue;
        }
        let mut emitted = false;
        let mut current = remaining.load(Ordering::SeqCst);
        while current >= line_bytes {
            match remaining.compare_exchange(
                current,
                current - line_bytes,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    emitted = true;
                    break;
                }
                Err(actual) => current = actual,
            }
        }

        if emitted {
            ctx.publisher.publish(
                JobEvent::new(
                    ctx.run_id.clone(),
                    ctx.task_id.clone(),
                    ctx.token.clone(),
                    "command.delta",
                    categories::COMMAND_DELTA,
                )
                .with_payload(json!({
                    "commandId": ctx.command_id.as_str(),
                    "stream": name,
                    "line": line,
                }))
                .with_command_id(ctx.command_id.clone()),
            );
        } else {
            truncated.store(true, Ordering::SeqCst);
        }
    }
    total
}

/// SIGKILL the whole process group, falling back to the direct child.
async fn kill_group(pid: Option<u32>, child: &mut tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
