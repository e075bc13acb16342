// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OpenCode adapter: HTTP session API plus an SSE event stream.
//!
//! Either connects to a pre-existing server (`OPENCODE_SERVER_BASE_URL` /
//! `OPENCODE_SERVER_URL`, with optional basic auth) or spawns a local one
//! and waits for `/global/health`. A run is one session: create, prompt
//! asynchronously, follow `/event`, poll `/session/status` until idle,
//! then collect the final message and diff.

use super::http::{self, BasicAuth, SseStream};
use super::{
    mode_instruction, truncate_utf8, HarnessEnvelope, HarnessRuntime, HarnessStatus, StderrRing,
};
use crate::error::RuntimeError;
use async_trait::async_trait;
use parking_lot::Mutex;
use rp_core::{categories, EnvMap, JobEvent, RunRequest};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const RUNTIME_NAME: &str = "opencode-sse";
const RUNTIME_MODE: &str = "sse";
const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 30;
const HEALTH_POLL: Duration = Duration::from_millis(250);
const STATUS_POLL: Duration = Duration::from_millis(500);

/// Extract `host:port` from a base URL like `http://127.0.0.1:4096/`.
///
/// Userinfo is dropped (auth travels via explicit env vars); a missing
/// port defaults to 80.
pub fn endpoint_from_url(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .unwrap_or(url);
    let rest = rest.split(['/', '?', '#']).next()?;
    let host_port = rest.rsplit('@').next()?.trim();
    if host_port.is_empty() {
        return None;
    }
    if host_port.contains(':') {
        Some(host_port.to_string())
    } else {
        Some(format!("{host_port}:80"))
    }
}

fn basic_auth_from_env(env: &EnvMap) -> Option<BasicAuth> {
    let username = env.get("OPENCODE_SERVER_USERNAME")?.to_string();
    let password = env.get("OPENCODE_SERVER_PASSWORD").unwrap_or("").to_string();
    Some(BasicAuth { username, password })
}

/// Drives one opencode session per run.
pub struct OpencodeSseRuntime {
    binary: String,
    stderr_capacity: usize,
}

impl OpencodeSseRuntime {
    pub fn new(binary: impl Into<String>, stderr_capacity: usize) -> Self {
        Self { binary: binary.into(), stderr_capacity }
    }
}

impl Default for OpencodeSseRuntime {
    fn default() -> Self {
        Self::new("opencode", 64 * 1024)
    }
}

struct Server {
    addr: String,
    auth: Option<BasicAuth>,
    child: Option<Child>,
    stderr_ring: Arc<Mutex<StderrRing>>,
}

enum SessionEnd {
    Idle,
    Cancelled,
}

impl OpencodeSseRuntime {
    /// Connect to a configured server or spawn one locally.
    async fn ensure_server(
        &self,
        env: &EnvMap,
        workspace: &Path,
        cancel: &CancellationToken,
    ) -> Result<Server, RuntimeError> {
        let stderr_ring = Arc::new(Mutex::new(StderrRing::new(self.stderr_capacity)));

        if let Some(url) = env
            .get("OPENCODE_SERVER_BASE_URL")
            .or_else(|| env.get("OPENCODE_SERVER_URL"))
        {
            let addr = endpoint_from_url(url).ok_or_else(|| {
                RuntimeError::HarnessStartup(format!("unusable opencode server url: {url}"))
            })?;
            return Ok(Server {
                addr,
                auth: basic_auth_from_env(env),
                child: None,
                stderr_ring,
            });
        }

        let host = env.get("OPENCODE_SERVER_HOST").unwrap_or("127.0.0.1").to_string();
        let port = match env.get("OPENCODE_SERVER_PORT").and_then(|p| p.parse::<u16>().ok()) {
            Some(port) => port,
            None => free_port(&host).await?,
        };
        let addr = format!("{host}:{port}");

        let mut cmd = Command::new(&self.binary);
        cmd.arg("serve")
            .arg("--host")
            .arg(&host)
            .arg("--port")
            .arg(port.to_string())
            .current_dir(workspace)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        for (k, v) in env.iter() {
            cmd.env(k, v);
        }
        let mut child = cmd.spawn().map_err(|e| {
            RuntimeError::HarnessStartup(format!("failed to spawn {}: {e}", self.binary))
        })?;

        if let Some(stderr) = child.stderr.take() {
            let ring = Arc::clone(&stderr_ring);
            tokio::spawn(async move {
                let mut lines = tokio::io::BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    ring.lock().push_line(&line);
                }
            });
        }

        let startup_timeout = env
            .get("OPENCODE_SERVER_STARTUP_TIMEOUT_SECONDS")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_STARTUP_TIMEOUT_SECS);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(startup_timeout);

        loop {
            if cancel.is_cancelled() {
                return Err(RuntimeError::HarnessStartup("cancelled during startup".into()));
            }
            if tokio::time::Instant::now() >= deadline {
                let _ = child.start_kill();
                return Err(RuntimeError::HarnessStartup(format!(
                    "opencode server not healthy within {startup_timeout}s"
                )));
            }
            match http::get(&addr, "/global/health", None).await {
                Ok(response) if response.is_success() => break,
                _ => tokio::time::sleep(HEALTH_POLL).await,
            }
        }

        Ok(Server { addr, auth: None, child: Some(child), stderr_ring })
    }

    async fn drive_session(
        &self,
        server: &Server,
        request: &RunRequest,
        session_id: &str,
        events: &mpsc::Sender<JobEvent>,
        cancel: &CancellationToken,
        last_status: &mut Option<String>,
    ) -> Result<SessionEnd, RuntimeError> {
        let auth = server.auth.as_ref();
        let mut sse = SseStream::open(&server.addr, "/event", auth).await?;
        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(request.timeout_seconds.max(1));
        let mut poll = tokio::time::interval(STATUS_POLL);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(RuntimeError::HarnessTimeout(
                        "session did not reach idle within run timeout".to_string(),
                    ));
                }
                event = sse.next_event() => {
                    match event? {
                        Some(sse_event) => {
                            self.emit_sse_event(request, &sse_event.event, &sse_event.data, events).await;
                        }
                        None => {
                            return Err(RuntimeError::HarnessTransport(
                                "SSE stream disconnected before idle".to_string(),
                            ));
                        }
                    }
                }
                _ = poll.tick() => {
                    let response = http::get(&server.addr, "/session/status", auth).await?;
                    if !response.is_success() {
                        return Err(RuntimeError::HarnessTransport(format!(
                            "session status returned {}", response.status
                        )));
                    }
                    if let Some(status) = parse_session_status(&response.body) {
                        if last_status.as_deref() != Some(status.as_str()) {
                            *last_status = Some(status.clone());
                            let event = JobEvent::new(
                                request.run_id.clone(),
                                request.task_id.clone(),
                                request.execution_token.clone(),
                                "session.status",
                                categories::SESSION_STATUS,
                            )
                            .with_payload(json!({ "sessionId": session_id, "status": status }));
                            let _ = events.send(event).await;
                        }
                        if status == "idle" {
                            return Ok(SessionEnd::Idle);
                        }
                    }
                }
            }
        }
    }

    async fn emit_sse_event(
        &self,
        request: &RunRequest,
        name: &Option<String>,
        data: &str,
        events: &mpsc::Sender<JobEvent>,
    ) {
        let payload: Value = serde_json::from_str(data).unwrap_or(Value::Null);
        let kind = name
            .clone()
            .or_else(|| {
                payload
                    .get("type")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_default();

        let category = match kind.as_str() {
            "message.part.delta" => categories::ASSISTANT_DELTA,
            "session.diff" => categories::DIFF_UPDATE,
            k if k.starts_with("session.") => categories::SESSION_STATUS,
            _ => {
                tracing::debug!(kind = %kind, "ignoring unmapped SSE event");
                return;
            }
        };

        let mut body = match payload {
            Value::Object(map) => Value::Object(map),
            Value::Null => json!({ "raw": data }),
            other => json!({ "raw": other }),
        };
        if category == categories::DIFF_UPDATE && request.mode.is_read_only() {
            if let Value::Object(map) = &mut body {
                map.insert("readOnly".to_string(), Value::Bool(true));
            }
        }

        let event = JobEvent::new(
            request.run_id.clone(),
            request.task_id.clone(),
            request.execution_token.clone(),
            kind,
            category,
        )
        .with_payload(body);
        let _ = events.send(event).await;
    }
}

/// Accepts `{"status":"idle"}` and `{"idle":true}` response shapes.
fn parse_session_status(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    if let Some(status) = value.get("status").and_then(Value::as_str) {
        return Some(status.to_string());
    }
    match value.get("idle").and_then(Value::as_bool) {
        Some(true) => Some("idle".to_string()),
        Some(false) => Some("busy".to_string()),
        None => None,
    }
}

async fn free_port(host: &str) -> Result<u16, RuntimeError> {
    let listener = tokio::net::TcpListener::bind((host, 0))
        .await
        .map_err(|e| RuntimeError::HarnessStartup(format!("no free port on {host}: {e}")))?;
    let port = listener
        .local_addr()
        .map_err(|e| RuntimeError::HarnessStartup(e.to_string()))?
        .port();
    drop(listener);
    Ok(port)
}

#[async_trait]
impl HarnessRuntime for OpencodeSseRuntime {
    async fn run(
        &self,
        request: &RunRequest,
        env: &EnvMap,
        workspace: &Path,
        events: mpsc::Sender<JobEvent>,
        cancel: CancellationToken,
    ) -> HarnessEnvelope {
        let fail = |error: RuntimeError| {
            HarnessEnvelope::new(RUNTIME_NAME, RUNTIME_MODE, HarnessStatus::Failed)
                .with_error(error)
        };

        let mut server = match self.ensure_server(env, workspace, &cancel).await {
            Ok(server) => server,
            Err(e) => return fail(e),
        };
        let auth = server.auth.clone();

        let outcome = async {
            // Create the session.
            let response = http::post(&server.addr, "/session", "{}", auth.as_ref()).await?;
            if !response.is_success() {
                return Err(RuntimeError::HarnessTransport(format!(
                    "session create returned {}",
                    response.status
                )));
            }
            let session_id = serde_json::from_str::<Value>(&response.body)
                .ok()
                .and_then(|v| {
                    v.get("id")
                        .or_else(|| v.get("sessionId"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .ok_or_else(|| {
                    RuntimeError::HarnessProtocol("session create reply had no id".to_string())
                })?;

            // Fire the prompt asynchronously.
            let mut prompt = json!({
                "text": mode_instruction(&request.instruction, request.mode),
            });
            if let Some(model) = env.get("OPENCODE_MODEL") {
                prompt["model"] = Value::String(model.to_string());
            }
            if let Some(provider) = env.get("OPENCODE_PROVIDER") {
                prompt["provider"] = Value::String(provider.to_string());
            }
            if let Some(mode) = env.get("OPENCODE_MODE") {
                prompt["mode"] = Value::String(mode.to_string());
            }
            let response = http::post(
                &server.addr,
                &format!("/session/{session_id}/prompt_async"),
                &prompt.to_string(),
                auth.as_ref(),
            )
            .await?;
            if !response.is_success() {
                return Err(RuntimeError::HarnessTransport(format!(
                    "prompt_async returned {}",
                    response.status
                )));
            }

            let mut last_status: Option<String> = None;
            let end = self
                .drive_session(
                    &server,
                    request,
                    &session_id,
                    &events,
                    &cancel,
                    &mut last_status,
                )
                .await?;

            if matches!(end, SessionEnd::Cancelled) {
                return Ok((session_id, last_status, None, None));
            }

            // Collect the final message and diff.
            let message = http::get(
                &server.addr,
                &format!("/session/{session_id}/message"),
                auth.as_ref(),
            )
            .await
            .ok()
            .filter(|r| r.is_success())
            .map(|r| r.body);

            let diff = http::get(
                &server.addr,
                &format!("/session/{session_id}/diff"),
                auth.as_ref(),
            )
            .await
            .ok()
            .filter(|r| r.is_success())
            .map(|r| r.body)
            .filter(|body| !body.trim().is_empty() && body.trim() != "{}");

            if let Some(ref diff) = diff {
                let mut payload = json!({ "sessionId": session_id, "diff": diff });
                if request.mode.is_read_only() {
                    payload["readOnly"] = Value::Bool(true);
                }
                let event = JobEvent::new(
                    request.run_id.clone(),
                    request.task_id.clone(),
                    request.execution_token.clone(),
                    "session.diff",
                    categories::DIFF_UPDATE,
                )
                .with_payload(payload);
                let _ = events.send(event).await;
            }

            Ok((session_id, last_status, message, diff))
        }
        .await;

        if let Some(child) = server.child.as_mut() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }

        let mut envelope = match &outcome {
            Ok(_) if cancel.is_cancelled() => {
                HarnessEnvelope::new(RUNTIME_NAME, RUNTIME_MODE, HarnessStatus::Cancelled)
            }
            Ok(_) => HarnessEnvelope::new(RUNTIME_NAME, RUNTIME_MODE, HarnessStatus::Succeeded),
            Err(_) => HarnessEnvelope::new(RUNTIME_NAME, RUNTIME_MODE, HarnessStatus::Failed),
        };

        match outcome {
            Ok((session_id, last_status, message, _diff)) => {
                envelope = envelope.meta("sessionId", session_id);
                if let Some(status) = last_status {
                    envelope = envelope.meta("sessionStatus", status);
                }
                if let Some(message) = message {
                    // The body is arbitrary harness output and may be
                    // multibyte; cut on a char boundary.
                    envelope = envelope.meta("finalMessage", truncate_utf8(&message, 2048));
                }
            }
            Err(e) => {
                envelope = envelope.with_error(e);
            }
        }

        let stderr = server.stderr_ring.lock().contents();
        if !stderr.is_empty() {
            envelope = envelope.meta("stderr", stderr);
        }
        envelope
    }
}

#[cfg(test)]
#[path = "opencode_tests.rs"]
mod tests;
