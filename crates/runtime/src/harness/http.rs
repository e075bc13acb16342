// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Minimal HTTP/1.1 client over TCP for the opencode adapter.
//!
//! Same shape as the coop TCP client: hand-written request lines, a small
//! response reader keyed on Content-Length, and optional basic auth. SSE
//! connections reuse the request path but hand the caller a line stream
//! instead of a buffered body.

use crate::error::RuntimeError;
use base64::Engine;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Basic-auth credentials for a pre-existing server.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl BasicAuth {
    fn header_value(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password);
        format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(raw))
    }
}

#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

fn build_request(
    method: &str,
    path: &str,
    body: Option<&str>,
    auth: Option<&BasicAuth>,
    accept_sse: bool,
) -> String {
    let mut request = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n");
    if let Some(auth) = auth {
        request.push_str(&format!("Authorization: {}\r\n", auth.header_value()));
    }
    if accept_sse {
        request.push_str("Accept: text/event-stream\r\n");
    }
    match body {
        Some(body) => {
            request.push_str(&format!(
                "Content-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            ));
        }
        None if accept_sse => request.push_str("\r\n"),
        None => request.push_str("Connection: close\r\n\r\n"),
    }
    request
}

fn transport(err: impl std::fmt::Display) -> RuntimeError {
    RuntimeError::HarnessTransport(err.to_string())
}

/// Read the status line and headers; returns (status, content_length).
async fn read_head<R>(reader: &mut R) -> Result<(u16, Option<usize>), RuntimeError>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut status_line = String::new();
    reader.read_line(&mut status_line).await.map_err(transport)?;
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| transport(format!("malformed status line: {status_line:?}")))?;

    let mut content_length = None;
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await.map_err(transport)?;
        if n == 0 || line.trim().is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse::<usize>().ok();
            }
        }
    }
    Ok((status, content_length))
}

async fn send_request(addr: &str, request: &str) -> Result<BufReader<TcpStream>, RuntimeError> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| transport(format!("TCP connect to {addr} failed: {e}")))?;
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| transport(format!("write failed: {e}")))?;
    Ok(BufReader::new(stream))
}

async fn unary(
    addr: &str,
    method: &str,
    path: &str,
    body: Option<&str>,
    auth: Option<&BasicAuth>,
) -> Result<HttpResponse, RuntimeError> {
    let request = build_request(method, path, body, auth, false);
    let mut reader = send_request(addr, &request).await?;
    let (status, content_length) = read_head(&mut reader).await?;

    let body = match content_length {
        Some(len) => {
            let mut buf = vec![0u8; len];
            tokio::io::AsyncReadExt::read_exact(&mut reader, &mut buf)
                .await
                .map_err(transport)?;
            String::from_utf8_lossy(&buf).into_owned()
        }
        None => {
            let mut buf = String::new();
            tokio::io::AsyncReadExt::read_to_string(&mut reader, &mut buf)
                .await
                .map_err(transport)?;
            buf
        }
    };
    Ok(HttpResponse { status, body })
}

/// HTTP GET with a bounded timeout.
pub async fn get(
    addr: &str,
    path: &str,
    auth: Option<&BasicAuth>,
) -> Result<HttpResponse, RuntimeError> {
    tokio::time::timeout(REQUEST_TIMEOUT, unary(addr, "GET", path, None, auth))
        .await
        .map_err(|_| transport(format!("GET {path} timed out")))?
}

/// HTTP POST with a bounded timeout.
pub async fn post(
    addr: &str,
    path: &str,
    body: &str,
    auth: Option<&BasicAuth>,
) -> Result<HttpResponse, RuntimeError> {
    tokio::time::timeout(REQUEST_TIMEOUT, unary(addr, "POST", path, Some(body), auth))
        .await
        .map_err(|_| transport(format!("POST {path} timed out")))?
}

/// One server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// A long-lived `text/event-stream` connection.
#[derive(Debug)]
pub struct SseStream {
    lines: Lines<BufReader<TcpStream>>,
}

impl SseStream {
    /// Open the stream and consume the response head. Non-2xx is fatal.
    pub async fn open(
        addr: &str,
        path: &str,
        auth: Option<&BasicAuth>,
    ) -> Result<Self, RuntimeError> {
        let request = build_request("GET", path, None, auth, true);
        let mut reader = send_request(addr, &request).await?;
        let (status, _) = tokio::time::timeout(REQUEST_TIMEOUT, read_head(&mut reader))
            .await
            .map_err(|_| transport(format!("SSE open {path} timed out")))??;
        if !(200..300).contains(&status) {
            return Err(transport(format!("SSE open {path} returned {status}")));
        }
        Ok(Self { lines: reader.lines() })
    }

    /// Next event, or `None` when the server closes the stream.
    pub async fn next_event(&mut self) -> Result<Option<SseEvent>, RuntimeError> {
        let mut event: Option<String> = None;
        let mut data = String::new();

        loop {
            let line = self.lines.next_line().await.map_err(transport)?;
            let Some(line) = line else {
                return Ok(None);
            };
            let line = line.trim_end();

            if line.is_empty() {
                if !data.is_empty() || event.is_some() {
                    return Ok(Some(SseEvent { event, data }));
                }
                continue;
            }
            if let Some(rest) = line.strip_prefix("event:") {
                event = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("data:") {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(rest.trim_start());
            }
            // Comment lines (leading ':') and unknown fields are skipped.
        }
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
