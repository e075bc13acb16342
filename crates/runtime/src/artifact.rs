// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Artifact streaming.
//!
//! Produced files are delivered over the event stream as
//! `artifact.manifest` → `artifact.chunk`* → `artifact.commit`, with an
//! incrementally computed SHA-256 in the commit. Chunk events draw from
//! the run's single sequence counter, so artifact delivery stays inside
//! the run's globally monotonic event order.

use crate::bus::EventPublisher;
use rp_core::{categories, ArtifactId, Clock, JobEvent, RunRequest};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

const MIN_CHUNK: u64 = 4 * 1024;
const MAX_CHUNK: u64 = 1024 * 1024;

/// Clamp a configured chunk size into `[4 KiB, 1 MiB]`.
pub fn clamp_chunk_bytes(requested: u64) -> u64 {
    requested.clamp(MIN_CHUNK, MAX_CHUNK)
}

/// Guess a content type from the file extension.
fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("txt") | Some("log") | Some("md") => "text/plain",
        Some("json") => "application/json",
        Some("html") => "text/html",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        Some("patch") | Some("diff") => "text/x-diff",
        _ => "application/octet-stream",
    }
}

/// Streams the artifacts of one finished run.
pub struct ArtifactStreamer<C: Clock> {
    publisher: EventPublisher<C>,
    chunk_bytes: u64,
}

impl<C: Clock> ArtifactStreamer<C> {
    pub fn new(publisher: EventPublisher<C>, chunk_bytes: u64) -> Self {
        Self { publisher, chunk_bytes: clamp_chunk_bytes(chunk_bytes) }
    }

    /// Collect files matching the request's glob patterns and stream each
    /// one, honouring the artifact policy caps. Returns the number of
    /// artifacts fully committed.
    pub async fn stream_run_artifacts(
        &self,
        request: &RunRequest,
        workspace: &Path,
        cancel: &CancellationToken,
    ) -> u32 {
        let files = collect_matches(&request.artifact_patterns, workspace);

        let mut used_names: BTreeSet<String> = BTreeSet::new();
        let mut streamed: u32 = 0;
        let mut total_bytes: u64 = 0;

        for path in files {
            if cancel.is_cancelled() {
                tracing::info!(run_id = %request.run_id, "artifact streaming cancelled");
                break;
            }
            if streamed >= request.artifact_policy.max_count {
                tracing::warn!(
                    run_id = %request.run_id,
                    max = request.artifact_policy.max_count,
                    "artifact count cap reached, skipping remainder"
                );
                break;
            }

            let size = match std::fs::metadata(&path) {
                Ok(meta) if meta.is_file() => meta.len(),
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "artifact missing, skipping");
                    continue;
                }
            };
            if size == 0 {
                tracing::warn!(path = %path.display(), "empty artifact, skipping");
                continue;
            }
            if total_bytes + size > request.artifact_policy.max_total_bytes {
                tracing::warn!(
                    path = %path.display(),
                    total_bytes,
                    cap = request.artifact_policy.max_total_bytes,
                    "artifact byte cap reached, skipping remainder"
                );
                break;
            }

            match self.stream_one(request, &path, size, &mut used_names, cancel).await {
                Ok(()) => {
                    streamed += 1;
                    total_bytes += size;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "artifact stream failed");
                }
            }
        }
        streamed
    }

    /// Emit manifest, chunks, and commit for one file.
    async fn stream_one(
        &self,
        request: &RunRequest,
        path: &Path,
        size: u64,
        used_names: &mut BTreeSet<String>,
        cancel: &CancellationToken,
    ) -> std::io::Result<()> {
        // Open before the manifest so a vanished file never yields a
        // partial stream.
        let mut file = tokio::fs::File::open(path).await?;

        let artifact_id = ArtifactId::generate();
        let file_name = unique_name(path, used_names);
        let content_type = content_type_for(path);
        let total_chunks = size.div_ceil(self.chunk_bytes);

        let base = |event_type: &str, category: &str| {
            let mut event = JobEvent::new(
                request.run_id.clone(),
                request.task_id.clone(),
                request.execution_token.clone(),
                event_type,
                category,
            );
            event.artifact_id = Some(artifact_id.clone());
            event.content_type = Some(content_type.to_string());
            event
        };

        self.publisher.publish(base("artifact.manifest", categories::ARTIFACT_MANIFEST).with_payload(
            json!({
                "artifactId": artifact_id.as_str(),
                "fileName": file_name,
                "contentType": content_type,
                "sizeBytes": size,
                "totalChunks": total_chunks,
            }),
        ));

        let mut hasher = Sha256::new();
        let mut remaining = size;
        let mut chunk_index: u32 = 0;
        let mut buf = vec![0u8; self.chunk_bytes as usize];

        while remaining > 0 {
            if cancel.is_cancelled() {
                return Err(std::io::Error::other("cancelled"));
            }
            let want = remaining.min(self.chunk_bytes) as usize;
            let mut filled = 0;
            while filled < want {
                let n = file.read(&mut buf[filled..want]).await?;
                if n == 0 {
                    return Err(std::io::Error::other("file shrank while streaming"));
                }
                filled += n;
            }
            hasher.update(&buf[..filled]);
            remaining -= filled as u64;

            let mut event = base("artifact.chunk", categories::ARTIFACT_CHUNK);
            event.binary_payload = Some(buf[..filled].to_vec());
            event.chunk_index = Some(chunk_index);
            event.is_last_chunk = Some(remaining == 0);
            self.publisher.publish(event);
            chunk_index += 1;
        }

        let digest = format!("{:x}", hasher.finalize());
        self.publisher.publish(base("artifact.commit", categories::ARTIFACT_COMMIT).with_payload(
            json!({
                "artifactId": artifact_id.as_str(),
                "fileName": file_name,
                "sha256": digest,
                "sizeBytes": size,
                "totalChunks": total_chunks,
            }),
        ));
        Ok(())
    }
}

/// Expand the request's glob patterns under the workspace, deduplicated
/// and sorted for deterministic delivery order.
fn collect_matches(patterns: &[String], workspace: &Path) -> Vec<PathBuf> {
    let mut files: BTreeSet<PathBuf> = BTreeSet::new();
    for pattern in patterns {
        let absolute = workspace.join(pattern);
        let Some(pattern_str) = absolute.to_str() else {
            continue;
        };
        match glob::glob(pattern_str) {
            Ok(paths) => {
                for path in paths.flatten() {
                    // Matches must stay inside the workspace.
                    if path.starts_with(workspace) {
                        files.insert(path);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(pattern = pattern.as_str(), error = %e, "bad artifact pattern");
            }
        }
    }
    files.into_iter().collect()
}

/// Per-run unique delivery name: `name.ext`, then `name_1.ext`, ...
fn unique_name(path: &Path, used: &mut BTreeSet<String>) -> String {
    let original = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    if used.insert(original.clone()) {
        return original;
    }

    let (stem, ext) = match original.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), Some(ext.to_string())),
        _ => (original.clone(), None),
    };
    for n in 1.. {
        let candidate = match &ext {
            Some(ext) => format!("{stem}_{n}.{ext}"),
            None => format!("{stem}_{n}"),
        };
        if used.insert(candidate.clone()) {
            return candidate;
        }
    }
    unreachable!("name space exhausted")
}

#[cfg(test)]
#[path = "artifact_tests.rs"]
mod tests;
