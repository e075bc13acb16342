// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::bus::{EventBus, SubscriptionFilter};
use rp_core::test_support::run_request;
use rp_core::{SequenceCounter, SystemClock};
use std::sync::Arc;

fn streamer(
    chunk_bytes: u64,
) -> (ArtifactStreamer<SystemClock>, tokio::sync::mpsc::Receiver<rp_core::JobEvent>) {
    let bus = EventBus::new(4096);
    let (_id, rx) = bus.subscribe(SubscriptionFilter::All);
    let publisher = EventPublisher::new(bus, Arc::new(SequenceCounter::new()), SystemClock);
    (ArtifactStreamer::new(publisher, chunk_bytes), rx)
}

fn drain(rx: &mut tokio::sync::mpsc::Receiver<rp_core::JobEvent>) -> Vec<rp_core::JobEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn three_mib_file_streams_as_three_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let payload: Vec<u8> = (0..3 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(dir.path().join("out.bin"), &payload).unwrap();

    let (streamer, mut rx) = streamer(1024 * 1024);
    let mut request = run_request("run-1");
    request.artifact_patterns = vec!["*.bin".to_string()];

    let streamed = streamer
        .stream_run_artifacts(&request, dir.path(), &CancellationToken::new())
        .await;
    assert_eq!(streamed, 1);

    let events = drain(&mut rx);
    let manifests: Vec<_> =
        events.iter().filter(|e| e.category == categories::ARTIFACT_MANIFEST).collect();
    let chunks: Vec<_> =
        events.iter().filter(|e| e.category == categories::ARTIFACT_CHUNK).collect();
    let commits: Vec<_> =
        events.iter().filter(|e| e.category == categories::ARTIFACT_COMMIT).collect();

    assert_eq!(manifests.len(), 1);
    assert_eq!(chunks.len(), 3);
    assert_eq!(commits.len(), 1);

    let manifest: serde_json::Value =
        serde_json::from_str(manifests[0].payload_json.as_deref().unwrap()).unwrap();
    assert_eq!(manifest["totalChunks"], 3);
    assert_eq!(manifest["sizeBytes"], 3 * 1024 * 1024);

    // Chunk indexes 0,1,2 with only the final one marked last.
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index, Some(i as u32));
        assert_eq!(chunk.is_last_chunk, Some(i == 2));
    }

    // The commit hash equals the hash of the concatenated chunk payloads.
    let mut hasher = Sha256::new();
    for chunk in &chunks {
        hasher.update(chunk.binary_payload.as_deref().unwrap());
    }
    let expected = format!("{:x}", hasher.finalize());
    let commit: serde_json::Value =
        serde_json::from_str(commits[0].payload_json.as_deref().unwrap()).unwrap();
    assert_eq!(commit["sha256"], expected.as_str());

    // And matches the original file content.
    let mut direct = Sha256::new();
    direct.update(&payload);
    assert_eq!(expected, format!("{:x}", direct.finalize()));
}

#[tokio::test]
async fn artifact_sequence_is_monotonic_across_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
    std::fs::write(dir.path().join("b.txt"), b"bravo").unwrap();

    let (streamer, mut rx) = streamer(4096);
    let mut request = run_request("run-1");
    request.artifact_patterns = vec!["*.txt".to_string()];

    streamer
        .stream_run_artifacts(&request, dir.path(), &CancellationToken::new())
        .await;

    let events = drain(&mut rx);
    assert!(!events.is_empty());
    for window in events.windows(2) {
        assert_eq!(window[1].sequence, window[0].sequence + 1);
    }
}

#[tokio::test]
async fn empty_and_missing_files_are_skipped_entirely() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("empty.txt"), b"").unwrap();

    let (streamer, mut rx) = streamer(4096);
    let mut request = run_request("run-1");
    request.artifact_patterns =
        vec!["empty.txt".to_string(), "missing.txt".to_string()];

    let streamed = streamer
        .stream_run_artifacts(&request, dir.path(), &CancellationToken::new())
        .await;
    assert_eq!(streamed, 0);
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn count_cap_limits_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["a.txt", "b.txt", "c.txt"] {
        std::fs::write(dir.path().join(name), b"data").unwrap();
    }

    let (streamer, mut rx) = streamer(4096);
    let mut request = run_request("run-1");
    request.artifact_patterns = vec!["*.txt".to_string()];
    request.artifact_policy.max_count = 2;

    let streamed = streamer
        .stream_run_artifacts(&request, dir.path(), &CancellationToken::new())
        .await;
    assert_eq!(streamed, 2);

    let manifests = drain(&mut rx)
        .into_iter()
        .filter(|e| e.category == categories::ARTIFACT_MANIFEST)
        .count();
    assert_eq!(manifests, 2);
}

#[tokio::test]
async fn byte_cap_stops_streaming() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), vec![1u8; 100]).unwrap();
    std::fs::write(dir.path().join("b.txt"), vec![2u8; 100]).unwrap();

    let (streamer, _rx) = streamer(4096);
    let mut request = run_request("run-1");
    request.artifact_patterns = vec!["*.txt".to_string()];
    request.artifact_policy.max_total_bytes = 150;

    let streamed = streamer
        .stream_run_artifacts(&request, dir.path(), &CancellationToken::new())
        .await;
    assert_eq!(streamed, 1);
}

#[yare::parameterized(
    below = { 1, 4096 },
    in_range = { 64 * 1024, 64 * 1024 },
    above = { 16 * 1024 * 1024, 1024 * 1024 },
)]
fn chunk_sizes_clamp(requested: u64, expected: u64) {
    assert_eq!(clamp_chunk_bytes(requested), expected);
}

#[test]
fn collision_names_get_numeric_suffixes() {
    let mut used = BTreeSet::new();
    let path = Path::new("/w/sub/report.txt");
    assert_eq!(unique_name(path, &mut used), "report.txt");
    assert_eq!(unique_name(path, &mut used), "report_1.txt");
    assert_eq!(unique_name(path, &mut used), "report_2.txt");

    let bare = Path::new("/w/LICENSE");
    assert_eq!(unique_name(bare, &mut used), "LICENSE");
    assert_eq!(unique_name(bare, &mut used), "LICENSE_1");
}

#[test]
fn glob_matches_stay_inside_workspace() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("sub")).unwrap();
    std::fs::write(dir.path().join("sub/x.log"), b"x").unwrap();

    let found = collect_matches(&["**/*.log".to_string()], dir.path());
    assert_eq!(found.len(), 1);
    assert!(found[0].ends_with("sub/x.log"));
}
