// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn event(run: &str, token: &str) -> JobEvent {
    JobEvent::new(
        RunId::from_string(run),
        TaskId::from_string("task-1"),
        ExecutionToken::from_string(token),
        "item/agentMessage/delta",
        categories::ASSISTANT_DELTA,
    )
}

#[test]
fn sequences_start_at_one_and_are_gap_free() {
    let counter = SequenceCounter::new();
    let mut seen = Vec::new();
    for _ in 0..5 {
        let mut e = event("run-1", "exc-a");
        counter.assign(&mut e);
        seen.push(e.sequence);
    }
    assert_eq!(seen, vec![1, 2, 3, 4, 5]);
}

#[test]
fn sequences_are_independent_per_stream_key() {
    let counter = SequenceCounter::new();

    let mut a1 = event("run-1", "exc-a");
    counter.assign(&mut a1);
    let mut b1 = event("run-2", "exc-b");
    counter.assign(&mut b1);
    let mut a2 = event("run-1", "exc-a");
    counter.assign(&mut a2);
    // A retried attempt of run-1 gets its own stream.
    let mut retry = event("run-1", "exc-c");
    counter.assign(&mut retry);

    assert_eq!(a1.sequence, 1);
    assert_eq!(a2.sequence, 2);
    assert_eq!(b1.sequence, 1);
    assert_eq!(retry.sequence, 1);
}

#[test]
fn forget_resets_all_streams_of_a_run() {
    let counter = SequenceCounter::new();
    let mut e = event("run-1", "exc-a");
    counter.assign(&mut e);
    assert_eq!(counter.current(&e.run_id, &e.execution_token), 1);

    counter.forget(&RunId::from_string("run-1"));
    assert_eq!(counter.current(&e.run_id, &e.execution_token), 0);
}

#[test]
fn serde_round_trip_preserves_bytes() {
    let mut e = event("run-1", "exc-a")
        .with_payload(serde_json::json!({"delta": "hello"}))
        .with_summary("assistant output");
    e.sequence = 3;
    e.timestamp = 1_700_000_000_000;

    let json = serde_json::to_string(&e).unwrap();
    let parsed: JobEvent = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, e);
    // Identical sequence implies byte-identical retransmit.
    assert_eq!(serde_json::to_string(&parsed).unwrap(), json);
}

#[test]
fn optional_fields_are_omitted_when_absent() {
    let json = serde_json::to_string(&event("run-1", "exc-a")).unwrap();
    assert!(!json.contains("artifact_id"));
    assert!(!json.contains("chunk_index"));
    assert!(!json.contains("binary_payload"));
}

#[test]
fn unknown_top_level_fields_are_tolerated() {
    let mut value = serde_json::to_value(event("run-1", "exc-a")).unwrap();
    value
        .as_object_mut()
        .unwrap()
        .insert("future_field".into(), serde_json::json!({"x": 1}));
    let parsed: JobEvent = serde_json::from_value(value).unwrap();
    assert_eq!(parsed.category, categories::ASSISTANT_DELTA);
}

#[test]
fn unknown_category_is_preserved_verbatim() {
    let mut e = event("run-1", "exc-a");
    e.category = "future.category".to_string();
    let json = serde_json::to_string(&e).unwrap();
    let parsed: JobEvent = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.category, "future.category");
}
