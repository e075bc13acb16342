// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn generated_ids_carry_prefix() {
    let id = RunId::generate();
    assert!(id.as_str().starts_with("run-"));
    assert_eq!(id.as_str().len(), "run-".len() + 19);
}

#[test]
fn generated_ids_are_unique() {
    let a = CommandId::generate();
    let b = CommandId::generate();
    assert_ne!(a, b);
}

#[test]
fn caller_supplied_ids_round_trip_verbatim() {
    // Dispatch requests carry externally minted ids like "run-1".
    let id = RunId::from_string("run-1");
    assert_eq!(id.as_str(), "run-1");
    assert_eq!(id, "run-1");
}

#[test]
fn ids_serialize_transparently() {
    let id = TaskId::from_string("task-alpha");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"task-alpha\"");
    let parsed: TaskId = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, id);
}

#[test]
fn empty_id_is_detectable() {
    let id = RunId::from_string("");
    assert!(id.is_empty());
    assert!(!RunId::generate().is_empty());
}

#[test]
fn ids_usable_as_case_sensitive_map_keys() {
    use std::collections::HashMap;
    let mut map: HashMap<RunId, u32> = HashMap::new();
    map.insert(RunId::from_string("run-x"), 1);
    // Borrow<str> allows &str lookups.
    assert_eq!(map.get("run-x"), Some(&1));
    assert_eq!(map.get("run-y"), None);
}

#[test]
fn execution_token_round_trips() {
    let token = ExecutionToken::from_string("exc-abc123");
    let json = serde_json::to_string(&token).unwrap();
    let parsed: ExecutionToken = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, token);
    assert!(ExecutionToken::generate().as_str().starts_with("exc-"));
}
