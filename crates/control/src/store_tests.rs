// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

pub(crate) fn run(id: &str, task: &str, created_at: u64) -> RunRecord {
    RunRecord {
        run_id: RunId::from_string(id),
        repository_id: RepositoryId::from_string("repo-1"),
        task_id: TaskId::from_string(task),
        execution_token: ExecutionToken::from_string(format!("exc-{id}")),
        state: RunState::Queued,
        harness: HarnessType::Codex,
        mode: ExecutionMode::Default,
        attempt: 1,
        created_at,
        runtime_id: None,
        summary: None,
        failure_class: None,
        environment_vars: EnvMap::new(),
    }
}

#[test]
fn queue_head_orders_by_created_then_id() {
    let store = MemoryStore::new();
    store.insert_run(run("run-b", "task-1", 100));
    store.insert_run(run("run-a", "task-1", 100));
    store.insert_run(run("run-c", "task-1", 50));
    store.insert_run(run("run-z", "task-2", 1));

    let head = store.queue_head(&TaskId::from_string("task-1")).unwrap();
    assert_eq!(head.run_id, "run-c");

    // Same created_at ties break on run id ascending.
    let mut done = run("run-c", "task-1", 50);
    done.state = RunState::Succeeded;
    store.insert_run(done);
    let head = store.queue_head(&TaskId::from_string("task-1")).unwrap();
    assert_eq!(head.run_id, "run-a");
}

#[test]
fn terminal_runs_never_head_the_queue() {
    let store = MemoryStore::new();
    let mut failed = run("run-a", "task-1", 1);
    failed.state = RunState::Failed;
    store.insert_run(failed);
    assert!(store.queue_head(&TaskId::from_string("task-1")).is_none());
}

#[test]
fn counts_track_running_state_only() {
    let store = MemoryStore::new();
    store.insert_run(run("run-1", "task-1", 1));
    let mut running = run("run-2", "task-1", 2);
    running.state = RunState::Running;
    store.insert_run(running);

    assert_eq!(store.active_global(), 1);
    assert_eq!(store.active_for_repo(&RepositoryId::from_string("repo-1")), 1);
    assert_eq!(store.active_for_repo(&RepositoryId::from_string("repo-2")), 0);
    assert_eq!(store.queued_depth(&TaskId::from_string("task-1")), 1);
}

#[test]
fn transition_enforces_the_state_machine() {
    let store = MemoryStore::new();
    store.insert_run(run("run-1", "task-1", 1));
    let id = RunId::from_string("run-1");

    assert!(store.transition(&id, RunState::Running, None, None));
    assert!(store.transition(
        &id,
        RunState::Failed,
        Some("boom".to_string()),
        Some(FailureClass::HarnessTransport)
    ));

    // Terminal is frozen: exactly one terminal transition per run.
    assert!(!store.transition(&id, RunState::Succeeded, None, None));
    assert!(!store.transition(&id, RunState::Queued, None, None));

    let stored = store.run(&id).unwrap();
    assert_eq!(stored.state, RunState::Failed);
    assert_eq!(stored.summary.as_deref(), Some("boom"));
    assert_eq!(stored.failure_class, Some(FailureClass::HarnessTransport));
}

#[test]
fn transition_on_unknown_run_is_rejected() {
    let store = MemoryStore::new();
    assert!(!store.transition(&RunId::from_string("run-x"), RunState::Running, None, None));
}

#[test]
fn assign_runtime_pins_the_worker() {
    let store = MemoryStore::new();
    store.insert_run(run("run-1", "task-1", 1));
    store.assign_runtime(&RunId::from_string("run-1"), &RuntimeId::from_string("rt-9"));
    assert_eq!(
        store.run(&RunId::from_string("run-1")).unwrap().runtime_id,
        Some(RuntimeId::from_string("rt-9"))
    );
}
