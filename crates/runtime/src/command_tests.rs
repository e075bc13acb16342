// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::bus::{EventBus, SubscriptionFilter};
use rp_core::{SequenceCounter, SystemClock};
use std::time::Instant;

fn service() -> (CommandService<SystemClock>, tokio::sync::mpsc::Receiver<JobEvent>) {
    let bus = EventBus::new(256);
    let (_id, rx) = bus.subscribe(SubscriptionFilter::All);
    let publisher = EventPublisher::new(bus, Arc::new(SequenceCounter::new()), SystemClock);
    let limits = CommandLimits {
        default_timeout_seconds: 30,
        max_timeout_seconds: 60,
        max_output_bytes: 64 * 1024,
    };
    (CommandService::new(publisher, limits), rx)
}

fn request(command: &str, args: &[&str]) -> StartCommandRequest {
    StartCommandRequest {
        run_id: "run-1".to_string(),
        task_id: "task-1".to_string(),
        execution_token: "exc-1".to_string(),
        command: command.to_string(),
        args: args.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

/// Wait for the terminal snapshot of a command, bounded by `secs`.
async fn wait_terminal(
    service: &CommandService<SystemClock>,
    id: &CommandId,
    secs: u64,
) -> CommandState {
    let deadline = Instant::now() + Duration::from_secs(secs);
    loop {
        if let Some(state) = service.status(id) {
            if state.status.is_terminal() {
                return state;
            }
        }
        assert!(Instant::now() < deadline, "command did not finish in {secs}s");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[yare::parameterized(
    run_id    = { "run_id" },
    task_id   = { "task_id" },
    token     = { "execution_token" },
    command   = { "command" },
)]
fn missing_required_field_is_rejected(field: &str) {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    let _guard = runtime.enter();
    let (service, _rx) = service();

    let mut req = request("true", &[]);
    match field {
        "run_id" => req.run_id.clear(),
        "task_id" => req.task_id.clear(),
        "execution_token" => req.execution_token.clear(),
        _ => req.command.clear(),
    }
    let err = service.start(req).unwrap_err();
    assert!(matches!(err, RuntimeError::MissingField { field: f } if f == field));
}

#[tokio::test]
async fn successful_command_completes_with_exit_zero() {
    let (service, mut rx) = service();
    let id = service.start(request("true", &[])).unwrap();

    let state = wait_terminal(&service, &id, 5).await;
    assert_eq!(state.status, CommandStatus::Completed);
    assert_eq!(state.exit_code, Some(0));

    let started = rx.recv().await.unwrap();
    assert_eq!(started.category, categories::COMMAND_STARTED);
    assert_eq!(started.command_id.as_ref(), Some(&id));
}

#[tokio::test]
async fn failing_command_is_failed_with_code() {
    let (service, _rx) = service();
    let id = service.start(request("false", &[])).unwrap();
    let state = wait_terminal(&service, &id, 5).await;
    assert_eq!(state.status, CommandStatus::Failed);
    assert_eq!(state.exit_code, Some(1));
}

#[tokio::test]
async fn output_is_streamed_as_delta_events() {
    let (service, mut rx) = service();
    let id = service.start(request("echo", &["hello world"])).unwrap();
    wait_terminal(&service, &id, 5).await;

    let mut saw_delta = false;
    let mut saw_completed = false;
    while let Ok(event) = rx.try_recv() {
        match event.category.as_str() {
            categories::COMMAND_DELTA => {
                saw_delta = true;
                let payload: serde_json::Value =
                    serde_json::from_str(event.payload_json.as_deref().unwrap()).unwrap();
                assert_eq!(payload["line"], "hello world");
                assert_eq!(payload["stream"], "stdout");
            }
            categories::COMMAND_COMPLETED => saw_completed = true,
            _ => {}
        }
    }
    assert!(saw_delta);
    assert!(saw_completed);
}

#[tokio::test]
async fn timeout_kills_the_process() {
    let (service, _rx) = service();
    let mut req = request("sleep", &["120"]);
    req.timeout_seconds = 1;
    let started = Instant::now();
    let id = service.start(req).unwrap();

    let state = wait_terminal(&service, &id, 5).await;
    assert_eq!(state.status, CommandStatus::TimedOut);
    assert_eq!(state.exit_code, None);
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn timeout_completed_event_reports_timed_out() {
    let (service, mut rx) = service();
    let mut req = request("sleep", &["120"]);
    req.timeout_seconds = 1;
    let id = service.start(req).unwrap();
    wait_terminal(&service, &id, 5).await;

    let mut payload = None;
    while let Ok(event) = rx.try_recv() {
        if event.category == categories::COMMAND_COMPLETED {
            payload = event.payload_json;
        }
    }
    let payload: serde_json::Value = serde_json::from_str(&payload.unwrap()).unwrap();
    assert_eq!(payload["status"], "timed_out");
    assert_eq!(payload["timedOut"], true);
}

#[tokio::test]
async fn cancel_terminates_as_canceled() {
    let (service, _rx) = service();
    let id = service.start(request("sleep", &["120"])).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(service.cancel(&id));
    let state = wait_terminal(&service, &id, 5).await;
    assert_eq!(state.status, CommandStatus::Canceled);

    // Terminal commands cannot be cancelled again.
    assert!(!service.cancel(&id));
}

#[tokio::test]
async fn cancel_run_sweeps_all_commands_of_the_run() {
    let (service, _rx) = service();
    let a = service.start(request("sleep", &["120"])).unwrap();
    let b = service.start(request("sleep", &["120"])).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    service.cancel_run(&RunId::from_string("run-1"));

    assert_eq!(wait_terminal(&service, &a, 5).await.status, CommandStatus::Canceled);
    assert_eq!(wait_terminal(&service, &b, 5).await.status, CommandStatus::Canceled);
}

#[tokio::test]
async fn output_budget_truncates_but_keeps_counting() {
    let (service, mut rx) = service();
    // ~10 lines of 100 chars; budget admits only the first few.
    let script = "for i in $(seq 1 10); do printf '%0100d\\n' $i; done";
    let mut req = request("sh", &["-c", script]);
    req.max_output_bytes = 4096; // minimum clamp
    let id = service.start(req).unwrap();

    let state = wait_terminal(&service, &id, 5).await;
    assert_eq!(state.status, CommandStatus::Completed);
    assert_eq!(state.stdout_bytes, 1010);
    assert!(!state.output_truncated);

    // Exhaust the budget for real: 4096 bytes < 100 lines of 101 bytes.
    let script = "for i in $(seq 1 100); do printf '%0100d\\n' $i; done";
    let mut req = request("sh", &["-c", script]);
    req.max_output_bytes = 1; // clamps up to 4096
    let id = service.start(req).unwrap();
    let state = wait_terminal(&service, &id, 5).await;

    assert!(state.output_truncated);
    assert_eq!(state.stdout_bytes, 10_100);

    let delta_count = {
        let mut count = 0;
        while let Ok(event) = rx.try_recv() {
            if event.category == categories::COMMAND_DELTA
                && event.command_id.as_ref() == Some(&id)
            {
                count += 1;
            }
        }
        count
    };
    // 4096 / 101 = 40 full lines fit the budget.
    assert_eq!(delta_count, 40);
}

#[tokio::test]
async fn emission_never_resumes_after_truncation() {
    let (service, mut rx) = service();
    // An oversized line exhausts the budget; the short line after it
    // would fit the remainder but must stay unemitted.
    let script = "printf '%04100d\\n' 1; echo ok";
    let mut req = request("sh", &["-c", script]);
    req.max_output_bytes = 1; // clamps up to 4096
    let id = service.start(req).unwrap();

    let state = wait_terminal(&service, &id, 5).await;
    assert!(state.output_truncated);
    // Both lines still counted: 4100 + 1 and 2 + 1 newline bytes.
    assert_eq!(state.stdout_bytes, 4104);

    while let Ok(event) = rx.try_recv() {
        assert_ne!(event.category, categories::COMMAND_DELTA, "late delta: {event:?}");
    }
}

#[tokio::test]
async fn missing_working_directory_is_rejected() {
    let (service, _rx) = service();
    let mut req = request("true", &[]);
    req.working_directory = Some("/definitely/not/a/dir".to_string());
    assert!(matches!(service.start(req), Err(RuntimeError::Spawn(_))));
}

#[tokio::test]
async fn request_env_overrides_worker_env() {
    let (service, mut rx) = service();
    let mut req = request("sh", &["-c", "echo \"$RP_TEST_VALUE\""]);
    req.env.insert(" RP_TEST_VALUE ".to_string(), "from-request".to_string());
    let id = service.start(req).unwrap();
    wait_terminal(&service, &id, 5).await;

    let mut line = None;
    while let Ok(event) = rx.try_recv() {
        if event.category == categories::COMMAND_DELTA {
            let payload: serde_json::Value =
                serde_json::from_str(event.payload_json.as_deref().unwrap()).unwrap();
            line = Some(payload["line"].as_str().unwrap().to_string());
        }
    }
    assert_eq!(line.as_deref(), Some("from-request"));
}

#[test]
fn limits_clamp_into_range() {
    let limits = CommandLimits {
        default_timeout_seconds: 30,
        max_timeout_seconds: 60,
        max_output_bytes: 1024 * 1024,
    };
    assert_eq!(limits.clamp_timeout(0), 30);
    assert_eq!(limits.clamp_timeout(1), 1);
    assert_eq!(limits.clamp_timeout(10_000), 60);
    assert_eq!(limits.clamp_output_bytes(0), 1024 * 1024);
    assert_eq!(limits.clamp_output_bytes(1), 4096);
    assert_eq!(limits.clamp_output_bytes(u64::MAX), 1024 * 1024);
}

#[tokio::test]
async fn prune_drops_only_old_terminal_commands() {
    let (service, _rx) = service();
    let done = service.start(request("true", &[])).unwrap();
    wait_terminal(&service, &done, 5).await;
    let running = service.start(request("sleep", &["120"])).unwrap();

    service.prune_finished(u64::MAX);
    assert!(service.status(&done).is_none());
    assert!(service.status(&running).is_some());

    service.cancel(&running);
    wait_terminal(&service, &running, 5).await;
}
