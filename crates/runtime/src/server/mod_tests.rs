// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::bus::EventPublisher;
use crate::command::CommandLimits;
use rp_core::test_support::run_request;
use rp_core::{categories, ExecutionToken, JobEvent, RunId, SequenceCounter, SystemClock, TaskId};
use rp_wire::StartCommandRequest;

struct Fixture {
    server: Arc<RpcServer<SystemClock>>,
    addr: String,
    bus: EventBus,
    publisher: EventPublisher<SystemClock>,
    _dir: tempfile::TempDir,
}

async fn fixture(max_slots: u32) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let bus = EventBus::new(256);
    let publisher =
        EventPublisher::new(bus.clone(), Arc::new(SequenceCounter::new()), SystemClock);
    let limits = CommandLimits {
        default_timeout_seconds: 30,
        max_timeout_seconds: 60,
        max_output_bytes: 64 * 1024,
    };
    let config = RuntimeConfig { max_slots, ..Default::default() };

    let guard = WorkspaceGuard::new(dir.path());
    guard.resolve("repo-1", "task-1", "", true).unwrap();

    let server = Arc::new(RpcServer::new(
        JobQueue::new(max_slots),
        CommandService::new(publisher.clone(), limits),
        guard,
        bus.clone(),
        SystemClock,
        &config,
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(Arc::clone(&server).serve(listener));

    Fixture { server, addr, bus, publisher, _dir: dir }
}

async fn connect(addr: &str) -> TcpStream {
    TcpStream::connect(addr).await.unwrap()
}

async fn call(stream: &mut TcpStream, request: &Request) -> Reply {
    write_frame(stream, request).await.unwrap();
    match read_frame::<_, Frame>(stream).await.unwrap() {
        Frame::Reply { reply } => reply,
        Frame::Event { event } => panic!("expected reply, got event {event:?}"),
    }
}

#[tokio::test]
async fn health_reports_slots_and_server_time() {
    let fx = fixture(4).await;
    let mut stream = connect(&fx.addr).await;
    let before = SystemClock.epoch_ms();
    match call(&mut stream, &Request::CheckHealth).await {
        Reply::Health { healthy, active_slots, max_slots, checked_at } => {
            assert!(healthy);
            assert_eq!(active_slots, 0);
            assert_eq!(max_slots, 4);
            assert!(checked_at >= before);
            assert!(checked_at <= SystemClock.epoch_ms());
        }
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn empty_run_id_is_rejected_with_exact_message() {
    let fx = fixture(4).await;
    let mut stream = connect(&fx.addr).await;
    let mut run = run_request("run-1");
    run.run_id = RunId::from_string("");

    match call(&mut stream, &Request::DispatchJob { run: Box::new(run) }).await {
        Reply::Dispatch { success, error_message, .. } => {
            assert!(!success);
            assert_eq!(error_message.as_deref(), Some("run_id is required"));
        }
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn dispatch_beyond_capacity_reports_worker_at_capacity() {
    let fx = fixture(1).await;
    let mut stream = connect(&fx.addr).await;

    match call(&mut stream, &Request::DispatchJob { run: Box::new(run_request("run-a")) }).await {
        Reply::Dispatch { success, dispatched_at, .. } => {
            assert!(success);
            assert!(dispatched_at > 0);
        }
        other => panic!("unexpected reply: {other:?}"),
    }

    match call(&mut stream, &Request::DispatchJob { run: Box::new(run_request("run-b")) }).await {
        Reply::Dispatch { success, error_message, .. } => {
            assert!(!success);
            assert_eq!(error_message.as_deref(), Some("worker at capacity"));
        }
        other => panic!("unexpected reply: {other:?}"),
    }

    // Queue still holds exactly one active slot.
    assert_eq!(fx.server.queue.active_count(), 1);

    // Completion frees the slot for the next dispatch.
    fx.server.queue.mark_completed(&RunId::from_string("run-a"));
    assert!(fx.server.queue.can_accept());
}

#[tokio::test]
async fn duplicate_dispatch_of_tracked_run_is_rejected() {
    let fx = fixture(4).await;
    let mut stream = connect(&fx.addr).await;
    call(&mut stream, &Request::DispatchJob { run: Box::new(run_request("run-a")) }).await;

    match call(&mut stream, &Request::DispatchJob { run: Box::new(run_request("run-a")) }).await {
        Reply::Dispatch { success, error_message, .. } => {
            assert!(!success);
            assert_eq!(error_message.as_deref(), Some("run is already active"));
        }
        other => panic!("unexpected reply: {other:?}"),
    }
    // The duplicate rejection did not double-count the slot.
    assert_eq!(fx.server.queue.active_count(), 1);
}

#[tokio::test]
async fn stop_job_cancels_tracked_runs_only() {
    let fx = fixture(4).await;
    let mut stream = connect(&fx.addr).await;
    call(&mut stream, &Request::DispatchJob { run: Box::new(run_request("run-a")) }).await;

    match call(&mut stream, &Request::StopJob { run_id: RunId::from_string("run-a") }).await {
        Reply::Stop { success } => assert!(success),
        other => panic!("unexpected reply: {other:?}"),
    }
    match call(&mut stream, &Request::StopJob { run_id: RunId::from_string("run-x") }).await {
        Reply::Stop { success } => assert!(!success),
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn subscribe_streams_published_events() {
    let fx = fixture(4).await;
    let mut stream = connect(&fx.addr).await;

    match call(&mut stream, &Request::Subscribe { run_ids: vec![] }).await {
        Reply::Subscribed => {}
        other => panic!("unexpected reply: {other:?}"),
    }

    let event = JobEvent::new(
        RunId::from_string("run-1"),
        TaskId::from_string("task-1"),
        ExecutionToken::from_string("exc-1"),
        "run.status",
        categories::RUN_STATUS,
    );
    fx.publisher.publish(event);

    match read_frame::<_, Frame>(&mut stream).await.unwrap() {
        Frame::Event { event } => {
            assert_eq!(event.run_id, RunId::from_string("run-1"));
            assert_eq!(event.sequence, 1);
        }
        other => panic!("expected event, got {other:?}"),
    }
}

#[tokio::test]
async fn run_filter_limits_pushed_events() {
    let fx = fixture(4).await;
    let mut stream = connect(&fx.addr).await;
    call(
        &mut stream,
        &Request::Subscribe { run_ids: vec![RunId::from_string("run-wanted")] },
    )
    .await;

    for run in ["run-other", "run-wanted"] {
        fx.publisher.publish(JobEvent::new(
            RunId::from_string(run),
            TaskId::from_string("task-1"),
            ExecutionToken::from_string("exc-1"),
            "run.status",
            categories::RUN_STATUS,
        ));
    }

    match read_frame::<_, Frame>(&mut stream).await.unwrap() {
        Frame::Event { event } => assert_eq!(event.run_id, RunId::from_string("run-wanted")),
        other => panic!("expected event, got {other:?}"),
    }
}

#[tokio::test]
async fn unsubscribe_detaches_filter_state() {
    let fx = fixture(4).await;
    let mut stream = connect(&fx.addr).await;
    call(&mut stream, &Request::Subscribe { run_ids: vec![] }).await;
    assert_eq!(fx.bus.subscriber_count(), 1);

    match call(&mut stream, &Request::Unsubscribe).await {
        Reply::Unsubscribed => {}
        other => panic!("unexpected reply: {other:?}"),
    }
    assert_eq!(fx.bus.subscriber_count(), 0);
}

#[tokio::test]
async fn disconnect_releases_subscriptions() {
    let fx = fixture(4).await;
    let mut stream = connect(&fx.addr).await;
    call(&mut stream, &Request::Subscribe { run_ids: vec![] }).await;
    assert_eq!(fx.bus.subscriber_count(), 1);

    drop(stream);
    // The server notices the closed connection on its next read.
    for _ in 0..50 {
        if fx.bus.subscriber_count() == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(fx.bus.subscriber_count(), 0);
}

#[tokio::test]
async fn command_round_trip_over_rpc() {
    let fx = fixture(4).await;
    let mut stream = connect(&fx.addr).await;

    let command_id = match call(
        &mut stream,
        &Request::StartCommand {
            command: StartCommandRequest {
                run_id: "run-1".to_string(),
                task_id: "task-1".to_string(),
                execution_token: "exc-1".to_string(),
                command: "true".to_string(),
                ..Default::default()
            },
        },
    )
    .await
    {
        Reply::CommandStarted { command_id, started_at } => {
            assert!(started_at > 0);
            command_id
        }
        other => panic!("unexpected reply: {other:?}"),
    };

    // Poll status until terminal.
    for _ in 0..100 {
        match call(&mut stream, &Request::GetCommandStatus { command_id: command_id.clone() })
            .await
        {
            Reply::CommandStatus { snapshot: Some(snapshot) } => {
                if snapshot.state.status.is_terminal() {
                    assert_eq!(snapshot.state.exit_code, Some(0));
                    return;
                }
            }
            Reply::CommandStatus { snapshot: None } => panic!("command vanished"),
            other => panic!("unexpected reply: {other:?}"),
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("command never reached a terminal state");
}

#[tokio::test]
async fn start_command_with_missing_field_is_an_error_reply() {
    let fx = fixture(4).await;
    let mut stream = connect(&fx.addr).await;
    match call(
        &mut stream,
        &Request::StartCommand {
            command: StartCommandRequest {
                run_id: String::new(),
                task_id: "task-1".to_string(),
                execution_token: "exc-1".to_string(),
                command: "true".to_string(),
                ..Default::default()
            },
        },
    )
    .await
    {
        Reply::Error { message } => assert_eq!(message, "run_id is required"),
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn file_ops_round_trip_over_rpc() {
    let fx = fixture(4).await;
    let mut stream = connect(&fx.addr).await;

    let create = Request::CreateRuntimeFile {
        repository_id: "repo-1".to_string(),
        task_id: "task-1".to_string(),
        relative_path: "hello.txt".to_string(),
        content: b"content".to_vec(),
        overwrite: false,
    };
    match call(&mut stream, &create).await {
        Reply::FileCreated { success: true, .. } => {}
        other => panic!("unexpected reply: {other:?}"),
    }

    let read = Request::ReadRuntimeFile {
        repository_id: "repo-1".to_string(),
        task_id: "task-1".to_string(),
        relative_path: "hello.txt".to_string(),
        max_bytes: 0,
    };
    match call(&mut stream, &read).await {
        Reply::FileContent { success: true, content, .. } => assert_eq!(content, b"content"),
        other => panic!("unexpected reply: {other:?}"),
    }

    let traversal = Request::CreateRuntimeFile {
        repository_id: "repo-1".to_string(),
        task_id: "task-1".to_string(),
        relative_path: "../escape.txt".to_string(),
        content: b"x".to_vec(),
        overwrite: false,
    };
    match call(&mut stream, &traversal).await {
        Reply::FileCreated { success: false, reason } => {
            assert_eq!(reason.as_deref(), Some("path_outside_workspace"));
        }
        other => panic!("unexpected reply: {other:?}"),
    }
}
