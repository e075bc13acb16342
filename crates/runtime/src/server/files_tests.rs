// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn guard() -> (tempfile::TempDir, WorkspaceGuard) {
    let dir = tempfile::tempdir().unwrap();
    let guard = WorkspaceGuard::new(dir.path());
    guard.resolve("repo-1", "task-1", "", true).unwrap();
    (dir, guard)
}

#[test]
fn create_then_read_round_trips() {
    let (_dir, guard) = guard();
    let reply = create(&guard, "repo-1", "task-1", "notes.txt", b"hello bytes", false);
    assert_eq!(reply, Reply::FileCreated { success: true, reason: None });

    match read(&guard, "repo-1", "task-1", "notes.txt", 0, 1024 * 1024) {
        Reply::FileContent { success, content, truncated, content_length, .. } => {
            assert!(success);
            assert_eq!(content, b"hello bytes");
            assert!(!truncated);
            assert_eq!(content_length, 11);
        }
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[test]
fn create_without_overwrite_rejects_existing() {
    let (_dir, guard) = guard();
    create(&guard, "repo-1", "task-1", "a.txt", b"one", false);
    let reply = create(&guard, "repo-1", "task-1", "a.txt", b"two", false);
    assert_eq!(
        reply,
        Reply::FileCreated { success: false, reason: Some("already_exists".to_string()) }
    );

    // Overwrite flag replaces the content.
    let reply = create(&guard, "repo-1", "task-1", "a.txt", b"two", true);
    assert_eq!(reply, Reply::FileCreated { success: true, reason: None });
    match read(&guard, "repo-1", "task-1", "a.txt", 0, 1024) {
        Reply::FileContent { content, .. } => assert_eq!(content, b"two"),
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[test]
fn traversal_creates_nothing_anywhere() {
    let (dir, guard) = guard();
    let reply = create(&guard, "repo-1", "task-1", "../escape.txt", b"x", false);
    assert_eq!(
        reply,
        Reply::FileCreated {
            success: false,
            reason: Some("path_outside_workspace".to_string())
        }
    );
    // Nothing appeared outside the workspace root either.
    assert!(!dir.path().join("repo-1").join("tasks").join("escape.txt").exists());
    assert!(!dir.path().join("escape.txt").exists());
}

#[test]
fn read_caps_at_the_smaller_limit() {
    let (_dir, guard) = guard();
    create(&guard, "repo-1", "task-1", "big.bin", &[7u8; 1000], false);

    // Per-call cap smaller than hard cap.
    match read(&guard, "repo-1", "task-1", "big.bin", 100, 10_000) {
        Reply::FileContent { content, truncated, content_length, .. } => {
            assert_eq!(content.len(), 100);
            assert!(truncated);
            assert_eq!(content_length, 1000);
        }
        other => panic!("unexpected reply: {other:?}"),
    }

    // Hard cap smaller than per-call cap.
    match read(&guard, "repo-1", "task-1", "big.bin", 10_000, 50) {
        Reply::FileContent { content, truncated, .. } => {
            assert_eq!(content.len(), 50);
            assert!(truncated);
        }
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[test]
fn read_missing_is_not_found() {
    let (_dir, guard) = guard();
    match read(&guard, "repo-1", "task-1", "absent.txt", 0, 1024) {
        Reply::FileContent { success, reason, .. } => {
            assert!(!success);
            assert_eq!(reason.as_deref(), Some("not_found"));
        }
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[test]
fn list_sorts_directories_first_case_insensitive() {
    let (_dir, guard) = guard();
    let root = guard.resolve("repo-1", "task-1", "", false).unwrap();
    std::fs::create_dir(root.join("Zeta")).unwrap();
    std::fs::create_dir(root.join("alpha")).unwrap();
    std::fs::write(root.join("Beta.txt"), b"b").unwrap();
    std::fs::write(root.join("aaa.txt"), b"a").unwrap();
    std::fs::write(root.join(".hidden"), b"h").unwrap();

    match list(&guard, "repo-1", "task-1", "", false) {
        Reply::FileList { entries } => {
            let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
            assert_eq!(names, vec!["alpha", "Zeta", "aaa.txt", "Beta.txt"]);
            assert!(entries[0].is_directory);
            assert!(entries[1].is_directory);
            assert!(!entries[2].is_directory);
        }
        other => panic!("unexpected reply: {other:?}"),
    }

    match list(&guard, "repo-1", "task-1", "", true) {
        Reply::FileList { entries } => {
            assert!(entries.iter().any(|e| e.name == ".hidden"));
        }
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[test]
fn delete_missing_is_reported_no_op() {
    let (_dir, guard) = guard();
    let reply = delete(&guard, "repo-1", "task-1", "absent.txt", false);
    assert_eq!(
        reply,
        Reply::FileDeleted {
            success: false,
            deleted: false,
            reason: Some("not_found".to_string())
        }
    );
}

#[test]
fn delete_non_empty_dir_requires_recursive() {
    let (_dir, guard) = guard();
    let root = guard.resolve("repo-1", "task-1", "", false).unwrap();
    std::fs::create_dir(root.join("sub")).unwrap();
    std::fs::write(root.join("sub/file.txt"), b"x").unwrap();

    let reply = delete(&guard, "repo-1", "task-1", "sub", false);
    assert_eq!(
        reply,
        Reply::FileDeleted {
            success: false,
            deleted: false,
            reason: Some("is_directory".to_string())
        }
    );

    let reply = delete(&guard, "repo-1", "task-1", "sub", true);
    assert_eq!(reply, Reply::FileDeleted { success: true, deleted: true, reason: None });
    assert!(!root.join("sub").exists());
}

#[test]
fn delete_empty_dir_without_recursive_is_fine() {
    let (_dir, guard) = guard();
    let root = guard.resolve("repo-1", "task-1", "", false).unwrap();
    std::fs::create_dir(root.join("empty")).unwrap();

    let reply = delete(&guard, "repo-1", "task-1", "empty", false);
    assert_eq!(reply, Reply::FileDeleted { success: true, deleted: true, reason: None });
}

#[test]
fn delete_root_is_refused() {
    let (_dir, guard) = guard();
    let reply = delete(&guard, "repo-1", "task-1", "", true);
    assert_eq!(
        reply,
        Reply::FileDeleted {
            success: false,
            deleted: false,
            reason: Some("empty_path".to_string())
        }
    );
}
