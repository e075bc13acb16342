// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace file operations behind the RPC surface.
//!
//! Every operation resolves its path through the workspace guard; a
//! rejected path never touches the filesystem.

use crate::workspace::{WorkspaceError, WorkspaceGuard};
use rp_wire::{FileEntry, Reply};
use std::path::Path;

fn guard_failure(e: &WorkspaceError) -> String {
    e.reason().to_string()
}

/// Directory listing: directories first, then files, both lexicographic
/// ascending and case-insensitive. Hidden entries (leading `.`) are
/// excluded unless requested.
pub fn list(
    guard: &WorkspaceGuard,
    repository_id: &str,
    task_id: &str,
    relative_path: &str,
    include_hidden: bool,
) -> Reply {
    let dir = match guard.resolve(repository_id, task_id, relative_path, false) {
        Ok(path) => path,
        Err(e) => return Reply::Error { message: guard_failure(&e) },
    };

    let read_dir = match std::fs::read_dir(&dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Reply::Error { message: "not_found".to_string() }
        }
        Err(e) => return Reply::Error { message: e.to_string() },
    };

    let mut entries: Vec<FileEntry> = Vec::new();
    for entry in read_dir.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !include_hidden && name.starts_with('.') {
            continue;
        }
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(_) => continue,
        };
        let modified_at = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        entries.push(FileEntry {
            name,
            is_directory: meta.is_dir(),
            size_bytes: if meta.is_dir() { 0 } else { meta.len() },
            modified_at,
        });
    }

    entries.sort_by(|a, b| {
        b.is_directory
            .cmp(&a.is_directory)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
            .then_with(|| a.name.cmp(&b.name))
    });

    Reply::FileList { entries }
}

/// Create (or overwrite) a file. Parent directories inside the workspace
/// are created as needed.
pub fn create(
    guard: &WorkspaceGuard,
    repository_id: &str,
    task_id: &str,
    relative_path: &str,
    content: &[u8],
    overwrite: bool,
) -> Reply {
    if relative_path.trim().is_empty() {
        return Reply::FileCreated { success: false, reason: Some("empty_path".to_string()) };
    }
    let path = match guard.resolve(repository_id, task_id, relative_path, true) {
        Ok(path) => path,
        Err(e) => return Reply::FileCreated { success: false, reason: Some(guard_failure(&e)) },
    };

    if path.exists() && !overwrite {
        return Reply::FileCreated {
            success: false,
            reason: Some("already_exists".to_string()),
        };
    }
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return Reply::FileCreated { success: false, reason: Some(e.to_string()) };
        }
    }
    match std::fs::write(&path, content) {
        Ok(()) => Reply::FileCreated { success: true, reason: None },
        Err(e) => Reply::FileCreated { success: false, reason: Some(e.to_string()) },
    }
}

/// Read a file, capped at the lesser of the per-call `max_bytes` (0 = no
/// per-call cap) and the configured hard cap.
pub fn read(
    guard: &WorkspaceGuard,
    repository_id: &str,
    task_id: &str,
    relative_path: &str,
    max_bytes: u64,
    hard_cap: u64,
) -> Reply {
    let failure = |reason: &str| Reply::FileContent {
        success: false,
        content: Vec::new(),
        truncated: false,
        content_length: 0,
        reason: Some(reason.to_string()),
    };

    let path = match guard.resolve(repository_id, task_id, relative_path, false) {
        Ok(path) => path,
        Err(e) => return failure(&guard_failure(&e)),
    };

    let meta = match std::fs::metadata(&path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return failure("not_found"),
        Err(e) => return failure(&e.to_string()),
    };
    if meta.is_dir() {
        return failure("is_directory");
    }

    let real_size = meta.len();
    let cap = if max_bytes == 0 { hard_cap } else { max_bytes.min(hard_cap) };

    let content = match read_prefix(&path, cap) {
        Ok(content) => content,
        Err(e) => return failure(&e.to_string()),
    };

    Reply::FileContent {
        success: true,
        truncated: real_size > cap,
        content_length: real_size,
        content,
        reason: None,
    }
}

fn read_prefix(path: &Path, cap: u64) -> std::io::Result<Vec<u8>> {
    use std::io::Read;
    let file = std::fs::File::open(path)?;
    let mut buf = Vec::new();
    file.take(cap).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Delete a file or directory. Non-empty directories need `recursive`;
/// deleting a missing path is a reported no-op.
pub fn delete(
    guard: &WorkspaceGuard,
    repository_id: &str,
    task_id: &str,
    relative_path: &str,
    recursive: bool,
) -> Reply {
    let failure = |deleted: bool, reason: &str| Reply::FileDeleted {
        success: false,
        deleted,
        reason: Some(reason.to_string()),
    };

    // Refuse to delete the workspace root itself.
    if relative_path.trim().is_empty() {
        return failure(false, "empty_path");
    }
    let path = match guard.resolve(repository_id, task_id, relative_path, false) {
        Ok(path) => path,
        Err(e) => return failure(false, guard_failure(&e).as_str()),
    };

    let meta = match std::fs::symlink_metadata(&path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return failure(false, "not_found")
        }
        Err(e) => return failure(false, e.to_string().as_str()),
    };

    if meta.is_dir() {
        let is_empty = std::fs::read_dir(&path)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if !is_empty && !recursive {
            return failure(false, "is_directory");
        }
        let result = if recursive {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_dir(&path)
        };
        match result {
            Ok(()) => Reply::FileDeleted { success: true, deleted: true, reason: None },
            Err(e) => failure(false, e.to_string().as_str()),
        }
    } else {
        match std::fs::remove_file(&path) {
            Ok(()) => Reply::FileDeleted { success: true, deleted: true, reason: None },
            Err(e) => failure(false, e.to_string().as_str()),
        }
    }
}

#[cfg(test)]
#[path = "files_tests.rs"]
mod tests;
