// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace path guard.
//!
//! Every file operation on a worker resolves through here: paths are
//! sandboxed inside `<workspaces_root>/<repo>/tasks/<task>` and a request
//! whose canonical form escapes that root is rejected, never touched.

use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkspaceError {
    #[error("path_outside_workspace")]
    PathOutsideWorkspace,

    #[error("empty_path")]
    EmptyPath,

    #[error("invalid_chars")]
    InvalidChars,

    #[error("workspace i/o failed: {0}")]
    Io(String),
}

impl WorkspaceError {
    /// Stable reason string carried on wire replies.
    pub fn reason(&self) -> &'static str {
        match self {
            WorkspaceError::PathOutsideWorkspace => "path_outside_workspace",
            WorkspaceError::EmptyPath => "empty_path",
            WorkspaceError::InvalidChars => "invalid_chars",
            WorkspaceError::Io(_) => "io_error",
        }
    }
}

/// Replace path separators with `-`, trim whitespace, reject empties.
fn sanitize(segment: &str) -> Result<String, WorkspaceError> {
    let cleaned: String = segment
        .trim()
        .chars()
        .map(|c| if c == '/' || c == '\\' { '-' } else { c })
        .collect();
    if cleaned.is_empty() {
        return Err(WorkspaceError::EmptyPath);
    }
    if cleaned.chars().any(|c| c == '\0') {
        return Err(WorkspaceError::InvalidChars);
    }
    Ok(cleaned)
}

/// Resolves relative paths inside per-(repository, task) sandboxes.
#[derive(Debug, Clone)]
pub struct WorkspaceGuard {
    workspaces_root: PathBuf,
}

impl WorkspaceGuard {
    pub fn new(workspaces_root: impl Into<PathBuf>) -> Self {
        Self { workspaces_root: workspaces_root.into() }
    }

    /// The sandbox root for one `(repository, task)` pair.
    pub fn workspace_root(
        &self,
        repository_id: &str,
        task_id: &str,
    ) -> Result<PathBuf, WorkspaceError> {
        let repo = sanitize(repository_id)?;
        let task = sanitize(task_id)?;
        Ok(self.workspaces_root.join(repo).join("tasks").join(task))
    }

    /// Resolve `relative` inside the workspace for `(repository, task)`.
    ///
    /// The combined path is canonicalized (resolving `.`, `..`, and
    /// symlinks; for a not-yet-existing leaf, the deepest existing
    /// ancestor is canonicalized) and the result must have the workspace
    /// root as a segment-wise prefix. The root directory is created on
    /// demand only when `allow_create` is set.
    pub fn resolve(
        &self,
        repository_id: &str,
        task_id: &str,
        relative: &str,
        allow_create: bool,
    ) -> Result<PathBuf, WorkspaceError> {
        let root = self.workspace_root(repository_id, task_id)?;

        if relative.contains('\0') {
            return Err(WorkspaceError::InvalidChars);
        }
        let relative = relative.trim();
        if Path::new(relative).is_absolute() {
            return Err(WorkspaceError::PathOutsideWorkspace);
        }

        if allow_create && !root.exists() {
            std::fs::create_dir_all(&root)
                .map_err(|e| WorkspaceError::Io(e.to_string()))?;
        }
        if !root.exists() {
            // Nothing can resolve inside a root that does not exist and
            // was not allowed to be created.
            return Err(WorkspaceError::PathOutsideWorkspace);
        }
        let canonical_root = root
            .canonicalize()
            .map_err(|e| WorkspaceError::Io(e.to_string()))?;

        // An empty relative path addresses the root itself.
        if relative.is_empty() || relative == "." {
            return Ok(canonical_root);
        }

        let combined = canonical_root.join(relative);
        let canonical = canonicalize_allow_missing(&combined)?;

        if !is_segment_prefix(&canonical_root, &canonical) {
            return Err(WorkspaceError::PathOutsideWorkspace);
        }
        Ok(canonical)
    }
}

/// Canonicalize a path whose leaf components may not exist yet: resolve
/// the deepest existing ancestor through the filesystem, then normalize
/// the remaining components lexically (rejecting `..` that would climb
/// above the resolved ancestor only by letting the prefix check fail).
fn canonicalize_allow_missing(path: &Path) -> Result<PathBuf, WorkspaceError> {
    let mut existing = path.to_path_buf();
    let mut pending: Vec<std::ffi::OsString> = Vec::new();

    loop {
        if existing.exists() {
            break;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                pending.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => return Err(WorkspaceError::PathOutsideWorkspace),
        }
    }

    let mut resolved = existing
        .canonicalize()
        .map_err(|e| WorkspaceError::Io(e.to_string()))?;

    for name in pending.iter().rev() {
        match Path::new(name).components().next() {
            Some(Component::ParentDir) => {
                if !resolved.pop() {
                    return Err(WorkspaceError::PathOutsideWorkspace);
                }
            }
            Some(Component::CurDir) | None => {}
            _ => resolved.push(name),
        }
    }
    Ok(resolved)
}

/// Segment-wise prefix check (not a string prefix: `/a/bc` is not under
/// `/a/b`).
fn is_segment_prefix(root: &Path, candidate: &Path) -> bool {
    let mut root_parts = root.components();
    let mut cand_parts = candidate.components();
    loop {
        match (root_parts.next(), cand_parts.next()) {
            (None, _) => return true,
            (Some(r), Some(c)) if r == c => continue,
            _ => return false,
        }
    }
}

#[cfg(test)]
#[path = "workspace_tests.rs"]
mod tests;
