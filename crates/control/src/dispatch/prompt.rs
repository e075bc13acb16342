// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Layered prompt composition.
//!
//! Order: global prefix, optional task prompt-prefix wrapper, repository
//! instructions (collection before embedded, then priority, then order),
//! task instructions minus wrapper entries, the task's own prompt, the
//! optional task prompt-suffix wrapper, and the global suffix. The
//! default global prefix/suffix embed the repository's default branch and
//! prescribe the initial checkout and the final commit-and-push.

use crate::store::{InstructionRecord, InstructionSource, RepositoryRecord, TaskRecord};

const PREFIX_NAMES: [&str; 2] = ["promptprefix", "taskpromptprefix"];
const SUFFIX_NAMES: [&str; 2] = ["promptsuffix", "taskpromptsuffix"];

/// Lowercase, drop the extension, keep alphanumerics only — so
/// `Prompt-Prefix.md` and `task_prompt_prefix` both normalize cleanly.
fn normalize_name(name: &str) -> String {
    let stem = name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name);
    stem.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn is_wrapper(instruction: &InstructionRecord) -> bool {
    let normalized = normalize_name(&instruction.name);
    PREFIX_NAMES.contains(&normalized.as_str()) || SUFFIX_NAMES.contains(&normalized.as_str())
}

fn find_wrapper<'a>(
    instructions: &'a [InstructionRecord],
    names: &[&str],
) -> Option<&'a InstructionRecord> {
    instructions
        .iter()
        .find(|i| names.contains(&normalize_name(&i.name).as_str()))
}

/// Repository instructions sorted collection-first, then priority, then
/// order, then name for stability.
fn sorted_repo_instructions(repository: &RepositoryRecord) -> Vec<&InstructionRecord> {
    let mut instructions: Vec<&InstructionRecord> = repository.instructions.iter().collect();
    instructions.sort_by(|a, b| {
        let rank = |i: &InstructionRecord| match i.source {
            InstructionSource::Collection => 0,
            InstructionSource::Embedded => 1,
        };
        rank(a)
            .cmp(&rank(b))
            .then_with(|| a.priority.cmp(&b.priority))
            .then_with(|| a.order.cmp(&b.order))
            .then_with(|| a.name.cmp(&b.name))
    });
    instructions
}

/// Default opening directive: sync the workspace to the default branch.
pub fn default_global_prefix(default_branch: &str) -> String {
    format!(
        "You are working in a git workspace tracking branch `{default_branch}`.\n\
         Before making changes: run `git fetch origin`, `git checkout {default_branch}`, \
         and `git pull --ff-only origin {default_branch}`."
    )
}

/// Default closing directive: review and push the result.
pub fn default_global_suffix(default_branch: &str) -> String {
    format!(
        "When the work is complete: run `git status` and `git diff` to review changes, \
         commit with a descriptive message, and push to `{default_branch}`."
    )
}

/// Build the fully layered instruction for a run.
pub fn compose(repository: &RepositoryRecord, task: &TaskRecord, default_branch: &str) -> String {
    let mut sections: Vec<String> = Vec::new();

    sections.push(default_global_prefix(default_branch));

    if let Some(prefix) = find_wrapper(&task.instructions, &PREFIX_NAMES) {
        sections.push(prefix.content.clone());
    }

    for instruction in sorted_repo_instructions(repository) {
        sections.push(instruction.content.clone());
    }

    for instruction in task.instructions.iter().filter(|i| !is_wrapper(i)) {
        sections.push(instruction.content.clone());
    }

    sections.push(task.prompt.clone());

    if let Some(suffix) = find_wrapper(&task.instructions, &SUFFIX_NAMES) {
        sections.push(suffix.content.clone());
    }

    sections.push(default_global_suffix(default_branch));

    sections
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
#[path = "prompt_tests.rs"]
mod tests;
