// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use rp_core::{ExecutionMode, HarnessType, RepositoryId, TaskId};
use crate::store::{ApprovalProfile, HarnessSettings};

fn instruction(
    name: &str,
    content: &str,
    priority: i32,
    order: i32,
    source: InstructionSource,
) -> InstructionRecord {
    InstructionRecord {
        name: name.to_string(),
        content: content.to_string(),
        priority,
        order,
        source,
    }
}

fn repository(instructions: Vec<InstructionRecord>) -> RepositoryRecord {
    RepositoryRecord {
        id: RepositoryId::from_string("repo-1"),
        name: "demo".to_string(),
        clone_url: "https://example.com/demo.git".to_string(),
        default_branch: Some("main".to_string()),
        instructions,
    }
}

fn task(prompt: &str, instructions: Vec<InstructionRecord>) -> TaskRecord {
    TaskRecord {
        id: TaskId::from_string("task-1"),
        repository_id: RepositoryId::from_string("repo-1"),
        name: "demo-task".to_string(),
        prompt: prompt.to_string(),
        harness: HarnessType::Codex,
        mode: ExecutionMode::Default,
        concurrency_limit: 0,
        approval: ApprovalProfile::default(),
        instructions,
        harness_settings: HarnessSettings::default(),
        mode_override: None,
        harness_model: None,
        memory_limit: None,
        artifact_patterns: Vec::new(),
        image_tag: "runner:latest".to_string(),
        timeout_seconds: 600,
    }
}

#[test]
fn default_wrappers_embed_the_branch() {
    let prompt = compose(&repository(vec![]), &task("do X", vec![]), "develop");
    assert!(prompt.starts_with("You are working in a git workspace tracking branch `develop`."));
    assert!(prompt.contains("git pull --ff-only origin develop"));
    assert!(prompt.contains("do X"));
    assert!(prompt.trim_end().ends_with("push to `develop`."));
}

#[test]
fn repo_instructions_sort_collection_first_then_priority_then_order() {
    let repo = repository(vec![
        instruction("b", "embedded-low", 0, 0, InstructionSource::Embedded),
        instruction("c", "collection-late", 5, 2, InstructionSource::Collection),
        instruction("a", "collection-early", 5, 1, InstructionSource::Collection),
        instruction("d", "collection-prio", 1, 9, InstructionSource::Collection),
    ]);
    let prompt = compose(&repo, &task("the prompt", vec![]), "main");

    let order: Vec<usize> = ["collection-prio", "collection-early", "collection-late", "embedded-low"]
        .iter()
        .map(|s| prompt.find(s).unwrap())
        .collect();
    assert!(order.windows(2).all(|w| w[0] < w[1]), "bad order in:\n{prompt}");
}

#[test]
fn task_wrapper_instructions_are_lifted_out_of_the_body() {
    let t = task(
        "core prompt",
        vec![
            instruction("Prompt-Prefix.md", "WRAPPER PREFIX", 0, 0, InstructionSource::Embedded),
            instruction("style-guide", "use tabs", 0, 1, InstructionSource::Embedded),
            instruction("prompt_suffix", "WRAPPER SUFFIX", 0, 2, InstructionSource::Embedded),
        ],
    );
    let prompt = compose(&repository(vec![]), &t, "main");

    let prefix_at = prompt.find("WRAPPER PREFIX").unwrap();
    let body_at = prompt.find("use tabs").unwrap();
    let core_at = prompt.find("core prompt").unwrap();
    let suffix_at = prompt.find("WRAPPER SUFFIX").unwrap();

    assert!(prefix_at < body_at);
    assert!(body_at < core_at);
    assert!(core_at < suffix_at);

    // Wrappers appear exactly once.
    assert_eq!(prompt.matches("WRAPPER PREFIX").count(), 1);
    assert_eq!(prompt.matches("WRAPPER SUFFIX").count(), 1);
}

#[yare::parameterized(
    plain       = { "promptprefix", "promptprefix" },
    dashed      = { "Prompt-Prefix.md", "promptprefix" },
    underscored = { "task_prompt_prefix", "taskpromptprefix" },
    spaced      = { "prompt suffix.txt", "promptsuffix" },
)]
fn name_normalization(raw: &str, expected: &str) {
    assert_eq!(normalize_name(raw), expected);
}

#[test]
fn empty_sections_are_dropped() {
    let repo = repository(vec![instruction("x", "   ", 0, 0, InstructionSource::Embedded)]);
    let prompt = compose(&repo, &task("prompt", vec![]), "main");
    assert!(!prompt.contains("\n\n\n\n"));
}
