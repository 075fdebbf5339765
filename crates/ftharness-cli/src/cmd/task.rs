use crate::output::kv;
use ftharness_core::types::{GateStatus, TaskStatus};
use ftharness_core::{engine, HarnessError};
use std::path::Path;

pub fn start(root: &Path, feat_id: &str, task: Option<&str>) -> anyhow::Result<()> {
    let task_id = engine::start_task(root, feat_id, task)?;
    kv("feat_id", feat_id);
    kv("task_id", &task_id);
    kv("status", TaskStatus::InProgress);
    Ok(())
}

pub fn gate(root: &Path, feat_id: &str, task_id: &str) -> anyhow::Result<()> {
    let outcome = engine::run_task_gate(root, feat_id, task_id)?;
    kv("gate_result", outcome.result);
    kv("gate_log", outcome.log_path.display());
    if outcome.result != GateStatus::Pass {
        for reason in &outcome.reasons {
            eprintln!("error: {reason}");
        }
        return Err(HarnessError::GateFailed(format!(
            "gate failed for {feat_id}/{task_id}"
        ))
        .into());
    }
    Ok(())
}

pub fn prepare_commit(
    root: &Path,
    feat_id: &str,
    task_id: &str,
    summary: &str,
    task_status: TaskStatus,
    execute: bool,
) -> anyhow::Result<()> {
    let prepared =
        engine::prepare_task_commit(root, feat_id, task_id, summary, task_status, execute)?;
    kv("message_file", prepared.message_file.display());
    match prepared.commit_sha {
        Some(sha) => kv("commit_sha", sha),
        None => kv(
            "next",
            format!(
                "cd into the feat worktree, stage your changes, then: git commit -F {}",
                prepared.message_file.display()
            ),
        ),
    }
    Ok(())
}

pub fn finish(root: &Path, feat_id: &str, task_id: &str, result: TaskStatus) -> anyhow::Result<()> {
    let feat_status = engine::finish_task(root, feat_id, task_id, result)?;
    kv("task_id", task_id);
    kv("result", result);
    kv("feat_status", feat_status);
    Ok(())
}
