//! Doctor: cross-checks the SSOT against the filesystem and git.
//!
//! `validate` audits the persisted state alone (schema, id shapes, task
//! invariants, physical layout, commit records). `diagnose` layers VCS
//! drift detection and threshold warnings on top. Both are strictly
//! read-only.

use crate::config::Config;
use crate::error::{HarnessError, Result};
use crate::feat::FeatState;
use crate::git::Git;
use crate::types::{FeatStatus, GateStatus, TaskStatus};
use crate::{commit, index, paths, worktree};
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct DoctorReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl DoctorReport {
    pub fn is_healthy(&self) -> bool {
        self.errors.is_empty()
    }
}

// ---------------------------------------------------------------------------
// validate-harness
// ---------------------------------------------------------------------------

/// SSOT invariant audit. Returns the violations found (empty = consistent).
pub fn validate(root: &Path) -> Result<Vec<String>> {
    if !paths::harness_dir(root).exists() {
        return Err(HarnessError::NotInitialized);
    }
    let mut errors = Vec::new();
    let idx = index::load(root)?;

    let mut indexed: HashSet<String> = HashSet::new();
    for entry in &idx.feats {
        indexed.insert(entry.feat_id.clone());
        if paths::validate_feat_id(&entry.feat_id).is_err() {
            errors.push(format!("invalid feat id in index: {}", entry.feat_id));
            continue;
        }
        if entry.status == FeatStatus::Archived {
            errors.push(format!(
                "{}: archived feats must not appear in the index",
                entry.feat_id
            ));
            continue;
        }
        validate_feat(root, &entry.feat_id, entry.status, &mut errors);
    }

    // Physical layout: every state dir belongs to exactly one side and
    // active dirs must be indexed.
    if let Ok(entries) = std::fs::read_dir(paths::feats_dir(root)) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_dir() && !indexed.contains(&name) {
                errors.push(format!("feat directory not indexed: {name}"));
            }
        }
    }
    if let Ok(entries) = std::fs::read_dir(paths::feats_archived_dir(root)) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !entry.path().is_dir() {
                continue;
            }
            if indexed.contains(&name) {
                errors.push(format!("{name}: archived feat dir conflicts with index entry"));
            }
            match FeatState::load(root, &name) {
                Ok((state, _)) if state.status != FeatStatus::Archived => errors.push(format!(
                    "{name}: state under feats-archived/ has status {}",
                    state.status
                )),
                Ok(_) => {}
                Err(e) => errors.push(format!("{name}: {e}")),
            }
        }
    }

    Ok(errors)
}

fn validate_feat(root: &Path, feat_id: &str, index_status: FeatStatus, errors: &mut Vec<String>) {
    let (state, archived) = match FeatState::load(root, feat_id) {
        Ok(v) => v,
        Err(e) => {
            errors.push(format!("{feat_id}: {e}"));
            return;
        }
    };
    if archived {
        errors.push(format!(
            "{feat_id}: indexed feat lives under feats-archived/"
        ));
        return;
    }
    if state.status != index_status {
        errors.push(format!(
            "{feat_id}: index status {index_status} disagrees with state {}",
            state.status
        ));
    }

    let (tasks, _) = match crate::feat::load_tasks(root, feat_id) {
        Ok(v) => v,
        Err(e) => {
            errors.push(format!("{feat_id}: {e}"));
            return;
        }
    };
    if tasks.feat_id != feat_id {
        errors.push(format!("{feat_id}: tasks feat_id mismatch: {}", tasks.feat_id));
    }
    if tasks.tasks.is_empty() {
        errors.push(format!("{feat_id}: tasks.json has no tasks"));
        return;
    }

    let mut seen = HashSet::new();
    let mut in_progress = Vec::new();
    for task in &tasks.tasks {
        if paths::validate_task_id(&task.id).is_err() {
            errors.push(format!("{feat_id}: invalid task id: {}", task.id));
        }
        if !seen.insert(task.id.clone()) {
            errors.push(format!("{feat_id}: duplicate task id: {}", task.id));
        }
        if task.status == TaskStatus::InProgress {
            in_progress.push(task.id.clone());
        }
        if task.status == TaskStatus::Done {
            if task.gate_result != GateStatus::Pass {
                errors.push(format!(
                    "{feat_id}/{}: done task has gate result {}",
                    task.id, task.gate_result
                ));
            }
            match task.commit_sha.as_deref() {
                None | Some("") => errors.push(format!(
                    "{feat_id}/{}: done task has no commit sha",
                    task.id
                )),
                Some(sha) => validate_commit_record(root, feat_id, &task.id, sha, errors),
            }
        }
    }
    if in_progress.len() > 1 {
        errors.push(format!(
            "{feat_id}: more than one in_progress task: {}",
            in_progress.join(", ")
        ));
    }
    match &state.current_task_id {
        Some(cur) if !in_progress.contains(cur) => errors.push(format!(
            "{feat_id}: current_task_id {cur} does not match an in_progress task"
        )),
        None if !in_progress.is_empty() => errors.push(format!(
            "{feat_id}: task {} in progress but current_task_id unset",
            in_progress[0]
        )),
        _ => {}
    }

    let derived = state.derive_status(&tasks);
    if state.status != derived {
        errors.push(format!(
            "{feat_id}: status {} is not the derived status {derived}",
            state.status
        ));
    }
}

fn validate_commit_record(
    root: &Path,
    feat_id: &str,
    task_id: &str,
    sha: &str,
    errors: &mut Vec<String>,
) {
    let git = Git::new(root);
    let message = match git.show_commit_message(sha) {
        Ok(m) => m,
        Err(_) => {
            errors.push(format!("{feat_id}/{task_id}: commit not found: {sha}"));
            return;
        }
    };
    let validated = commit::parse(&message)
        .and_then(|parsed| {
            commit::validate(&parsed)?;
            commit::match_trailers(&parsed, feat_id, task_id)
        });
    if let Err(e) = validated {
        errors.push(format!("{feat_id}/{task_id}: recorded commit invalid: {e}"));
    }
}

// ---------------------------------------------------------------------------
// diagnose-harness
// ---------------------------------------------------------------------------

/// Full audit: invariants, VCS drift per active feat, and threshold
/// warnings.
pub fn diagnose(root: &Path) -> Result<DoctorReport> {
    let mut report = DoctorReport {
        errors: validate(root)?,
        warnings: Vec::new(),
    };

    let git = Git::new(root);
    git.ensure_repo()?;
    let config = Config::load(root)?;
    let thresholds = &config.doctor_thresholds;
    let idx = index::load(root)?;

    for entry in &idx.feats {
        let feat_id = &entry.feat_id;
        let Ok((state, archived)) = FeatState::load(root, feat_id) else {
            continue;
        };
        if archived {
            continue;
        }

        if !git.branch_exists(&state.branch)? {
            report
                .errors
                .push(format!("{feat_id}: branch missing: {}", state.branch));
        }
        for drift in worktree::reconcile(&git, root, feat_id)? {
            match drift {
                worktree::Drift::Dirty(_) => {
                    report.warnings.push(format!("{feat_id}: {drift}"))
                }
                other => report.errors.push(format!("{feat_id}: {other}")),
            }
        }

        let c = &state.counters;
        if c.gate_fail_streak >= thresholds.gate_fail_streak {
            report.warnings.push(format!(
                "{feat_id}: gate_fail_streak={} reached threshold {}",
                c.gate_fail_streak, thresholds.gate_fail_streak
            ));
        }
        if c.no_progress_rounds >= thresholds.no_progress_rounds {
            report.warnings.push(format!(
                "{feat_id}: no_progress_rounds={} reached threshold {}",
                c.no_progress_rounds, thresholds.no_progress_rounds
            ));
        }
        if c.round_count >= thresholds.max_round_count {
            report.warnings.push(format!(
                "{feat_id}: round_count={} reached threshold {}",
                c.round_count, thresholds.max_round_count
            ));
        }
    }

    // Archived feats: summary presence is a warning, not an invariant.
    if let Ok(entries) = std::fs::read_dir(paths::feats_archived_dir(root)) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_dir() && !paths::feat_summary(root, &name, true).exists() {
                report
                    .warnings
                    .push(format!("{name}: archived feat missing summary.md"));
            }
        }
    }

    Ok(report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
