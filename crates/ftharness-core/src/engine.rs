//! Lifecycle engine: validates and applies feat/task transitions.
//!
//! Every transition follows the same discipline: acquire the feat's
//! state-file lock, validate preconditions against the loaded documents,
//! release the lock before any subprocess (git, gate commands), then
//! re-acquire, re-validate, and persist. Precondition failures are
//! `InvalidTransition` and leave no persisted change; external failures
//! abort before the SSOT write.

use crate::config::Config;
use crate::error::{HarnessError, Result};
use crate::feat::{FeatState, GateSummary};
use crate::gate::{self, GateOutcome};
use crate::git::Git;
use crate::store::{self, utc_now, PathLock};
use crate::task::TasksDoc;
use crate::types::{FeatStatus, GateStatus, TaskStatus};
use crate::{commit, index, paths, reference, worktree};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// initialize-harness
// ---------------------------------------------------------------------------

/// Create the harness tree under `.bagakit/ft-harness/` and seed defaults.
/// Idempotent: existing files are left alone.
pub fn initialize_harness(root: &Path, strict: bool, manifest: Option<&Path>) -> Result<()> {
    let git = Git::new(root);
    git.ensure_repo()?;

    if strict {
        let issues = reference::check_report(root, manifest)?;
        if !issues.is_empty() {
            return Err(HarnessError::ReferenceNotReady(issues.join("; ")));
        }
    }

    for dir in [
        paths::feats_dir(root),
        paths::feats_archived_dir(root),
        root.join(paths::INDEX_DIR),
        paths::artifacts_dir(root),
    ] {
        std::fs::create_dir_all(dir)?;
    }

    if !paths::index_path(root).exists() {
        store::save(&paths::index_path(root), &index::IndexDoc::new())?;
    }
    if !paths::config_path(root).exists() {
        Config::default().save(root)?;
    }
    store::seed_file(
        &paths::harness_dir(root).join("README.md"),
        format!("# {}\n\nJSON SSOT feat/task harness runtime data.\n", paths::HARNESS_DIR)
            .as_bytes(),
    )?;
    store::seed_file(
        &paths::harness_dir(root).join(".gitignore"),
        b"artifacts/*.log\n",
    )?;
    worktree::ensure_ignored(root)?;
    Ok(())
}

fn ensure_initialized(root: &Path) -> Result<()> {
    if !paths::harness_dir(root).exists() {
        return Err(HarnessError::NotInitialized);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// create-feat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CreatedFeat {
    pub feat_id: String,
    pub branch: String,
    pub worktree: PathBuf,
}

/// Create a feat: mint its id, cut `feat/<feat-id>` from the base branch
/// into an isolated checkout, scaffold the state directory, and register it
/// in the index.
pub fn create_feat(
    root: &Path,
    title: &str,
    slug: Option<&str>,
    goal: &str,
    strict: bool,
    manifest: Option<&Path>,
) -> Result<CreatedFeat> {
    ensure_initialized(root)?;
    let git = Git::new(root);
    git.ensure_repo()?;

    if strict {
        let issues = reference::check_report(root, manifest)?;
        if !issues.is_empty() {
            return Err(HarnessError::ReferenceNotReady(issues.join("; ")));
        }
    }

    let slug = match slug {
        Some(s) if !s.is_empty() => {
            paths::validate_slug(s)?;
            s.to_string()
        }
        _ => paths::slugify(title)?,
    };

    let config = Config::load(root)?;
    let base = match &config.base_branch {
        Some(b) => b.clone(),
        None => git.current_base_branch()?,
    };

    // Mint under the index lock so the slug-collision check and the counter
    // scan see a stable registry. The lock is released before git runs; a
    // same-id race after that loses at branch creation, which is unique.
    let feat_id = {
        let _lock = PathLock::acquire(&paths::index_path(root))?;
        let idx: index::IndexDoc = match store::load(&paths::index_path(root)) {
            Ok(d) => d,
            Err(HarnessError::NotFound(_)) => return Err(HarnessError::NotInitialized),
            Err(e) => return Err(e),
        };
        if idx.active_slug_exists(&slug) {
            return Err(HarnessError::InvalidTransition {
                from: "none".to_string(),
                to: "draft".to_string(),
                reason: format!("an active feat already uses slug '{slug}'"),
            });
        }
        mint_feat_id(root, &idx, &slug)
    };

    let worktree_abs = worktree::create(&git, root, &feat_id, &base)?;

    let scaffold = || -> Result<FeatState> {
        let feat_dir = paths::feat_dir(root, &feat_id, false);
        std::fs::create_dir_all(feat_dir.join("spec-deltas"))?;
        std::fs::create_dir_all(paths::feat_commits_dir(root, &feat_id))?;

        store::seed_file(
            &feat_dir.join("proposal.md"),
            proposal_template(&feat_id, title, goal).as_bytes(),
        )?;
        store::seed_file(
            &feat_dir.join("spec-deltas").join("core.md"),
            spec_delta_template(&feat_id).as_bytes(),
        )?;

        let mut state = FeatState::new(&feat_id, title, &slug, goal, &base);
        state.history[0].detail = format!("base_branch={base}");

        let mut tasks = TasksDoc::new(&feat_id);
        let first = tasks.add_task("Implement the first scoped change for this feat");
        store::seed_file(
            &paths::task_gate_dir(root, &feat_id, &first).join("ui-verification.md"),
            ui_gate_template().as_bytes(),
        )?;

        state.save(root, false)?;
        crate::feat::save_tasks(root, &mut tasks, false)?;
        index::upsert(root, &state)?;
        Ok(state)
    };

    let state = match scaffold() {
        Ok(state) => state,
        Err(e) => {
            // Compensate: a half-created feat must not survive.
            let _ = worktree::remove(&git, root, &feat_id, true);
            let _ = git.delete_branch(&paths::feat_branch(&feat_id), true);
            let _ = std::fs::remove_dir_all(paths::feat_dir(root, &feat_id, false));
            let _ = index::remove(root, &feat_id);
            return Err(e);
        }
    };

    Ok(CreatedFeat {
        feat_id: state.feat_id,
        branch: state.branch,
        worktree: worktree_abs,
    })
}

/// Next `F-<slug>-NNN` over everything that ever used this slug: index
/// entries plus active and archived state directories.
fn mint_feat_id(root: &Path, idx: &index::IndexDoc, slug: &str) -> String {
    let mut max = 0u32;
    let mut consider = |feat_id: &str| {
        if let Ok((s, n)) = paths::split_feat_id(feat_id) {
            if s == slug && n > max {
                max = n;
            }
        }
    };
    for entry in &idx.feats {
        consider(&entry.feat_id);
    }
    for dir in [paths::feats_dir(root), paths::feats_archived_dir(root)] {
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                consider(&entry.file_name().to_string_lossy());
            }
        }
    }
    paths::format_feat_id(slug, max + 1)
}

// ---------------------------------------------------------------------------
// start-task
// ---------------------------------------------------------------------------

/// Start a task. With `task = None` a fresh `T-NNN` is minted and started.
/// Blocked tasks may be re-started; that resets `finished_at`.
pub fn start_task(root: &Path, feat_id: &str, task: Option<&str>) -> Result<String> {
    ensure_initialized(root)?;
    let (state_path, _guard) = lock_active_feat(root, feat_id)?;
    let mut state: FeatState = store::load(&state_path)?;
    let (mut tasks, _) = crate::feat::load_tasks(root, feat_id)?;

    if let Some(running) = tasks.in_progress() {
        return Err(HarnessError::InvalidTransition {
            from: TaskStatus::InProgress.to_string(),
            to: TaskStatus::InProgress.to_string(),
            reason: format!("task {} is already in progress in {feat_id}", running.id),
        });
    }

    let task_id = match task {
        Some(id) => {
            paths::validate_task_id(id)?;
            id.to_string()
        }
        None => tasks.add_task("Implement the next scoped change for this feat"),
    };

    let now = utc_now();
    let target = tasks.find_mut(&task_id)?;
    match target.status {
        TaskStatus::Planned | TaskStatus::Blocked => {}
        other => {
            return Err(HarnessError::InvalidTransition {
                from: other.to_string(),
                to: TaskStatus::InProgress.to_string(),
                reason: format!("task {task_id} cannot be started from {other}"),
            })
        }
    }
    target.status = TaskStatus::InProgress;
    if target.started_at.is_none() {
        target.started_at = Some(now);
    }
    target.finished_at = None;
    target.updated_at = now;

    state.current_task_id = Some(task_id.clone());
    state.status = state.derive_status(&tasks);
    state.record("task_started", &task_id);

    crate::feat::save_tasks(root, &mut tasks, false)?;
    state.save(root, false)?;
    drop(_guard);
    index::upsert(root, &state)?;
    Ok(task_id)
}

// ---------------------------------------------------------------------------
// run-task-gate
// ---------------------------------------------------------------------------

/// Run the quality gate for an in-progress task and record the evidence.
/// The task's status never changes here; a failing gate is recorded and the
/// caller refuses to advance.
pub fn run_task_gate(root: &Path, feat_id: &str, task_id: &str) -> Result<GateOutcome> {
    ensure_initialized(root)?;
    paths::validate_task_id(task_id)?;

    // Validate under the lock, then release it for the gate subprocesses.
    let (state_path, guard) = lock_active_feat(root, feat_id)?;
    let state: FeatState = store::load(&state_path)?;
    {
        let (tasks, _) = crate::feat::load_tasks(root, feat_id)?;
        check_current_task(&state, &tasks, task_id)?;
    }
    let workdir = resolve_workdir(root, &state);
    drop(guard);

    let config = Config::load(root)?;
    let gate_dir = paths::task_gate_dir(root, feat_id, task_id);
    let outcome = gate::run_gate(root, &workdir, &gate_dir, &config)?;

    // Re-acquire and record. The task must still be in progress; anything
    // else means a concurrent transition won and the evidence stays on disk
    // without an SSOT update.
    let (state_path, guard) = lock_active_feat(root, feat_id)?;
    let mut state: FeatState = store::load(&state_path)?;
    let (mut tasks, _) = crate::feat::load_tasks(root, feat_id)?;
    check_current_task(&state, &tasks, task_id)?;

    let now = utc_now();
    let task = tasks.find_mut(task_id)?;
    task.gate_result = outcome.result;
    task.gate_evidence.extend(outcome.records.iter().cloned());
    task.updated_at = now;

    state.counters.round_count += 1;
    state.counters.no_progress_rounds += 1;
    if outcome.result == GateStatus::Pass {
        state.counters.gate_fail_streak = 0;
    } else {
        state.counters.gate_fail_streak += 1;
    }
    state.gate = GateSummary {
        last_result: Some(outcome.result),
        last_task_id: Some(task_id.to_string()),
        last_checked_at: Some(now),
        last_log_path: Some(relative_to_root(root, &outcome.log_path)),
    };
    state.record("task_gate", format!("{task_id} => {}", outcome.result));

    crate::feat::save_tasks(root, &mut tasks, false)?;
    state.save(root, false)?;
    drop(guard);
    index::upsert(root, &state)?;
    Ok(outcome)
}

// ---------------------------------------------------------------------------
// prepare-task-commit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PreparedCommit {
    pub message_file: PathBuf,
    pub commit_sha: Option<String>,
}

/// Emit the structured commit message for a task to
/// `commits/<task-id>.msg`. The path and bytes are deterministic over
/// unchanged inputs. With `execute`, the commit is made in the feat
/// worktree and the resulting sha recorded.
pub fn prepare_task_commit(
    root: &Path,
    feat_id: &str,
    task_id: &str,
    summary: &str,
    task_status: TaskStatus,
    execute: bool,
) -> Result<PreparedCommit> {
    ensure_initialized(root)?;
    paths::validate_task_id(task_id)?;
    if !task_status.is_terminal() {
        return Err(HarnessError::InvalidTransition {
            from: TaskStatus::InProgress.to_string(),
            to: task_status.to_string(),
            reason: "commit task status must be done or blocked".to_string(),
        });
    }
    let git = Git::new(root);
    git.ensure_repo()?;

    let (state_path, guard) = lock_active_feat(root, feat_id)?;
    let state: FeatState = store::load(&state_path)?;
    let (tasks, _) = crate::feat::load_tasks(root, feat_id)?;
    check_current_task(&state, &tasks, task_id)?;
    let task = tasks.find(task_id)?.clone();

    let gate_result = task.gate_result;
    if gate_result == GateStatus::Unknown {
        return Err(HarnessError::InvalidTransition {
            from: TaskStatus::InProgress.to_string(),
            to: task_status.to_string(),
            reason: format!("task {task_id} has no gate result; run run-task-gate first"),
        });
    }
    if task_status == TaskStatus::Done && gate_result != GateStatus::Pass {
        return Err(HarnessError::InvalidTransition {
            from: TaskStatus::InProgress.to_string(),
            to: TaskStatus::Done.to_string(),
            reason: "committing as done requires a passing gate".to_string(),
        });
    }
    let workdir = resolve_workdir(root, &state);
    drop(guard);

    if task_status == TaskStatus::Done && git.worktree_is_clean(&workdir)? {
        return Err(HarnessError::InvalidTransition {
            from: TaskStatus::InProgress.to_string(),
            to: TaskStatus::Done.to_string(),
            reason: format!("worktree has no changes to commit: {}", workdir.display()),
        });
    }

    let message = commit::build_message(&state, &task, summary, task_status, gate_result);
    commit::validate(&commit::parse(&message)?)?;

    let message_file = paths::feat_commits_dir(root, feat_id).join(format!("{task_id}.msg"));
    store::write_bytes(&message_file, message.as_bytes())?;

    let mut commit_sha = None;
    if execute {
        let sha = git.commit_all_with_file(&workdir, &message_file)?;
        let (state_path, guard) = lock_active_feat(root, feat_id)?;
        let mut state: FeatState = store::load(&state_path)?;
        let (mut tasks, _) = crate::feat::load_tasks(root, feat_id)?;
        if let Ok(task) = tasks.find_mut(task_id) {
            task.commit_sha = Some(sha.clone());
            task.updated_at = utc_now();
        }
        state.record("task_committed", format!("{task_id} => {sha}"));
        crate::feat::save_tasks(root, &mut tasks, false)?;
        state.save(root, false)?;
        drop(guard);
        index::upsert(root, &state)?;
        commit_sha = Some(sha);
    }

    Ok(PreparedCommit {
        message_file,
        commit_sha,
    })
}

// ---------------------------------------------------------------------------
// finish-task
// ---------------------------------------------------------------------------

/// Finish an in-progress task as `done` or `blocked`.
///
/// Finishing as done re-parses the feat-branch HEAD commit: its trailers
/// must name this exact feat and task, and the message must satisfy the
/// commit protocol (including the done ⇒ gate-pass cross-field rule).
pub fn finish_task(
    root: &Path,
    feat_id: &str,
    task_id: &str,
    result: TaskStatus,
) -> Result<FeatStatus> {
    ensure_initialized(root)?;
    paths::validate_task_id(task_id)?;
    if !result.is_terminal() {
        return Err(HarnessError::InvalidTransition {
            from: TaskStatus::InProgress.to_string(),
            to: result.to_string(),
            reason: "finish result must be done or blocked".to_string(),
        });
    }

    let (state_path, guard) = lock_active_feat(root, feat_id)?;
    let state: FeatState = store::load(&state_path)?;
    let (tasks, _) = crate::feat::load_tasks(root, feat_id)?;
    check_current_task(&state, &tasks, task_id)?;
    let task = tasks.find(task_id)?;
    if result == TaskStatus::Done && task.gate_result != GateStatus::Pass {
        return Err(HarnessError::InvalidTransition {
            from: TaskStatus::InProgress.to_string(),
            to: TaskStatus::Done.to_string(),
            reason: format!("task {task_id} gate result is {}", task.gate_result),
        });
    }
    let workdir = resolve_workdir(root, &state);
    drop(guard);

    // HEAD inspection happens outside the lock; failures here leave the
    // task untouched.
    let mut head_sha = None;
    if result == TaskStatus::Done {
        let git = Git::new(root);
        let message = git.head_message(&workdir)?;
        let parsed = commit::parse(&message)?;
        commit::validate(&parsed)?;
        commit::match_trailers(&parsed, feat_id, task_id)?;
        head_sha = Some(git.head_sha(&workdir)?);
    }

    let (state_path, guard) = lock_active_feat(root, feat_id)?;
    let mut state: FeatState = store::load(&state_path)?;
    let (mut tasks, _) = crate::feat::load_tasks(root, feat_id)?;
    check_current_task(&state, &tasks, task_id)?;

    let now = utc_now();
    let task = tasks.find_mut(task_id)?;
    task.status = result;
    task.finished_at = Some(now);
    task.updated_at = now;
    if let Some(sha) = head_sha {
        task.commit_sha = Some(sha);
    }

    state.current_task_id = None;
    state.counters.no_progress_rounds = 0;
    state.status = state.derive_status(&tasks);
    state.record("task_finished", format!("{task_id} => {result}"));

    crate::feat::save_tasks(root, &mut tasks, false)?;
    state.save(root, false)?;
    let status = state.status;
    drop(guard);
    index::upsert(root, &state)?;
    Ok(status)
}

// ---------------------------------------------------------------------------
// abandon-feat
// ---------------------------------------------------------------------------

/// Operator escape hatch: mark a feat abandoned so it can be archived
/// without completing its tasks. Requires no task in progress.
pub fn abandon_feat(root: &Path, feat_id: &str) -> Result<()> {
    ensure_initialized(root)?;
    let (state_path, guard) = lock_active_feat(root, feat_id)?;
    let mut state: FeatState = store::load(&state_path)?;
    let (tasks, _) = crate::feat::load_tasks(root, feat_id)?;
    if let Some(running) = tasks.in_progress() {
        return Err(HarnessError::InvalidTransition {
            from: state.status.to_string(),
            to: FeatStatus::Abandoned.to_string(),
            reason: format!("task {} is still in progress", running.id),
        });
    }
    state.status = FeatStatus::Abandoned;
    state.record("feat_abandoned", "");
    state.save(root, false)?;
    drop(guard);
    index::upsert(root, &state)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Lock the feat's state file; archived feats are immutable.
fn lock_active_feat(root: &Path, feat_id: &str) -> Result<(PathBuf, PathLock)> {
    let state_path = paths::feat_state(root, feat_id, false);
    if !state_path.exists() {
        if paths::feat_state(root, feat_id, true).exists() {
            return Err(HarnessError::InvalidTransition {
                from: FeatStatus::Archived.to_string(),
                to: "mutated".to_string(),
                reason: format!("feat {feat_id} is archived"),
            });
        }
        return Err(HarnessError::FeatNotFound(feat_id.to_string()));
    }
    let guard = PathLock::acquire(&state_path)?;
    Ok((state_path, guard))
}

fn check_current_task(state: &FeatState, tasks: &TasksDoc, task_id: &str) -> Result<()> {
    let task = tasks.find(task_id)?;
    if task.status != TaskStatus::InProgress {
        return Err(HarnessError::InvalidTransition {
            from: task.status.to_string(),
            to: TaskStatus::InProgress.to_string(),
            reason: format!("task {task_id} is not in progress"),
        });
    }
    if state.current_task_id.as_deref() != Some(task_id) {
        return Err(HarnessError::InvalidTransition {
            from: state
                .current_task_id
                .clone()
                .unwrap_or_else(|| "none".to_string()),
            to: task_id.to_string(),
            reason: "feat current_task_id does not match requested task".to_string(),
        });
    }
    Ok(())
}

fn resolve_workdir(root: &Path, state: &FeatState) -> PathBuf {
    let wt = root.join(&state.worktree_path);
    if wt.exists() {
        wt
    } else {
        root.to_path_buf()
    }
}

fn relative_to_root(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// Template lookup: an installed skill dir (env `BAGAKIT_FT_SKILL_DIR`,
/// `references/<name>`) overrides the built-in text.
fn load_template(name: &str, fallback: String) -> String {
    if let Ok(skill_dir) = std::env::var(paths::SKILL_DIR_ENV) {
        let path = Path::new(&skill_dir).join("references").join(name);
        if let Ok(text) = std::fs::read_to_string(&path) {
            return text;
        }
    }
    fallback
}

fn proposal_template(feat_id: &str, title: &str, goal: &str) -> String {
    load_template(
        "feat-proposal-template.md",
        format!(
            "# Feat Proposal: {feat_id}\n\n## Title\n\n{title}\n\n## Goal\n\n{goal}\n\n## Scope\n\n- In:\n- Out:\n\n## Risks\n\n- \n"
        ),
    )
}

fn spec_delta_template(feat_id: &str) -> String {
    load_template(
        "feat-spec-delta-template.md",
        format!("# Spec Delta: core\n\nFeat: {feat_id}\n\n## Changes\n\n- \n"),
    )
}

fn ui_gate_template() -> String {
    load_template(
        "ui-gate-template.md",
        "# UI Verification\n\n## Critical Paths\n\n- \n\n## Screenshots\n\n- \n\n## Console Errors\n\nConsole Errors: none\n"
            .to_string(),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
