//! Archive finalizer: the terminal feat transition.
//!
//! True atomicity across the filesystem move, the worktree removal, the
//! branch deletion, and the index mutation is impossible without a
//! coordinator, so the steps are ordered hardest-to-reverse first with
//! compensating actions where reversal is still possible:
//!
//! 1. precondition check (status, cleanliness, merge state)
//! 2. relocate `feats/<id>` → `feats-archived/<id>` (abort on failure)
//! 3. remove the worktree (restore the state dir on failure)
//! 4. delete the branch (best-effort, reported)
//! 5. drop the index entry
//! 6. living-docs inbox sync (best-effort)
//! 7. persist `status=archived` + summary under the new location
//!
//! Post-conditions are verified before returning; a stale worktree
//! registration after step 3 is reported without rolling back the move.

use crate::config::Config;
use crate::error::{HarnessError, Result};
use crate::feat::{ArchiveCleanup, FeatState};
use crate::git::Git;
use crate::store::{utc_now, PathLock};
use crate::task::TasksDoc;
use crate::types::{FeatStatus, TaskStatus};
use crate::{index, memory, paths, store, worktree};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct ArchiveReport {
    pub feat_id: String,
    pub branch_merged: bool,
    pub worktree_removed: bool,
    pub branch_deleted: bool,
    pub memory_files: Vec<std::path::PathBuf>,
    pub warnings: Vec<String>,
}

pub fn archive_feat(root: &Path, feat_id: &str) -> Result<ArchiveReport> {
    if !paths::harness_dir(root).exists() {
        return Err(HarnessError::NotInitialized);
    }
    let git = Git::new(root);
    git.ensure_repo()?;
    let config = Config::load(root)?;

    // ---- step 1: preconditions -------------------------------------------
    let state_path = paths::feat_state(root, feat_id, false);
    if !state_path.exists() {
        if paths::feat_state(root, feat_id, true).exists() {
            return Err(HarnessError::InvalidTransition {
                from: FeatStatus::Archived.to_string(),
                to: FeatStatus::Archived.to_string(),
                reason: format!("feat {feat_id} is already archived"),
            });
        }
        return Err(HarnessError::FeatNotFound(feat_id.to_string()));
    }

    let (mut state, mut tasks) = {
        let _guard = PathLock::acquire(&state_path)?;
        let (state, _) = FeatState::load(root, feat_id)?;
        let (tasks, _) = crate::feat::load_tasks(root, feat_id)?;
        (state, tasks)
    };

    if !state.status.is_archivable() {
        return Err(HarnessError::InvalidTransition {
            from: state.status.to_string(),
            to: FeatStatus::Archived.to_string(),
            reason: format!("feat must be done or abandoned to archive (is {})", state.status),
        });
    }

    let worktree_abs = paths::worktree_path(root, feat_id);
    if config.archive.require_clean
        && worktree_abs.exists()
        && !git.worktree_is_clean(&worktree_abs)?
    {
        return Err(HarnessError::InvalidTransition {
            from: state.status.to_string(),
            to: FeatStatus::Archived.to_string(),
            reason: format!("worktree has uncommitted changes: {}", worktree_abs.display()),
        });
    }

    let branch_exists = git.branch_exists(&state.branch)?;
    let branch_merged =
        branch_exists && git.is_merged(&state.branch, &state.base_branch)?;
    if state.status == FeatStatus::Done && config.archive.require_merged && !branch_merged {
        return Err(HarnessError::InvalidTransition {
            from: state.status.to_string(),
            to: FeatStatus::Archived.to_string(),
            reason: format!(
                "branch {} is not merged into {}",
                state.branch, state.base_branch
            ),
        });
    }

    // ---- step 2: relocate state ------------------------------------------
    let src_dir = paths::feat_dir(root, feat_id, false);
    let dst_dir = paths::feat_dir(root, feat_id, true);
    if dst_dir.exists() {
        return Err(HarnessError::InvalidTransition {
            from: state.status.to_string(),
            to: FeatStatus::Archived.to_string(),
            reason: format!("archived feat directory already exists: {}", dst_dir.display()),
        });
    }
    std::fs::create_dir_all(paths::feats_archived_dir(root))?;
    std::fs::rename(&src_dir, &dst_dir)?;
    // The advisory lock file travels with the directory; it has no meaning
    // for an immutable archive.
    let _ = std::fs::remove_file(dst_dir.join("state.json.lock"));
    let _ = std::fs::remove_file(dst_dir.join("tasks.json.lock"));

    let mut warnings = Vec::new();

    // ---- step 3: remove worktree -----------------------------------------
    let mut worktree_removed = false;
    if worktree_abs.exists() {
        if let Err(e) = worktree::remove(&git, root, feat_id, false) {
            // Compensate: the move is still reversible here.
            std::fs::rename(&dst_dir, &src_dir)?;
            return Err(e);
        }
        worktree_removed = true;
    }

    // ---- step 4: delete branch (best-effort) -----------------------------
    let mut branch_deleted = false;
    if branch_exists {
        let delete = git.delete_branch(&state.branch, branch_merged);
        match delete {
            Ok(()) => branch_deleted = true,
            Err(e) => warnings.push(format!("branch left in place: {e}")),
        }
    }

    // ---- step 5: drop index entry ----------------------------------------
    index::remove(root, feat_id)?;

    // ---- step 6: memory sync (best-effort) -------------------------------
    let mut memory_files = Vec::new();
    if memory::detect_living_docs(root) {
        match memory::sync_inbox(root, &state, &tasks) {
            Ok(files) => memory_files = files,
            Err(e) => warnings.push(format!("living-docs sync failed: {e}")),
        }
    }

    // ---- step 7: persist archived state ----------------------------------
    let now = utc_now();
    state.closed_from_status = Some(state.status);
    state.status = FeatStatus::Archived;
    state.archived_at = Some(now);
    state.archived_cleanup = Some(ArchiveCleanup {
        base_branch: state.base_branch.clone(),
        branch_merged,
        worktree_removed,
        branch_deleted,
        note: "worktree removed; branch deleted only when merged into base".to_string(),
    });
    state.record("feat_archived", "relocated and cleaned");
    state.save(root, true)?;
    crate::feat::save_tasks(root, &mut tasks, true)?;
    store::write_bytes(
        &paths::feat_summary(root, feat_id, true),
        render_summary(&state, &tasks).as_bytes(),
    )?;

    // ---- post-conditions --------------------------------------------------
    check_postconditions(root, &git, feat_id, &worktree_abs)?;

    Ok(ArchiveReport {
        feat_id: feat_id.to_string(),
        branch_merged,
        worktree_removed,
        branch_deleted,
        memory_files,
        warnings,
    })
}

fn check_postconditions(root: &Path, git: &Git, feat_id: &str, worktree_abs: &Path) -> Result<()> {
    if paths::feat_dir(root, feat_id, false).exists() {
        return Err(HarnessError::StaleWorktree(format!(
            "active feat dir still present after archive: {feat_id}"
        )));
    }
    if !paths::feat_dir(root, feat_id, true).exists() {
        return Err(HarnessError::StaleWorktree(format!(
            "archived feat dir missing after archive: {feat_id}"
        )));
    }
    if worktree_abs.exists() {
        return Err(HarnessError::StaleWorktree(format!(
            "worktree directory still present: {}",
            worktree_abs.display()
        )));
    }
    let rel = Path::new(paths::WORKTREES_DIR).join(feat_id);
    let registered = git
        .list_worktrees()?
        .iter()
        .any(|e| e.path == worktree_abs || e.path.ends_with(&rel));
    if registered {
        return Err(HarnessError::StaleWorktree(format!(
            "git worktree registry still lists {}; run 'git worktree prune'",
            worktree_abs.display()
        )));
    }
    if index::load(root)?.get(feat_id).is_some() {
        return Err(HarnessError::StaleWorktree(format!(
            "index still lists archived feat: {feat_id}"
        )));
    }
    Ok(())
}

fn render_summary(state: &FeatState, tasks: &TasksDoc) -> String {
    let cleanup = state.archived_cleanup.clone().unwrap_or(ArchiveCleanup {
        base_branch: state.base_branch.clone(),
        branch_merged: false,
        worktree_removed: false,
        branch_deleted: false,
        note: String::new(),
    });
    let closed_from = state
        .closed_from_status
        .map(|s| s.to_string())
        .unwrap_or_default();
    format!(
        "# Feat Summary: {feat_id}\n\n\
         - Title: {title}\n\
         - Goal: {goal}\n\
         - Final Status: {status}\n\
         - Closed From Status: {closed_from}\n\
         - Base Branch: {base}\n\
         - Branch: {branch}\n\
         - Worktree: {worktree}\n\
         - Archived At (UTC): {archived_at}\n\n\
         ## Archive Cleanup\n\
         - Branch Merged: {merged}\n\
         - Worktree Removed: {wt_removed}\n\
         - Branch Deleted: {deleted}\n\
         - Cleanup Note: {note}\n\n\
         ## Task Stats\n\
         - planned: {planned}\n\
         - in_progress: {in_progress}\n\
         - done: {done}\n\
         - blocked: {blocked}\n\n\
         ## Counters\n\
         - gate_fail_streak: {streak}\n\
         - no_progress_rounds: {no_progress}\n\
         - round_count: {rounds}\n",
        feat_id = state.feat_id,
        title = state.title,
        goal = state.goal,
        status = state.status,
        closed_from = closed_from,
        base = state.base_branch,
        branch = state.branch,
        worktree = state.worktree_path,
        archived_at = state
            .archived_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_default(),
        merged = cleanup.branch_merged,
        wt_removed = cleanup.worktree_removed,
        deleted = cleanup.branch_deleted,
        note = cleanup.note,
        planned = tasks.count(TaskStatus::Planned),
        in_progress = tasks.count(TaskStatus::InProgress),
        done = tasks.count(TaskStatus::Done),
        blocked = tasks.count(TaskStatus::Blocked),
        streak = state.counters.gate_fail_streak,
        no_progress = state.counters.no_progress_rounds,
        rounds = state.counters.round_count,
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{self, tests::harness_with_feat, tests::set_gate_commands};
    use crate::types::GateStatus;
    use std::process::Command;

    fn complete_first_task(root: &Path, feat_id: &str) {
        set_gate_commands(root, &["true"]);
        engine::start_task(root, feat_id, Some("T-001")).unwrap();
        engine::run_task_gate(root, feat_id, "T-001").unwrap();
        let wt = paths::worktree_path(root, feat_id);
        std::fs::write(wt.join("work.txt"), "change\n").unwrap();
        engine::prepare_task_commit(root, feat_id, "T-001", "Implement T-001", TaskStatus::Done, true)
            .unwrap();
        engine::finish_task(root, feat_id, "T-001", TaskStatus::Done).unwrap();
    }

    fn merge_into_base(root: &Path, branch: &str) {
        let out = Command::new("git")
            .args(["-C", &root.to_string_lossy(), "merge", "--no-ff", branch])
            .output()
            .unwrap();
        assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    }

    #[test]
    fn archive_happy_path_satisfies_postconditions() {
        let (dir, feat_id) = harness_with_feat();
        complete_first_task(dir.path(), &feat_id);
        merge_into_base(dir.path(), &format!("feat/{feat_id}"));

        let report = archive_feat(dir.path(), &feat_id).unwrap();
        assert!(report.branch_merged);
        assert!(report.worktree_removed);
        assert!(report.branch_deleted);
        assert!(report.warnings.is_empty());

        assert!(!paths::feat_dir(dir.path(), &feat_id, false).exists());
        assert!(paths::feat_dir(dir.path(), &feat_id, true).exists());
        assert!(!paths::worktree_path(dir.path(), &feat_id).exists());
        assert!(index::load(dir.path()).unwrap().feats.is_empty());

        let (state, archived) = FeatState::load(dir.path(), &feat_id).unwrap();
        assert!(archived);
        assert_eq!(state.status, FeatStatus::Archived);
        assert!(state.archived_at.is_some());
        assert_eq!(state.closed_from_status, Some(FeatStatus::Done));
        assert!(paths::feat_summary(dir.path(), &feat_id, true).exists());
        assert!(!Git::new(dir.path())
            .branch_exists(&state.branch)
            .unwrap());
    }

    #[test]
    fn archive_refuses_active_feat() {
        let (dir, feat_id) = harness_with_feat();
        engine::start_task(dir.path(), &feat_id, Some("T-001")).unwrap();
        engine::finish_task(dir.path(), &feat_id, "T-001", TaskStatus::Blocked).unwrap();
        // Blocked task leaves the feat active; archive refuses it.
        let err = archive_feat(dir.path(), &feat_id).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidTransition { .. }));
        assert!(paths::feat_dir(dir.path(), &feat_id, false).exists());
    }

    #[test]
    fn archive_refuses_done_feat_with_unmerged_branch() {
        let (dir, feat_id) = harness_with_feat();
        complete_first_task(dir.path(), &feat_id);

        let err = archive_feat(dir.path(), &feat_id).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidTransition { .. }));
        assert!(err.to_string().contains("not merged"));
        // Nothing moved.
        assert!(paths::feat_dir(dir.path(), &feat_id, false).exists());
        assert!(!index::load(dir.path()).unwrap().feats.is_empty());
    }

    #[test]
    fn archive_refuses_dirty_worktree() {
        let (dir, feat_id) = harness_with_feat();
        complete_first_task(dir.path(), &feat_id);
        merge_into_base(dir.path(), &format!("feat/{feat_id}"));
        std::fs::write(
            paths::worktree_path(dir.path(), &feat_id).join("wip.txt"),
            "uncommitted",
        )
        .unwrap();

        let err = archive_feat(dir.path(), &feat_id).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidTransition { .. }));
        assert!(err.to_string().contains("uncommitted"));
    }

    #[test]
    fn archive_abandoned_feat_leaves_unmerged_branch_with_warning() {
        let (dir, feat_id) = harness_with_feat();
        set_gate_commands(dir.path(), &["true"]);
        engine::start_task(dir.path(), &feat_id, Some("T-001")).unwrap();
        engine::run_task_gate(dir.path(), &feat_id, "T-001").unwrap();
        let wt = paths::worktree_path(dir.path(), &feat_id);
        std::fs::write(wt.join("work.txt"), "change\n").unwrap();
        engine::prepare_task_commit(
            dir.path(),
            &feat_id,
            "T-001",
            "Partial work",
            TaskStatus::Blocked,
            true,
        )
        .unwrap();
        engine::finish_task(dir.path(), &feat_id, "T-001", TaskStatus::Blocked).unwrap();
        engine::abandon_feat(dir.path(), &feat_id).unwrap();

        let report = archive_feat(dir.path(), &feat_id).unwrap();
        assert!(!report.branch_merged);
        assert!(!report.branch_deleted);
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("branch left in place")));

        // Branch survives; everything else is archived.
        let git = Git::new(dir.path());
        assert!(git.branch_exists(&format!("feat/{feat_id}")).unwrap());
        assert!(paths::feat_dir(dir.path(), &feat_id, true).exists());
        let (state, _) = FeatState::load(dir.path(), &feat_id).unwrap();
        assert_eq!(state.closed_from_status, Some(FeatStatus::Abandoned));
    }

    #[test]
    fn stale_registry_entry_fails_postconditions_without_rollback() {
        let (dir, feat_id) = harness_with_feat();
        engine::abandon_feat(dir.path(), &feat_id).unwrap();

        // Blow the checkout away behind git's back: the worktree registry
        // keeps a stale record for the path until an operator prunes it.
        let wt = paths::worktree_path(dir.path(), &feat_id);
        std::fs::remove_dir_all(&wt).unwrap();
        let git = Git::new(dir.path());
        assert!(git
            .list_worktrees()
            .unwrap()
            .iter()
            .any(|e| e.path == wt));

        let err = archive_feat(dir.path(), &feat_id).unwrap_err();
        assert!(matches!(err, HarnessError::StaleWorktree(_)));
        assert!(err.to_string().contains("prune"));

        // The relocation is committed, deliberately not rolled back: the
        // state lives under feats-archived/ as archived, the index entry is
        // gone, and only the registry drift remains for the operator.
        assert!(!paths::feat_dir(dir.path(), &feat_id, false).exists());
        assert!(paths::feat_dir(dir.path(), &feat_id, true).exists());
        assert!(index::load(dir.path()).unwrap().get(&feat_id).is_none());
        let (state, archived) = FeatState::load(dir.path(), &feat_id).unwrap();
        assert!(archived);
        assert_eq!(state.status, FeatStatus::Archived);
    }

    #[test]
    fn archive_twice_is_invalid() {
        let (dir, feat_id) = harness_with_feat();
        complete_first_task(dir.path(), &feat_id);
        merge_into_base(dir.path(), &format!("feat/{feat_id}"));
        archive_feat(dir.path(), &feat_id).unwrap();
        let err = archive_feat(dir.path(), &feat_id).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidTransition { .. }));
    }

    #[test]
    fn archive_writes_gotcha_when_living_docs_present() {
        let (dir, feat_id) = harness_with_feat();
        std::fs::create_dir_all(dir.path().join("docs/.bagakit/inbox")).unwrap();
        std::fs::write(dir.path().join("docs/must-guidebook.md"), "g").unwrap();
        std::fs::write(dir.path().join("docs/must-docs-taxonomy.md"), "t").unwrap();

        engine::start_task(dir.path(), &feat_id, Some("T-001")).unwrap();
        engine::finish_task(dir.path(), &feat_id, "T-001", TaskStatus::Blocked).unwrap();
        engine::abandon_feat(dir.path(), &feat_id).unwrap();

        let report = archive_feat(dir.path(), &feat_id).unwrap();
        assert_eq!(report.memory_files.len(), 3);
        assert!(dir
            .path()
            .join(format!("docs/.bagakit/inbox/gotcha-{feat_id}.md"))
            .exists());
    }

    #[test]
    fn done_task_implies_pass_and_sha_after_full_loop() {
        let (dir, feat_id) = harness_with_feat();
        complete_first_task(dir.path(), &feat_id);
        let (tasks, _) = crate::feat::load_tasks(dir.path(), &feat_id).unwrap();
        for task in &tasks.tasks {
            if task.status == TaskStatus::Done {
                assert_eq!(task.gate_result, GateStatus::Pass);
                assert!(task.commit_sha.as_deref().map(|s| !s.is_empty()).unwrap_or(false));
            }
        }
    }
}
