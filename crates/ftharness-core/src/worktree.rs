//! Worktree manager: owns the feat ↔ checkout-directory mapping.
//!
//! Directory creation and removal under `.worktrees/` happens only here;
//! branch and registry operations are delegated to the git adapter.

use crate::error::{HarnessError, Result};
use crate::git::Git;
use crate::{paths, store};
use std::path::{Path, PathBuf};

/// Keep the checkout area out of version control. The `.gitignore` line is
/// matched whole; when it has to be added the file is rewritten atomically.
/// Returns whether the file changed.
pub fn ensure_ignored(root: &Path) -> Result<bool> {
    let gitignore = root.join(".gitignore");
    let current = match std::fs::read_to_string(&gitignore) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    if current.lines().any(|line| line.trim() == paths::WORKTREES_DIR) {
        return Ok(false);
    }
    let mut updated = current;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(paths::WORKTREES_DIR);
    updated.push('\n');
    store::write_bytes(&gitignore, updated.as_bytes())?;
    Ok(true)
}

/// Create the isolated checkout for a feat: `.worktrees/<feat-id>/` on a new
/// `feat/<feat-id>` branch cut from `base`. Returns the absolute path.
pub fn create(git: &Git, root: &Path, feat_id: &str, base: &str) -> Result<PathBuf> {
    let path = paths::worktree_path(root, feat_id);
    if path.exists() && path.read_dir()?.next().is_some() {
        return Err(HarnessError::InvalidTransition {
            from: "no-worktree".to_string(),
            to: "worktree".to_string(),
            reason: format!("worktree path exists and is non-empty: {}", path.display()),
        });
    }
    ensure_ignored(root)?;
    std::fs::create_dir_all(paths::worktrees_dir(root))?;
    git.add_worktree(&path, &paths::feat_branch(feat_id), base)?;
    Ok(path)
}

/// Remove the checkout and deregister it. `force` drops uncommitted changes.
pub fn remove(git: &Git, root: &Path, feat_id: &str, force: bool) -> Result<()> {
    let path = paths::worktree_path(root, feat_id);
    if path.exists() {
        git.remove_worktree(&path, force)?;
    }
    Ok(())
}

/// Drift findings for one feat's checkout, as the doctor reports them.
#[derive(Debug, Clone, PartialEq)]
pub enum Drift {
    WorktreeMissing(PathBuf),
    NotRegistered(PathBuf),
    WrongHead { expected: String, found: String },
    Dirty(PathBuf),
}

impl std::fmt::Display for Drift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Drift::WorktreeMissing(p) => write!(f, "WorktreeMissing: {}", p.display()),
            Drift::NotRegistered(p) => {
                write!(f, "WorktreeNotRegistered: {}", p.display())
            }
            Drift::WrongHead { expected, found } => {
                write!(f, "WorktreeWrongHead: expected {expected}, found {found}")
            }
            Drift::Dirty(p) => write!(f, "WorktreeDirty: {}", p.display()),
        }
    }
}

/// Reconcile one active feat against the filesystem and the git registry:
/// the directory exists, the registry lists it, and its HEAD is the feat
/// branch. Dirtiness is reported as drift too (informational).
pub fn reconcile(git: &Git, root: &Path, feat_id: &str) -> Result<Vec<Drift>> {
    let mut drift = Vec::new();
    let path = paths::worktree_path(root, feat_id);
    if !path.exists() {
        drift.push(Drift::WorktreeMissing(path));
        return Ok(drift);
    }

    let registered = git
        .list_worktrees()?
        .iter()
        .any(|e| same_path(&e.path, &path));
    if !registered {
        drift.push(Drift::NotRegistered(path.clone()));
    }

    let expected = paths::feat_branch(feat_id);
    let found = git.head_branch(&path)?;
    if found != expected {
        drift.push(Drift::WrongHead { expected, found });
    }

    if !git.worktree_is_clean(&path)? {
        drift.push(Drift::Dirty(path));
    }
    Ok(drift)
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(ca), Ok(cb)) => ca == cb,
        _ => a == b,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
