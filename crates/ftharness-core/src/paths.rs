use crate::error::{HarnessError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const HARNESS_DIR: &str = ".bagakit/ft-harness";
pub const FEATS_DIR: &str = ".bagakit/ft-harness/feats";
pub const FEATS_ARCHIVED_DIR: &str = ".bagakit/ft-harness/feats-archived";
pub const INDEX_DIR: &str = ".bagakit/ft-harness/index";
pub const ARTIFACTS_DIR: &str = ".bagakit/ft-harness/artifacts";
pub const WORKTREES_DIR: &str = ".worktrees";

pub const CONFIG_FILE: &str = ".bagakit/ft-harness/config.json";
pub const INDEX_FILE: &str = ".bagakit/ft-harness/index/feats.json";

pub const STATE_FILE: &str = "state.json";
pub const TASKS_FILE: &str = "tasks.json";
pub const SUMMARY_FILE: &str = "summary.md";

pub const SKILL_DIR_ENV: &str = "BAGAKIT_FT_SKILL_DIR";
pub const REFERENCE_SKILLS_ENV: &str = "BAGAKIT_REFERENCE_SKILLS_HOME";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn harness_dir(root: &Path) -> PathBuf {
    root.join(HARNESS_DIR)
}

pub fn feats_dir(root: &Path) -> PathBuf {
    root.join(FEATS_DIR)
}

pub fn feats_archived_dir(root: &Path) -> PathBuf {
    root.join(FEATS_ARCHIVED_DIR)
}

/// Directory holding a feat's persisted state. Archived feats live under
/// `feats-archived/` with the same inner shape.
pub fn feat_dir(root: &Path, feat_id: &str, archived: bool) -> PathBuf {
    if archived {
        feats_archived_dir(root).join(feat_id)
    } else {
        feats_dir(root).join(feat_id)
    }
}

pub fn feat_state(root: &Path, feat_id: &str, archived: bool) -> PathBuf {
    feat_dir(root, feat_id, archived).join(STATE_FILE)
}

pub fn feat_tasks(root: &Path, feat_id: &str, archived: bool) -> PathBuf {
    feat_dir(root, feat_id, archived).join(TASKS_FILE)
}

pub fn feat_summary(root: &Path, feat_id: &str, archived: bool) -> PathBuf {
    feat_dir(root, feat_id, archived).join(SUMMARY_FILE)
}

pub fn feat_commits_dir(root: &Path, feat_id: &str) -> PathBuf {
    feat_dir(root, feat_id, false).join("commits")
}

pub fn task_gate_dir(root: &Path, feat_id: &str, task_id: &str) -> PathBuf {
    feat_dir(root, feat_id, false).join("gate").join(task_id)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn index_path(root: &Path) -> PathBuf {
    root.join(INDEX_FILE)
}

pub fn artifacts_dir(root: &Path) -> PathBuf {
    root.join(ARTIFACTS_DIR)
}

pub fn ref_report_json(root: &Path) -> PathBuf {
    artifacts_dir(root).join("ref-read-report.json")
}

pub fn ref_report_md(root: &Path) -> PathBuf {
    artifacts_dir(root).join("ref-read-report.md")
}

pub fn worktrees_dir(root: &Path) -> PathBuf {
    root.join(WORKTREES_DIR)
}

/// The isolated checkout directory for a feat.
pub fn worktree_path(root: &Path, feat_id: &str) -> PathBuf {
    worktrees_dir(root).join(feat_id)
}

pub fn feat_branch(feat_id: &str) -> String {
    format!("feat/{feat_id}")
}

// ---------------------------------------------------------------------------
// Id validation
// ---------------------------------------------------------------------------

static SLUG_RE: OnceLock<Regex> = OnceLock::new();
static FEAT_ID_RE: OnceLock<Regex> = OnceLock::new();
static TASK_ID_RE: OnceLock<Regex> = OnceLock::new();

fn slug_re() -> &'static Regex {
    SLUG_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9\-]*[a-z0-9]$|^[a-z0-9]$").unwrap())
}

fn feat_id_re() -> &'static Regex {
    FEAT_ID_RE.get_or_init(|| Regex::new(r"^F-[a-z0-9][a-z0-9-]*-\d{3}$").unwrap())
}

fn task_id_re() -> &'static Regex {
    TASK_ID_RE.get_or_init(|| Regex::new(r"^T-\d{3}$").unwrap())
}

pub fn validate_slug(slug: &str) -> Result<()> {
    if slug.is_empty() || slug.len() > 64 || !slug_re().is_match(slug) {
        return Err(HarnessError::InvalidSlug(slug.to_string()));
    }
    Ok(())
}

pub fn validate_feat_id(feat_id: &str) -> Result<()> {
    if !feat_id_re().is_match(feat_id) {
        return Err(HarnessError::InvalidFeatId(feat_id.to_string()));
    }
    Ok(())
}

pub fn validate_task_id(task_id: &str) -> Result<()> {
    if !task_id_re().is_match(task_id) {
        return Err(HarnessError::InvalidTaskId(task_id.to_string()));
    }
    Ok(())
}

/// Normalize free text into a slug: lowercase, runs of non-alphanumerics
/// collapsed to single hyphens, leading/trailing hyphens stripped.
pub fn slugify(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut last_dash = true;
    for c in value.trim().to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    let out = out.trim_end_matches('-').to_string();
    if out.is_empty() {
        return Err(HarnessError::InvalidSlug(value.to_string()));
    }
    Ok(out)
}

/// Format a feat id from its slug and per-slug counter.
pub fn format_feat_id(slug: &str, counter: u32) -> String {
    format!("F-{slug}-{counter:03}")
}

/// Split a feat id into (slug, counter). Requires a valid id.
pub fn split_feat_id(feat_id: &str) -> Result<(&str, u32)> {
    validate_feat_id(feat_id)?;
    let body = &feat_id[2..];
    let (slug, counter) = body
        .rsplit_once('-')
        .ok_or_else(|| HarnessError::InvalidFeatId(feat_id.to_string()))?;
    let n: u32 = counter
        .parse()
        .map_err(|_| HarnessError::InvalidFeatId(feat_id.to_string()))?;
    Ok((slug, n))
}

pub fn format_task_id(counter: u32) -> String {
    format!("T-{counter:03}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
