use crate::error::{HarnessError, Result};
use crate::store::utc_now;
use crate::task::TasksDoc;
use crate::types::{FeatStatus, GateStatus, TaskStatus};
use crate::{paths, store};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Sub-documents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Counters {
    #[serde(default)]
    pub gate_fail_streak: u32,
    #[serde(default)]
    pub no_progress_rounds: u32,
    #[serde(default)]
    pub round_count: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<GateStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_log_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub at: DateTime<Utc>,
    pub action: String,
    pub detail: String,
}

/// What the archive finalizer actually managed to clean up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveCleanup {
    pub base_branch: String,
    pub branch_merged: bool,
    pub worktree_removed: bool,
    pub branch_deleted: bool,
    pub note: String,
}

// ---------------------------------------------------------------------------
// FeatState
// ---------------------------------------------------------------------------

/// The `state.json` document for one feat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatState {
    pub version: u32,
    pub feat_id: String,
    pub title: String,
    pub slug: String,
    pub goal: String,
    pub status: FeatStatus,
    pub base_branch: String,
    pub branch: String,
    /// Relative to the repository root.
    pub worktree_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_from_status: Option<FeatStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<String>,
    #[serde(default)]
    pub counters: Counters,
    #[serde(default)]
    pub gate: GateSummary,
    #[serde(default)]
    pub history: Vec<HistoryEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_cleanup: Option<ArchiveCleanup>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl FeatState {
    pub fn new(
        feat_id: impl Into<String>,
        title: impl Into<String>,
        slug: impl Into<String>,
        goal: impl Into<String>,
        base_branch: impl Into<String>,
    ) -> Self {
        let feat_id = feat_id.into();
        let base_branch = base_branch.into();
        let now = utc_now();
        Self {
            version: 1,
            branch: paths::feat_branch(&feat_id),
            worktree_path: format!("{}/{}", paths::WORKTREES_DIR, feat_id),
            feat_id,
            title: title.into(),
            slug: slug.into(),
            goal: goal.into(),
            status: FeatStatus::Draft,
            base_branch,
            created_at: now,
            updated_at: now,
            archived_at: None,
            closed_from_status: None,
            current_task_id: None,
            counters: Counters::default(),
            gate: GateSummary::default(),
            history: vec![HistoryEvent {
                at: now,
                action: "feat_created".to_string(),
                detail: String::new(),
            }],
            archived_cleanup: None,
            extra: Default::default(),
        }
    }

    /// Append a history event and bump `updated_at`.
    pub fn record(&mut self, action: impl Into<String>, detail: impl Into<String>) {
        let now = utc_now();
        self.history.push(HistoryEvent {
            at: now,
            action: action.into(),
            detail: detail.into(),
        });
        self.updated_at = now;
    }

    /// Feat status derived from its tasks (archive metadata aside): a feat
    /// is `done` exactly when every task is done, `active` once any task has
    /// been started, `draft` before that. `abandoned` and `archived` are
    /// operator/finalizer states and never derived.
    pub fn derive_status(&self, tasks: &TasksDoc) -> FeatStatus {
        match self.status {
            FeatStatus::Abandoned | FeatStatus::Archived => self.status,
            _ => {
                if tasks.all_done() {
                    FeatStatus::Done
                } else if tasks
                    .tasks
                    .iter()
                    .any(|t| t.status != TaskStatus::Planned)
                {
                    FeatStatus::Active
                } else {
                    FeatStatus::Draft
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Whether this feat's state lives under `feats-archived/`.
    pub fn is_archived_location(root: &Path, feat_id: &str) -> Result<bool> {
        if paths::feat_state(root, feat_id, false).exists() {
            Ok(false)
        } else if paths::feat_state(root, feat_id, true).exists() {
            Ok(true)
        } else {
            Err(HarnessError::FeatNotFound(feat_id.to_string()))
        }
    }

    pub fn load(root: &Path, feat_id: &str) -> Result<(Self, bool)> {
        let archived = Self::is_archived_location(root, feat_id)?;
        let state: FeatState = store::load(&paths::feat_state(root, feat_id, archived))?;
        if state.feat_id != feat_id {
            return Err(HarnessError::Corrupt {
                path: paths::feat_state(root, feat_id, archived),
                reason: format!("state feat_id mismatch: {}", state.feat_id),
            });
        }
        Ok((state, archived))
    }

    pub fn save(&self, root: &Path, archived: bool) -> Result<()> {
        store::save(&paths::feat_state(root, &self.feat_id, archived), self)
    }
}

// ---------------------------------------------------------------------------
// Tasks persistence (same directory as the state file)
// ---------------------------------------------------------------------------

pub fn load_tasks(root: &Path, feat_id: &str) -> Result<(TasksDoc, bool)> {
    let archived = FeatState::is_archived_location(root, feat_id)?;
    let doc: TasksDoc = store::load(&paths::feat_tasks(root, feat_id, archived))?;
    Ok((doc, archived))
}

/// Persist `tasks.json` and regenerate the `tasks.md` mirror next to it.
/// `updated_at` advances on every write.
pub fn save_tasks(root: &Path, doc: &mut TasksDoc, archived: bool) -> Result<()> {
    doc.updated_at = utc_now();
    store::save(&paths::feat_tasks(root, &doc.feat_id, archived), doc)?;
    let md = paths::feat_dir(root, &doc.feat_id, archived).join("tasks.md");
    store::write_bytes(&md, doc.render_markdown().as_bytes())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> FeatState {
        FeatState::new("F-demo-001", "Demo", "demo", "Validate full loop", "main")
    }

    #[test]
    fn new_fills_branch_and_worktree() {
        let state = sample();
        assert_eq!(state.branch, "feat/F-demo-001");
        assert_eq!(state.worktree_path, ".worktrees/F-demo-001");
        assert_eq!(state.status, FeatStatus::Draft);
        assert_eq!(state.history.len(), 1);
    }

    #[test]
    fn save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let state = sample();
        state.save(dir.path(), false).unwrap();

        let (loaded, archived) = FeatState::load(dir.path(), "F-demo-001").unwrap();
        assert!(!archived);
        assert_eq!(loaded.title, "Demo");
        assert_eq!(loaded.base_branch, "main");
    }

    #[test]
    fn load_missing_is_feat_not_found() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            FeatState::load(dir.path(), "F-demo-001"),
            Err(HarnessError::FeatNotFound(_))
        ));
    }

    #[test]
    fn load_detects_id_mismatch() {
        let dir = TempDir::new().unwrap();
        let mut state = sample();
        state.feat_id = "F-other-001".to_string();
        store::save(&paths::feat_state(dir.path(), "F-demo-001", false), &state).unwrap();
        assert!(matches!(
            FeatState::load(dir.path(), "F-demo-001"),
            Err(HarnessError::Corrupt { .. })
        ));
    }

    #[test]
    fn archived_location_wins_when_active_gone() {
        let dir = TempDir::new().unwrap();
        let mut state = sample();
        state.status = FeatStatus::Archived;
        state.save(dir.path(), true).unwrap();

        let (loaded, archived) = FeatState::load(dir.path(), "F-demo-001").unwrap();
        assert!(archived);
        assert_eq!(loaded.status, FeatStatus::Archived);
    }

    #[test]
    fn derive_status_follows_tasks() {
        let state = sample();
        let mut tasks = TasksDoc::new("F-demo-001");
        tasks.add_task("a");
        tasks.add_task("b");
        assert_eq!(state.derive_status(&tasks), FeatStatus::Draft);

        tasks.find_mut("T-001").unwrap().status = TaskStatus::InProgress;
        assert_eq!(state.derive_status(&tasks), FeatStatus::Active);

        tasks.find_mut("T-001").unwrap().status = TaskStatus::Done;
        tasks.find_mut("T-002").unwrap().status = TaskStatus::Blocked;
        assert_eq!(state.derive_status(&tasks), FeatStatus::Active);

        tasks.find_mut("T-002").unwrap().status = TaskStatus::Done;
        assert_eq!(state.derive_status(&tasks), FeatStatus::Done);
    }

    #[test]
    fn derive_status_keeps_operator_states() {
        let mut state = sample();
        state.status = FeatStatus::Abandoned;
        let tasks = TasksDoc::new("F-demo-001");
        assert_eq!(state.derive_status(&tasks), FeatStatus::Abandoned);
    }

    #[test]
    fn save_tasks_writes_markdown_mirror() {
        let dir = TempDir::new().unwrap();
        let state = sample();
        state.save(dir.path(), false).unwrap();

        let mut tasks = TasksDoc::new("F-demo-001");
        tasks.add_task("write tests");
        save_tasks(dir.path(), &mut tasks, false).unwrap();

        let md = std::fs::read_to_string(
            paths::feat_dir(dir.path(), "F-demo-001", false).join("tasks.md"),
        )
        .unwrap();
        assert!(md.contains("- [ ] T-001 write tests"));

        let (loaded, _) = load_tasks(dir.path(), "F-demo-001").unwrap();
        assert_eq!(loaded.tasks.len(), 1);
    }

    #[test]
    fn record_appends_history() {
        let mut state = sample();
        state.record("task_started", "T-001");
        assert_eq!(state.history.len(), 2);
        assert_eq!(state.history[1].action, "task_started");
    }
}
