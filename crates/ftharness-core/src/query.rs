//! Read-only queries over the registry: list, get, filter.

use crate::error::Result;
use crate::feat::FeatState;
use crate::index;
use crate::types::{FeatStatus, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStats {
    pub planned: usize,
    pub in_progress: usize,
    pub done: usize,
    pub blocked: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatSummary {
    pub feat_id: String,
    pub title: String,
    pub status: FeatStatus,
    pub branch: String,
    pub worktree_path: String,
    pub updated_at: DateTime<Utc>,
    pub task_stats: TaskStats,
}

/// Summaries for every indexed (i.e. non-archived) feat, in index order.
pub fn list(root: &Path) -> Result<Vec<FeatSummary>> {
    let idx = index::load(root)?;
    let mut out = Vec::new();
    for entry in &idx.feats {
        // Entries whose backing files were tampered with are skipped here;
        // the doctor reports them.
        let Ok((state, _)) = FeatState::load(root, &entry.feat_id) else {
            continue;
        };
        let Ok((tasks, _)) = crate::feat::load_tasks(root, &entry.feat_id) else {
            continue;
        };
        out.push(FeatSummary {
            feat_id: state.feat_id.clone(),
            title: state.title.clone(),
            status: state.status,
            branch: state.branch.clone(),
            worktree_path: state.worktree_path.clone(),
            updated_at: state.updated_at,
            task_stats: TaskStats {
                planned: tasks.count(TaskStatus::Planned),
                in_progress: tasks.count(TaskStatus::InProgress),
                done: tasks.count(TaskStatus::Done),
                blocked: tasks.count(TaskStatus::Blocked),
            },
        });
    }
    Ok(out)
}

/// Full state + tasks documents for one feat (archived included).
pub fn get(root: &Path, feat_id: &str) -> Result<serde_json::Value> {
    let (state, _) = FeatState::load(root, feat_id)?;
    let (tasks, _) = crate::feat::load_tasks(root, feat_id)?;
    Ok(serde_json::json!({ "state": state, "tasks": tasks }))
}

/// Filter summaries by feat status, by having at least one task in a given
/// status, and by a case-insensitive needle over id/title/branch.
pub fn filter(
    root: &Path,
    status: Option<FeatStatus>,
    task_status: Option<TaskStatus>,
    contains: Option<&str>,
) -> Result<Vec<FeatSummary>> {
    let needle = contains.map(|c| c.to_lowercase());
    let items = list(root)?;
    Ok(items
        .into_iter()
        .filter(|item| status.map(|s| item.status == s).unwrap_or(true))
        .filter(|item| {
            task_status
                .map(|ts| match ts {
                    TaskStatus::Planned => item.task_stats.planned > 0,
                    TaskStatus::InProgress => item.task_stats.in_progress > 0,
                    TaskStatus::Done => item.task_stats.done > 0,
                    TaskStatus::Blocked => item.task_stats.blocked > 0,
                })
                .unwrap_or(true)
        })
        .filter(|item| {
            needle
                .as_ref()
                .map(|n| {
                    format!("{} {} {}", item.feat_id, item.title, item.branch)
                        .to_lowercase()
                        .contains(n)
                })
                .unwrap_or(true)
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
