use crate::error::{HarnessError, Result};
use crate::gate::EvidenceRecord;
use crate::store::utc_now;
use crate::types::{GateStatus, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub gate_result: GateStatus,
    #[serde(default)]
    pub gate_evidence: Vec<EvidenceRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: TaskStatus::Planned,
            gate_result: GateStatus::Unknown,
            gate_evidence: Vec::new(),
            commit_sha: None,
            started_at: None,
            finished_at: None,
            updated_at: utc_now(),
            notes: Vec::new(),
            extra: Default::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// TasksDoc
// ---------------------------------------------------------------------------

/// The `tasks.json` document for one feat. JSON is the source of truth;
/// `tasks.md` is a rendered view regenerated on save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksDoc {
    pub version: u32,
    pub feat_id: String,
    pub updated_at: DateTime<Utc>,
    pub tasks: Vec<Task>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TasksDoc {
    pub fn new(feat_id: impl Into<String>) -> Self {
        Self {
            version: 1,
            feat_id: feat_id.into(),
            updated_at: utc_now(),
            tasks: Vec::new(),
            extra: Default::default(),
        }
    }

    pub fn find(&self, task_id: &str) -> Result<&Task> {
        self.tasks
            .iter()
            .find(|t| t.id == task_id)
            .ok_or_else(|| HarnessError::TaskNotFound(task_id.to_string()))
    }

    pub fn find_mut(&mut self, task_id: &str) -> Result<&mut Task> {
        self.tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| HarnessError::TaskNotFound(task_id.to_string()))
    }

    pub fn in_progress(&self) -> Option<&Task> {
        self.tasks
            .iter()
            .find(|t| t.status == TaskStatus::InProgress)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    pub fn all_terminal(&self) -> bool {
        !self.tasks.is_empty() && self.tasks.iter().all(|t| t.status.is_terminal())
    }

    pub fn all_done(&self) -> bool {
        !self.tasks.is_empty() && self.tasks.iter().all(|t| t.status == TaskStatus::Done)
    }

    /// Mint the next task id by scanning for the maximum `T-NNN`.
    pub fn next_task_id(&self) -> String {
        let max = self
            .tasks
            .iter()
            .filter_map(|t| t.id.strip_prefix("T-"))
            .filter_map(|n| n.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        crate::paths::format_task_id(max + 1)
    }

    /// Append a new planned task; returns its id.
    pub fn add_task(&mut self, title: impl Into<String>) -> String {
        let id = self.next_task_id();
        self.tasks.push(Task::new(id.clone(), title));
        self.updated_at = utc_now();
        id
    }

    /// Checklist mirror written next to `tasks.json`.
    pub fn render_markdown(&self) -> String {
        let mut rows = vec![
            format!("# Feat Tasks: {}", self.feat_id),
            String::new(),
            "JSON SSOT: `tasks.json`".to_string(),
            String::new(),
            "## Task Checklist".to_string(),
        ];
        for task in &self.tasks {
            let checked = if task.status == TaskStatus::Done {
                "x"
            } else {
                " "
            };
            rows.push(format!("- [{checked}] {} {}", task.id, task.title));
        }
        rows.push(String::new());
        rows.push("## Status Legend".to_string());
        for s in ["planned", "in_progress", "done", "blocked"] {
            rows.push(format!("- {s}"));
        }
        rows.push(String::new());
        rows.join("\n")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
