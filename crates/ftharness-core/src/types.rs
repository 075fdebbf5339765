use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// FeatStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatStatus {
    Draft,
    Active,
    Done,
    Abandoned,
    Archived,
}

impl FeatStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FeatStatus::Draft => "draft",
            FeatStatus::Active => "active",
            FeatStatus::Done => "done",
            FeatStatus::Abandoned => "abandoned",
            FeatStatus::Archived => "archived",
        }
    }

    /// Terminal pre-archive statuses: the only ones archive accepts.
    pub fn is_archivable(self) -> bool {
        matches!(self, FeatStatus::Done | FeatStatus::Abandoned)
    }
}

impl fmt::Display for FeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FeatStatus {
    type Err = crate::error::HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(FeatStatus::Draft),
            "active" => Ok(FeatStatus::Active),
            "done" => Ok(FeatStatus::Done),
            "abandoned" => Ok(FeatStatus::Abandoned),
            "archived" => Ok(FeatStatus::Archived),
            _ => Err(crate::error::HarnessError::InvalidTransition {
                from: s.to_string(),
                to: String::new(),
                reason: "unknown feat status".to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Planned,
    InProgress,
    Done,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Planned => "planned",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Blocked => "blocked",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Blocked)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = crate::error::HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planned" => Ok(TaskStatus::Planned),
            "in_progress" => Ok(TaskStatus::InProgress),
            "done" => Ok(TaskStatus::Done),
            "blocked" => Ok(TaskStatus::Blocked),
            _ => Err(crate::error::HarnessError::InvalidTransition {
                from: s.to_string(),
                to: String::new(),
                reason: "unknown task status".to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// GateStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Pass,
    Fail,
    #[default]
    Unknown,
}

impl GateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GateStatus::Pass => "pass",
            GateStatus::Fail => "fail",
            GateStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ProjectType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectType {
    Ui,
    #[default]
    NonUi,
}

impl ProjectType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectType::Ui => "ui",
            ProjectType::NonUi => "non_ui",
        }
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
