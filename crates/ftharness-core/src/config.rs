use crate::error::Result;
use crate::types::ProjectType;
use crate::{paths, store};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// NonUiMode
// ---------------------------------------------------------------------------

/// Pass rule for non-UI gate commands. `Any` keeps the historical contract:
/// at least one command must exit 0. `All` requires every command to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NonUiMode {
    #[default]
    Any,
    All,
}

// ---------------------------------------------------------------------------
// ProjectTypeSetting / rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectTypeSetting {
    Ui,
    NonUi,
    #[default]
    Auto,
}

/// Predicate set over repository contents. A set matches when any of
/// `any_path_exists` exists, or all of a non-empty `all_paths_exist` exist.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuleSet {
    #[serde(default)]
    pub any_path_exists: Vec<String>,
    #[serde(default)]
    pub all_paths_exist: Vec<String>,
}

impl RuleSet {
    pub fn matches(&self, root: &Path) -> bool {
        if self
            .any_path_exists
            .iter()
            .any(|rel| root.join(rel).exists())
        {
            return true;
        }
        !self.all_paths_exist.is_empty()
            && self
                .all_paths_exist
                .iter()
                .all(|rel| root.join(rel).exists())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProjectTypeRules {
    #[serde(default)]
    pub ui: RuleSet,
    #[serde(default)]
    pub non_ui: RuleSet,
    #[serde(default = "default_rule_type")]
    pub default: ProjectType,
}

fn default_rule_type() -> ProjectType {
    ProjectType::NonUi
}

// ---------------------------------------------------------------------------
// GateConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default)]
    pub project_type: ProjectTypeSetting,
    #[serde(default)]
    pub project_type_rules: Option<ProjectTypeRules>,
    /// Evidence file required for UI gates, relative to the task gate dir.
    #[serde(default = "default_ui_evidence")]
    pub ui_evidence_path: String,
    #[serde(default)]
    pub non_ui_commands: Vec<String>,
    /// Extra commands run for UI projects. Recorded as evidence but never
    /// fail the gate.
    #[serde(default)]
    pub ui_commands: Vec<String>,
    #[serde(default)]
    pub non_ui_mode: NonUiMode,
    /// Wall-clock deadline per gate command, in seconds. None = no deadline.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

fn default_ui_evidence() -> String {
    "ui-verification.md".to_string()
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            project_type: ProjectTypeSetting::default(),
            project_type_rules: None,
            ui_evidence_path: default_ui_evidence(),
            non_ui_commands: Vec::new(),
            ui_commands: Vec::new(),
            non_ui_mode: NonUiMode::default(),
            timeout_seconds: None,
        }
    }
}

// ---------------------------------------------------------------------------
// ArchiveConfig / DoctorThresholds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default = "default_true")]
    pub require_merged: bool,
    #[serde(default = "default_true")]
    pub require_clean: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            require_merged: true,
            require_clean: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorThresholds {
    #[serde(default = "default_gate_fail_streak")]
    pub gate_fail_streak: u32,
    #[serde(default = "default_no_progress_rounds")]
    pub no_progress_rounds: u32,
    #[serde(default = "default_max_round_count")]
    pub max_round_count: u32,
}

fn default_gate_fail_streak() -> u32 {
    3
}

fn default_no_progress_rounds() -> u32 {
    2
}

fn default_max_round_count() -> u32 {
    8
}

impl Default for DoctorThresholds {
    fn default() -> Self {
        Self {
            gate_fail_streak: default_gate_fail_streak(),
            no_progress_rounds: default_no_progress_rounds(),
            max_round_count: default_max_round_count(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Integration branch override. None = detect `main`/`master`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_branch: Option<String>,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub doctor_thresholds: DoctorThresholds,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Config {
    /// Load the harness config; absent file means all defaults.
    pub fn load(root: &Path) -> Result<Self> {
        match store::load(&paths::config_path(root)) {
            Ok(cfg) => Ok(cfg),
            Err(crate::error::HarnessError::NotFound(_)) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        store::save(&paths::config_path(root), self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
