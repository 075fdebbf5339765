//! Quality-gate runner: project-type detection, gate command execution, and
//! evidence capture.
//!
//! The runner itself persists nothing — it returns a [`GateOutcome`] that the
//! lifecycle engine records into the feat's SSOT files. Command stdout goes
//! straight to per-command log files under the task's gate directory, so
//! evidence survives regardless of how the transition ends.

use crate::config::{Config, GateConfig, NonUiMode, ProjectTypeSetting};
use crate::error::Result;
use crate::store::utc_now;
use crate::types::{GateStatus, ProjectType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// EvidenceRecord / GateOutcome
// ---------------------------------------------------------------------------

/// One executed gate command. Re-runs append new records; history is never
/// overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub command: String,
    /// Exit code, or the terminating signal number when the child was
    /// signal-terminated (deadline or external kill).
    pub exit_code: i32,
    pub stdout_path: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl EvidenceRecord {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub result: GateStatus,
    pub project_type: ProjectType,
    pub records: Vec<EvidenceRecord>,
    pub reasons: Vec<String>,
    pub log_path: PathBuf,
}

// ---------------------------------------------------------------------------
// Project-type detection
// ---------------------------------------------------------------------------

/// Explicit config wins; then rule-driven detection; then `non_ui`.
pub fn detect_project_type(root: &Path, gate: &GateConfig) -> ProjectType {
    match gate.project_type {
        ProjectTypeSetting::Ui => return ProjectType::Ui,
        ProjectTypeSetting::NonUi => return ProjectType::NonUi,
        ProjectTypeSetting::Auto => {}
    }
    if let Some(rules) = &gate.project_type_rules {
        if rules.ui.matches(root) {
            return ProjectType::Ui;
        }
        if rules.non_ui.matches(root) {
            return ProjectType::NonUi;
        }
        return rules.default;
    }
    ProjectType::NonUi
}

/// Probe the repository for a usable test command when none is configured.
pub fn auto_non_ui_commands(root: &Path) -> Vec<String> {
    let mut commands = Vec::new();
    let has = |rel: &str| root.join(rel).exists();

    if (has("pyproject.toml") || has("requirements.txt") || has("pytest.ini"))
        && which::which("pytest").is_ok()
    {
        commands.push("pytest -q".to_string());
    }
    if has("go.mod") && which::which("go").is_ok() {
        commands.push("go test ./...".to_string());
    }
    if has("Cargo.toml") && which::which("cargo").is_ok() {
        commands.push("cargo test -q".to_string());
    }
    if has("package.json") && which::which("npm").is_ok() {
        let scripts_test = std::fs::read_to_string(root.join("package.json"))
            .ok()
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok())
            .map(|v| v.get("scripts").and_then(|s| s.get("test")).is_some())
            .unwrap_or(false);
        if scripts_test {
            commands.push("npm test --silent".to_string());
        }
    }
    commands
}

// ---------------------------------------------------------------------------
// UI evidence
// ---------------------------------------------------------------------------

const UI_REQUIRED_HEADINGS: [&str; 3] = ["## Critical Paths", "## Screenshots", "## Console Errors"];

pub fn validate_ui_evidence(evidence_file: &Path) -> Vec<String> {
    let text = match std::fs::read_to_string(evidence_file) {
        Ok(t) => t,
        Err(_) => {
            return vec![format!(
                "missing UI verification file: {}",
                evidence_file.display()
            )]
        }
    };
    let mut errors = Vec::new();
    if text.trim().is_empty() {
        errors.push(format!("empty UI verification file: {}", evidence_file.display()));
        return errors;
    }
    for heading in UI_REQUIRED_HEADINGS {
        if !text.contains(heading) {
            errors.push(format!("missing heading in UI evidence: {heading}"));
        }
    }
    if !text.to_lowercase().contains("console errors: none") {
        errors.push("UI evidence must declare 'Console Errors: none'".to_string());
    }
    errors
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Execute the gate for one task.
///
/// `workdir` is the feat's checkout (commands run there); `gate_dir` is the
/// task's evidence directory under the feat state dir.
pub fn run_gate(
    root: &Path,
    workdir: &Path,
    gate_dir: &Path,
    cfg: &Config,
) -> Result<GateOutcome> {
    std::fs::create_dir_all(gate_dir)?;
    let project_type = detect_project_type(root, &cfg.gate);
    let timeout = cfg.gate.timeout_seconds.map(Duration::from_secs);

    let mut records = Vec::new();
    let mut reasons = Vec::new();

    let result = match project_type {
        ProjectType::Ui => {
            let evidence = gate_dir.join(&cfg.gate.ui_evidence_path);
            let ui_errors = validate_ui_evidence(&evidence);
            let failed = !ui_errors.is_empty();
            reasons.extend(ui_errors);
            // Extra UI commands are informational: recorded, never failing.
            for (i, command) in cfg.gate.ui_commands.iter().enumerate() {
                records.push(run_command(command, workdir, gate_dir, i, timeout)?);
            }
            if failed {
                GateStatus::Fail
            } else {
                GateStatus::Pass
            }
        }
        ProjectType::NonUi => {
            let commands = if cfg.gate.non_ui_commands.is_empty() {
                auto_non_ui_commands(workdir)
            } else {
                cfg.gate.non_ui_commands.clone()
            };
            if commands.is_empty() {
                reasons.push(
                    "no non-ui gate command available; set gate.non_ui_commands in config.json"
                        .to_string(),
                );
                GateStatus::Fail
            } else {
                for (i, command) in commands.iter().enumerate() {
                    let record = run_command(command, workdir, gate_dir, i, timeout)?;
                    if !record.passed() {
                        reasons.push(format!(
                            "command failed ({}): {command}",
                            record.exit_code
                        ));
                    }
                    records.push(record);
                }
                let pass = match cfg.gate.non_ui_mode {
                    NonUiMode::Any => records.iter().any(EvidenceRecord::passed),
                    NonUiMode::All => records.iter().all(EvidenceRecord::passed),
                };
                if pass {
                    GateStatus::Pass
                } else {
                    GateStatus::Fail
                }
            }
        }
    };

    let log_path = write_gate_log(gate_dir, project_type, result, &records, &reasons)?;
    Ok(GateOutcome {
        result,
        project_type,
        records,
        reasons,
        log_path,
    })
}

fn run_command(
    command: &str,
    workdir: &Path,
    gate_dir: &Path,
    ordinal: usize,
    timeout: Option<Duration>,
) -> Result<EvidenceRecord> {
    let stdout_path = gate_dir.join(format!("cmd-{:02}.log", ordinal + 1));
    let out_file = std::fs::File::create(&stdout_path)?;
    let err_file = out_file.try_clone()?;

    let started_at = utc_now();
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(out_file))
        .stderr(Stdio::from(err_file))
        .spawn()?;

    let status = match timeout {
        None => child.wait()?,
        Some(limit) => {
            let deadline = Instant::now() + limit;
            loop {
                if let Some(status) = child.try_wait()? {
                    break status;
                }
                if Instant::now() >= deadline {
                    child.kill()?;
                    break child.wait()?;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    };
    let finished_at = utc_now();

    Ok(EvidenceRecord {
        command: command.to_string(),
        exit_code: exit_code_of(status),
        stdout_path: stdout_path.to_string_lossy().into_owned(),
        started_at,
        finished_at,
    })
}

#[cfg(unix)]
fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal())
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

fn write_gate_log(
    gate_dir: &Path,
    project_type: ProjectType,
    result: GateStatus,
    records: &[EvidenceRecord],
    reasons: &[String],
) -> Result<PathBuf> {
    let ts = utc_now();
    let stamp = ts.format("%Y%m%dT%H%M%SZ");
    let log_path = gate_dir.join(format!("gate-{stamp}.log"));
    let mut lines = vec![
        format!("gate_time={}", ts.to_rfc3339()),
        format!("project_type={project_type}"),
        format!("result={result}"),
    ];
    if !reasons.is_empty() {
        lines.push("reasons:".to_string());
        for r in reasons {
            lines.push(format!("- {r}"));
        }
    }
    lines.push("commands:".to_string());
    for rec in records {
        let status = if rec.passed() { "pass" } else { "fail" };
        lines.push(format!(
            "- {} => {status} ({})",
            rec.command, rec.exit_code
        ));
    }
    let mut body = lines.join("\n");
    body.push('\n');
    crate::store::write_bytes(&log_path, body.as_bytes())?;
    Ok(log_path)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
