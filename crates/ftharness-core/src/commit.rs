//! Commit-message protocol: generation, single-pass parsing, validation.
//!
//! The message shape is fixed: a `feat(<feat-id>): task(<task-id>)` subject,
//! `Plan:` / `Check:` / `Learn:` sections in order, and a final trailer
//! paragraph whose required keys appear in a fixed order. Parsing is
//! line-anchored; unknown trailers are preserved so forward-compatible keys
//! survive a parse/validate round trip.

use crate::error::{HarnessError, Result};
use crate::feat::FeatState;
use crate::task::Task;
use crate::types::{GateStatus, TaskStatus};
use regex::Regex;
use std::sync::OnceLock;

static SUBJECT_RE: OnceLock<Regex> = OnceLock::new();
static TRAILER_RE: OnceLock<Regex> = OnceLock::new();

fn subject_re() -> &'static Regex {
    SUBJECT_RE.get_or_init(|| {
        Regex::new(r"^feat\((F-[a-z0-9-]+)\): task\((T-\d{3})\) (.+)$").unwrap()
    })
}

fn trailer_re() -> &'static Regex {
    TRAILER_RE.get_or_init(|| Regex::new(r"^([A-Za-z0-9-]+): (.*)$").unwrap())
}

const REQUIRED_TRAILERS: [&str; 4] = ["Feat-ID", "Task-ID", "Gate-Result", "Task-Status"];

// ---------------------------------------------------------------------------
// ParsedCommit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCommit {
    pub feat_id: String,
    pub task_id: String,
    pub summary: String,
    pub plan: String,
    pub check: String,
    pub learn: String,
    /// Final-paragraph trailers in file order, unknown keys included.
    pub trailers: Vec<(String, String)>,
}

impl ParsedCommit {
    pub fn trailer(&self, key: &str) -> Option<&str> {
        self.trailers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn gate_result(&self) -> Option<GateStatus> {
        match self.trailer("Gate-Result")? {
            "pass" => Some(GateStatus::Pass),
            "fail" => Some(GateStatus::Fail),
            _ => None,
        }
    }

    pub fn task_status(&self) -> Option<TaskStatus> {
        match self.trailer("Task-Status")? {
            "done" => Some(TaskStatus::Done),
            "blocked" => Some(TaskStatus::Blocked),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Render the full commit message for a task. Deterministic over its inputs:
/// two calls with unchanged state and tasks produce identical bytes.
pub fn build_message(
    state: &FeatState,
    task: &Task,
    summary: &str,
    task_status: TaskStatus,
    gate_result: GateStatus,
) -> String {
    let mut check_lines = Vec::new();
    if task.gate_evidence.is_empty() {
        check_lines.push("- No gate command records found".to_string());
    } else {
        for rec in &task.gate_evidence {
            let verdict = if rec.passed() { "PASS" } else { "FAIL" };
            check_lines.push(format!("- `{}` => {verdict} ({})", rec.command, rec.exit_code));
        }
    }

    let mut lines = vec![
        format!("feat({}): task({}) {summary}", state.feat_id, task.id),
        String::new(),
        "Plan:".to_string(),
        format!("- Feat Goal: {}", state.goal),
        format!("- Task: {}", task.title),
        String::new(),
        "Check:".to_string(),
    ];
    lines.extend(check_lines);
    lines.extend([
        String::new(),
        "Learn:".to_string(),
        "- Record durable learnings, risks, or follow-up notes here.".to_string(),
        String::new(),
        format!("Feat-ID: {}", state.feat_id),
        format!("Task-ID: {}", task.id),
        format!("Gate-Result: {gate_result}"),
        format!("Task-Status: {task_status}"),
        String::new(),
    ]);
    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Single-pass, line-anchored parse of a commit message. Structural failures
/// are `InvalidCommit` naming what is missing.
pub fn parse(text: &str) -> Result<ParsedCommit> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return Err(HarnessError::InvalidCommit("empty commit message".into()));
    }

    let caps = subject_re()
        .captures(lines[0])
        .ok_or_else(|| HarnessError::InvalidCommit(format!("invalid subject: {}", lines[0])))?;
    let feat_id = caps[1].to_string();
    let task_id = caps[2].to_string();
    let summary = caps[3].to_string();

    // Body sections: each header on its own line, in order, each followed by
    // non-empty content before the next header.
    let mut idx = 1;
    let mut sections = [String::new(), String::new(), String::new()];
    for (si, header) in ["Plan:", "Check:", "Learn:"].iter().enumerate() {
        while idx < lines.len() && lines[idx].trim().is_empty() {
            idx += 1;
        }
        if idx >= lines.len() || lines[idx] != *header {
            return Err(HarnessError::InvalidCommit(format!(
                "missing section: {header}"
            )));
        }
        idx += 1;
        let start = idx;
        while idx < lines.len() && lines[idx].trim() != "" {
            idx += 1;
        }
        let content = lines[start..idx].join("\n");
        if content.trim().is_empty() {
            return Err(HarnessError::InvalidCommit(format!(
                "empty section: {header}"
            )));
        }
        sections[si] = content;
    }

    // Trailers: the final non-empty paragraph.
    let trailing: Vec<&str> = lines[idx..]
        .iter()
        .copied()
        .filter(|l| !l.trim().is_empty())
        .collect();
    if trailing.is_empty() {
        return Err(HarnessError::InvalidCommit("missing trailers".into()));
    }
    let mut trailers = Vec::new();
    for line in trailing {
        let caps = trailer_re().captures(line).ok_or_else(|| {
            HarnessError::InvalidCommit(format!("malformed trailer line: {line}"))
        })?;
        trailers.push((caps[1].to_string(), caps[2].to_string()));
    }

    let [plan, check, learn] = sections;
    Ok(ParsedCommit {
        feat_id,
        task_id,
        summary,
        plan,
        check,
        learn,
        trailers,
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Structural validation beyond what [`parse`] enforces: required trailers
/// present in fixed order, values in their enums, subject/trailer agreement,
/// and the cross-field rule `Task-Status: done ⇒ Gate-Result: pass`.
pub fn validate(parsed: &ParsedCommit) -> Result<()> {
    let required_seen: Vec<&str> = parsed
        .trailers
        .iter()
        .map(|(k, _)| k.as_str())
        .filter(|k| REQUIRED_TRAILERS.contains(k))
        .collect();
    if required_seen != REQUIRED_TRAILERS {
        return Err(HarnessError::InvalidCommit(format!(
            "required trailers must appear in order {REQUIRED_TRAILERS:?}, found {required_seen:?}"
        )));
    }

    if parsed.trailer("Feat-ID") != Some(parsed.feat_id.as_str()) {
        return Err(HarnessError::InvalidCommit(
            "subject feat-id does not match Feat-ID trailer".into(),
        ));
    }
    if parsed.trailer("Task-ID") != Some(parsed.task_id.as_str()) {
        return Err(HarnessError::InvalidCommit(
            "subject task-id does not match Task-ID trailer".into(),
        ));
    }

    let gate = parsed.gate_result().ok_or_else(|| {
        HarnessError::InvalidCommit("Gate-Result must be 'pass' or 'fail'".into())
    })?;
    let status = parsed.task_status().ok_or_else(|| {
        HarnessError::InvalidCommit("Task-Status must be 'done' or 'blocked'".into())
    })?;

    if status == TaskStatus::Done && gate != GateStatus::Pass {
        return Err(HarnessError::InvalidCommit(
            "Task-Status: done requires Gate-Result: pass".into(),
        ));
    }
    Ok(())
}

/// Check a parsed HEAD commit against the task being finished.
pub fn match_trailers(parsed: &ParsedCommit, feat_id: &str, task_id: &str) -> Result<()> {
    let found_feat = parsed.trailer("Feat-ID").unwrap_or("");
    let found_task = parsed.trailer("Task-ID").unwrap_or("");
    if found_feat != feat_id || found_task != task_id {
        return Err(HarnessError::TrailerMismatch {
            expected: format!("({feat_id}, {task_id})"),
            found: format!("({found_feat}, {found_task})"),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
