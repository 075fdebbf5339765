//! Living-docs inbox sync: optional memory sink consulted when archiving.
//!
//! Detection is structural — a repo carries living docs when the guidebook,
//! taxonomy, and inbox all exist. Emission is best-effort: the archive
//! finalizer reports failures here but never fails on them.

use crate::error::Result;
use crate::feat::FeatState;
use crate::store::{self, utc_now};
use crate::task::TasksDoc;
use crate::types::TaskStatus;
use std::path::{Path, PathBuf};

pub fn detect_living_docs(root: &Path) -> bool {
    let docs = root.join("docs");
    docs.join("must-guidebook.md").exists()
        && docs.join("must-docs-taxonomy.md").exists()
        && docs.join(".bagakit").join("inbox").exists()
}

fn inbox_dir(root: &Path) -> PathBuf {
    root.join("docs").join(".bagakit").join("inbox")
}

/// Write the archive inbox notes for a feat. Returns the files written.
///
/// Always: a decision note and a howto-result note. Additionally a gotcha
/// note when the feat saw blocked tasks or a gate-fail streak.
pub fn sync_inbox(root: &Path, state: &FeatState, tasks: &TasksDoc) -> Result<Vec<PathBuf>> {
    let inbox = inbox_dir(root);
    std::fs::create_dir_all(&inbox)?;
    let now = utc_now().to_rfc3339();
    let feat_id = &state.feat_id;
    let mut written = Vec::new();

    let decision = inbox.join(format!("decision-{feat_id}.md"));
    store::write_bytes(
        &decision,
        format!(
            "# Decision: {feat_id}\n\nCreated: {now}\n\n- Title: {}\n- Goal: {}\n- Outcome: {}\n\nSummarize the durable decisions made while delivering this feat.\n",
            state.title, state.goal, state.status
        )
        .as_bytes(),
    )?;
    written.push(decision);

    let howto = inbox.join(format!("howto-{feat_id}-result.md"));
    store::write_bytes(
        &howto,
        format!(
            "# Howto Result: {feat_id}\n\nCreated: {now}\n\n- Tasks done: {}\n- Tasks blocked: {}\n\nDescribe how to reproduce or operate what this feat delivered.\n",
            tasks.count(TaskStatus::Done),
            tasks.count(TaskStatus::Blocked)
        )
        .as_bytes(),
    )?;
    written.push(howto);

    let had_trouble =
        tasks.count(TaskStatus::Blocked) > 0 || state.counters.gate_fail_streak > 0;
    if had_trouble {
        let gotcha = inbox.join(format!("gotcha-{feat_id}.md"));
        store::write_bytes(
            &gotcha,
            format!(
                "# Gotcha: {feat_id}\n\nCreated: {now}\n\n- Gate fail streak: {}\n- Blocked tasks: {}\n\nCapture what went wrong and how to avoid it next time.\n",
                state.counters.gate_fail_streak,
                tasks.count(TaskStatus::Blocked)
            )
            .as_bytes(),
        )?;
        written.push(gotcha);
    }

    Ok(written)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
