use crate::output::print_json;
use anyhow::Context;
use ftharness_core::query;
use ftharness_core::types::{FeatStatus, TaskStatus};
use std::path::Path;
use std::str::FromStr;

pub fn list(root: &Path) -> anyhow::Result<()> {
    print_json(&serde_json::json!({ "feats": query::list(root)? }))
}

pub fn get(root: &Path, feat_id: &str) -> anyhow::Result<()> {
    print_json(&query::get(root, feat_id)?)
}

pub fn filter(
    root: &Path,
    status: Option<&str>,
    task_status: Option<&str>,
    contains: Option<&str>,
) -> anyhow::Result<()> {
    let status = status
        .map(FeatStatus::from_str)
        .transpose()
        .context("invalid --status value")?;
    let task_status = task_status
        .map(TaskStatus::from_str)
        .transpose()
        .context("invalid --task-status value")?;
    print_json(&serde_json::json!({
        "feats": query::filter(root, status, task_status, contains)?
    }))
}
