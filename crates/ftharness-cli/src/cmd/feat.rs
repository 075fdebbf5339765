use crate::output::{kv, print_json};
use anyhow::Context;
use ftharness_core::{archive, engine, feat::FeatState, query};
use std::path::Path;

pub fn create(
    root: &Path,
    title: &str,
    slug: Option<&str>,
    goal: &str,
    strict: bool,
    manifest: Option<&Path>,
    json: bool,
) -> anyhow::Result<()> {
    let created = engine::create_feat(root, title, slug, goal, strict, manifest)?;
    if json {
        print_json(&serde_json::json!({
            "feat_id": created.feat_id,
            "branch": created.branch,
            "worktree": created.worktree,
        }))?;
    } else {
        kv("feat_id", &created.feat_id);
        kv("branch", &created.branch);
        kv("worktree", created.worktree.display());
    }
    Ok(())
}

pub fn status(root: &Path, feat: Option<&str>, json: bool) -> anyhow::Result<()> {
    match feat {
        Some(feat_id) => {
            if json {
                return print_json(&query::get(root, feat_id)?);
            }
            let (state, _) = FeatState::load(root, feat_id)?;
            let (tasks, _) = ftharness_core::feat::load_tasks(root, feat_id)
                .with_context(|| format!("tasks for '{feat_id}' not loadable"))?;
            kv("feat_id", &state.feat_id);
            kv("title", &state.title);
            kv("status", state.status);
            kv("branch", &state.branch);
            kv("worktree", &state.worktree_path);
            kv(
                "current_task",
                state.current_task_id.as_deref().unwrap_or("none"),
            );
            kv(
                "tasks",
                format!(
                    "planned={} in_progress={} done={} blocked={}",
                    tasks.count(ftharness_core::types::TaskStatus::Planned),
                    tasks.count(ftharness_core::types::TaskStatus::InProgress),
                    tasks.count(ftharness_core::types::TaskStatus::Done),
                    tasks.count(ftharness_core::types::TaskStatus::Blocked),
                ),
            );
            Ok(())
        }
        None => {
            let items = query::list(root)?;
            if json {
                return print_json(&serde_json::json!({ "feats": items }));
            }
            if items.is_empty() {
                kv("feats", "none");
                return Ok(());
            }
            for item in items {
                kv(
                    &item.feat_id,
                    format!("{} [{}] {}", item.status, item.branch, item.title),
                );
            }
            Ok(())
        }
    }
}

pub fn archive(root: &Path, feat_id: &str, json: bool) -> anyhow::Result<()> {
    let report = archive::archive_feat(root, feat_id)?;
    for warning in &report.warnings {
        eprintln!("warn: {warning}");
    }
    if json {
        print_json(&serde_json::json!({
            "feat_id": report.feat_id,
            "branch_merged": report.branch_merged,
            "worktree_removed": report.worktree_removed,
            "branch_deleted": report.branch_deleted,
            "memory_files": report.memory_files,
        }))?;
    } else {
        kv("archived", &report.feat_id);
        kv("branch_merged", report.branch_merged);
        kv("worktree_removed", report.worktree_removed);
        kv("branch_deleted", report.branch_deleted);
        for file in &report.memory_files {
            kv("memory_file", file.display());
        }
    }
    Ok(())
}

pub fn abandon(root: &Path, feat_id: &str) -> anyhow::Result<()> {
    engine::abandon_feat(root, feat_id)?;
    kv("abandoned", feat_id);
    Ok(())
}
