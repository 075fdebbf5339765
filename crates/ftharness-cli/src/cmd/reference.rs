use crate::output::kv;
use ftharness_core::{paths, reference, HarnessError};
use std::path::Path;

pub fn check(root: &Path, manifest: Option<&Path>) -> anyhow::Result<()> {
    let report = reference::check_reference_readiness(root, manifest)?;
    kv("report_json", paths::ref_report_json(root).display());
    kv("report_md", paths::ref_report_md(root).display());
    kv("status", &report.status);
    if !report.is_valid() {
        for entry in report.entries.iter().filter(|e| e.required && !e.exists) {
            eprintln!("error: missing required reference: {} ({})", entry.id, entry.error);
        }
        return Err(
            HarnessError::ReferenceNotReady("required references are missing".into()).into(),
        );
    }
    Ok(())
}

pub fn validate(root: &Path, manifest: Option<&Path>) -> anyhow::Result<()> {
    let issues = reference::check_report(root, manifest)?;
    if !issues.is_empty() {
        for issue in &issues {
            eprintln!("error: {issue}");
        }
        return Err(HarnessError::ReferenceNotReady(issues.join("; ")).into());
    }
    kv("reference_report", "ok");
    Ok(())
}
