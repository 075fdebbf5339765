use crate::output::{kv, print_json};
use ftharness_core::{doctor, HarnessError};
use std::path::Path;

pub fn validate(root: &Path, json: bool) -> anyhow::Result<()> {
    let errors = doctor::validate(root)?;
    if json {
        print_json(&serde_json::json!({ "errors": errors }))?;
    }
    if !errors.is_empty() {
        for err in &errors {
            eprintln!("error: {err}");
        }
        return Err(HarnessError::ValidationFailed(format!(
            "{} validation error(s)",
            errors.len()
        ))
        .into());
    }
    if !json {
        kv("validation", "ok");
    }
    Ok(())
}

pub fn diagnose(root: &Path, json: bool) -> anyhow::Result<()> {
    let report = doctor::diagnose(root)?;
    if json {
        print_json(&serde_json::json!({
            "errors": report.errors,
            "warnings": report.warnings,
        }))?;
    } else {
        kv("errors", report.errors.len());
        kv("warnings", report.warnings.len());
        for warning in &report.warnings {
            eprintln!("warn: {warning}");
        }
    }
    if !report.is_healthy() {
        for err in &report.errors {
            eprintln!("error: {err}");
        }
        return Err(HarnessError::ValidationFailed(format!(
            "{} drift error(s)",
            report.errors.len()
        ))
        .into());
    }
    Ok(())
}
