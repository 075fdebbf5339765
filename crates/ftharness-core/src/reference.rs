//! Reference-readiness gate: manifest-driven pre-flight check.
//!
//! A manifest lists reference material the operator must have available
//! before feats are created. `check_reference_readiness` verifies every
//! entry, digests what it finds, and writes a report pair
//! (`artifacts/ref-read-report.{json,md}`). Strict `create-feat` /
//! `initialize-harness` later re-validate that report against the manifest
//! through [`check_report`]. With no manifest configured the gate is
//! trivially satisfied.

use crate::error::{HarnessError, Result};
use crate::store::utc_now;
use crate::{paths, store};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static ENV_TOKEN_RE: OnceLock<Regex> = OnceLock::new();

fn env_token_re() -> &'static Regex {
    ENV_TOKEN_RE
        .get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)").unwrap())
}

// ---------------------------------------------------------------------------
// Manifest / report shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub location: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub location: String,
    pub resolved_location: String,
    pub required: bool,
    pub exists: bool,
    pub sha256: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefReport {
    pub status: String,
    pub generated_at: String,
    pub project_root: String,
    pub manifest_path: String,
    pub manifest_sha256: String,
    pub entries: Vec<ReportEntry>,
}

impl RefReport {
    pub fn is_valid(&self) -> bool {
        self.status == "VALID"
    }
}

// ---------------------------------------------------------------------------
// Manifest discovery
// ---------------------------------------------------------------------------

/// The manifest in effect: an explicit `--manifest` path, else the installed
/// skill's `references/required-reading-manifest.json`. None when neither is
/// configured.
pub fn manifest_location(manifest_override: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = manifest_override {
        return Some(p.to_path_buf());
    }
    let skill_dir = std::env::var(paths::SKILL_DIR_ENV).ok()?;
    Some(
        Path::new(&skill_dir)
            .join("references")
            .join("required-reading-manifest.json"),
    )
}

// ---------------------------------------------------------------------------
// Location expansion
// ---------------------------------------------------------------------------

/// Expand `~` and environment tokens in a manifest location. Unresolved
/// variables are an error for the entry, not a silent literal path. The
/// reference-skills home falls back to `~/.bagakit/skills` when its
/// variable is unset but that directory exists.
fn expand_location(raw: &str) -> std::result::Result<String, String> {
    let mut out = raw.to_string();
    if let Some(rest) = out.strip_prefix("~/") {
        match home_dir() {
            Some(home) => out = format!("{}/{rest}", home.display()),
            None => return Err("cannot expand '~': HOME not set".to_string()),
        }
    }

    let mut unresolved = None;
    let expanded = env_token_re()
        .replace_all(&out, |caps: &regex::Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or("");
            if let Ok(value) = std::env::var(name) {
                return value;
            }
            if name == paths::REFERENCE_SKILLS_ENV {
                if let Some(home) = home_dir() {
                    let fallback = home.join(".bagakit").join("skills");
                    if fallback.is_dir() {
                        return fallback.to_string_lossy().into_owned();
                    }
                }
            }
            unresolved = Some(name.to_string());
            String::new()
        })
        .into_owned();

    match unresolved {
        Some(name) => Err(format!("unresolved environment variable in location: ${name}")),
        None => Ok(expanded),
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

// ---------------------------------------------------------------------------
// Digests
// ---------------------------------------------------------------------------

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut file = std::fs::File::open(path)?;
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

// ---------------------------------------------------------------------------
// check-reference-readiness
// ---------------------------------------------------------------------------

/// Verify every manifest entry and write the report pair. Returns the
/// report; an INVALID status is the caller's signal to fail the gate.
pub fn check_reference_readiness(
    root: &Path,
    manifest_override: Option<&Path>,
) -> Result<RefReport> {
    let mpath = manifest_location(manifest_override).ok_or_else(|| {
        HarnessError::ReferenceNotReady(format!(
            "no manifest configured: pass --manifest or set {}",
            paths::SKILL_DIR_ENV
        ))
    })?;
    if !mpath.exists() {
        return Err(HarnessError::ReferenceNotReady(format!(
            "manifest not found: {}",
            mpath.display()
        )));
    }

    let manifest: Manifest = store::load(&mpath)?;
    let mut entries = Vec::new();
    let mut ok = true;

    for entry in &manifest.entries {
        let mut report = ReportEntry {
            id: entry.id.clone(),
            entry_type: entry.entry_type.clone(),
            location: entry.location.clone(),
            resolved_location: entry.location.clone(),
            required: entry.required,
            exists: false,
            sha256: String::new(),
            error: String::new(),
        };

        if entry.id.is_empty() || entry.location.is_empty() {
            report.error = "invalid manifest entry".to_string();
        } else {
            match entry.entry_type.as_str() {
                "file" => match expand_location(&entry.location) {
                    Ok(resolved) => {
                        report.resolved_location = resolved.clone();
                        let p = Path::new(&resolved);
                        if p.is_file() {
                            report.exists = true;
                            report.sha256 = sha256_file(p)?;
                        } else {
                            report.error = "file not found".to_string();
                        }
                    }
                    Err(e) => report.error = e,
                },
                "url" => {
                    report.error = "unsupported: url entry requires network access".to_string();
                }
                _ => report.error = "invalid manifest entry".to_string(),
            }
        }

        if report.required && !report.exists {
            ok = false;
        }
        entries.push(report);
    }

    let report = RefReport {
        status: if ok { "VALID" } else { "INVALID" }.to_string(),
        generated_at: utc_now().to_rfc3339(),
        project_root: root.to_string_lossy().into_owned(),
        manifest_path: mpath.to_string_lossy().into_owned(),
        manifest_sha256: sha256_file(&mpath)?,
        entries,
    };

    std::fs::create_dir_all(paths::artifacts_dir(root))?;
    store::save(&paths::ref_report_json(root), &report)?;
    store::write_bytes(&paths::ref_report_md(root), render_report_md(&report).as_bytes())?;
    Ok(report)
}

fn render_report_md(report: &RefReport) -> String {
    let mut lines = vec![
        "# Reference Read Report".to_string(),
        String::new(),
        format!("Status: {}", report.status),
        format!("Generated At (UTC): {}", report.generated_at),
        format!("Project Root: {}", report.project_root),
        format!("Manifest Path: {}", report.manifest_path),
        format!("Manifest SHA256: {}", report.manifest_sha256),
        String::new(),
        "## Entries".to_string(),
        String::new(),
        "| ID | Type | Required | Exists | SHA256 | Error |".to_string(),
        "|---|---|---|---|---|---|".to_string(),
    ];
    for e in &report.entries {
        let yes_no = |b: bool| if b { "yes" } else { "no" };
        lines.push(format!(
            "| {} | {} | {} | {} | {} | {} |",
            e.id,
            e.entry_type,
            yes_no(e.required),
            yes_no(e.exists),
            if e.sha256.is_empty() { "-" } else { &e.sha256 },
            if e.error.is_empty() {
                "-".to_string()
            } else {
                e.error.replace('|', "/")
            },
        ));
    }
    lines.push(String::new());
    lines.push("## Reading Notes".to_string());
    lines.push(String::new());
    for e in &report.entries {
        lines.push(format!("### {}", e.id));
        lines.push("- Summary:".to_string());
        lines.push("- Key takeaways:".to_string());
        lines.push(String::new());
    }
    lines.join("\n")
}

// ---------------------------------------------------------------------------
// validate-reference-report / strict gating
// ---------------------------------------------------------------------------

/// Issues that make the existing report unusable as a create-feat
/// precondition. With no manifest configured there is nothing to read and
/// the gate passes with no issues.
pub fn check_report(root: &Path, manifest_override: Option<&Path>) -> Result<Vec<String>> {
    let Some(mpath) = manifest_location(manifest_override) else {
        return Ok(Vec::new());
    };
    let mut issues = Vec::new();
    if !mpath.exists() {
        issues.push(format!("manifest missing: {}", mpath.display()));
        return Ok(issues);
    }

    let report_path = paths::ref_report_json(root);
    if !report_path.exists() {
        issues.push(format!(
            "missing report: {} (run 'ftharness check-reference-readiness' first)",
            report_path.display()
        ));
        return Ok(issues);
    }

    let report: RefReport = match store::load(&report_path) {
        Ok(r) => r,
        Err(e) => {
            issues.push(format!("failed to read report json: {e}"));
            return Ok(issues);
        }
    };

    if !report.is_valid() {
        issues.push("reference report status is not VALID".to_string());
    }
    if report.manifest_sha256 != sha256_file(&mpath)? {
        issues.push("manifest hash mismatch; regenerate the report".to_string());
    }
    let missing: Vec<&str> = report
        .entries
        .iter()
        .filter(|e| e.required && !e.exists)
        .map(|e| e.id.as_str())
        .collect();
    if !missing.is_empty() {
        issues.push(format!("missing required references: {}", missing.join(", ")));
    }
    Ok(issues)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_manifest(dir: &Path, entries: &str) -> PathBuf {
        let mpath = dir.join("manifest.json");
        std::fs::write(&mpath, format!("{{\"entries\": [{entries}]}}")).unwrap();
        mpath
    }

    #[test]
    fn no_manifest_means_gate_passes() {
        let dir = TempDir::new().unwrap();
        // Env var not set in tests, no override given.
        let issues = check_report(dir.path(), None).unwrap();
        assert!(issues.is_empty());
    }

    #[test]
    fn readiness_valid_when_required_files_exist() {
        let dir = TempDir::new().unwrap();
        let reference = dir.path().join("reading.md");
        std::fs::write(&reference, "read me").unwrap();
        let mpath = write_manifest(
            dir.path(),
            &format!(
                "{{\"id\": \"reading\", \"type\": \"file\", \"location\": \"{}\"}}",
                reference.display()
            ),
        );

        let report = check_reference_readiness(dir.path(), Some(&mpath)).unwrap();
        assert!(report.is_valid());
        assert_eq!(report.entries.len(), 1);
        assert!(report.entries[0].exists);
        assert_eq!(report.entries[0].sha256.len(), 64);
        assert!(paths::ref_report_json(dir.path()).exists());
        assert!(paths::ref_report_md(dir.path()).exists());

        let issues = check_report(dir.path(), Some(&mpath)).unwrap();
        assert!(issues.is_empty(), "{issues:?}");
    }

    #[test]
    fn readiness_invalid_when_required_file_missing() {
        let dir = TempDir::new().unwrap();
        let mpath = write_manifest(
            dir.path(),
            "{\"id\": \"gone\", \"type\": \"file\", \"location\": \"/nonexistent/reading.md\"}",
        );

        let report = check_reference_readiness(dir.path(), Some(&mpath)).unwrap();
        assert!(!report.is_valid());
        assert_eq!(report.entries[0].error, "file not found");

        let issues = check_report(dir.path(), Some(&mpath)).unwrap();
        assert!(issues.iter().any(|i| i.contains("not VALID")));
        assert!(issues.iter().any(|i| i.contains("gone")));
    }

    #[test]
    fn optional_entries_do_not_fail_the_gate() {
        let dir = TempDir::new().unwrap();
        let mpath = write_manifest(
            dir.path(),
            "{\"id\": \"nice-to-have\", \"type\": \"file\", \"location\": \"/nonexistent\", \"required\": false}",
        );
        let report = check_reference_readiness(dir.path(), Some(&mpath)).unwrap();
        assert!(report.is_valid());
    }

    #[test]
    fn url_entries_are_reported_unsupported() {
        let dir = TempDir::new().unwrap();
        let mpath = write_manifest(
            dir.path(),
            "{\"id\": \"web\", \"type\": \"url\", \"location\": \"https://example.com/doc\"}",
        );
        let report = check_reference_readiness(dir.path(), Some(&mpath)).unwrap();
        assert!(!report.is_valid());
        assert!(report.entries[0].error.contains("unsupported"));
    }

    #[test]
    fn stale_report_detected_by_manifest_hash() {
        let dir = TempDir::new().unwrap();
        let reference = dir.path().join("reading.md");
        std::fs::write(&reference, "v1").unwrap();
        let mpath = write_manifest(
            dir.path(),
            &format!(
                "{{\"id\": \"reading\", \"type\": \"file\", \"location\": \"{}\"}}",
                reference.display()
            ),
        );
        check_reference_readiness(dir.path(), Some(&mpath)).unwrap();

        // Manifest changes after the report was generated.
        std::fs::write(
            &mpath,
            "{\"entries\": [{\"id\": \"reading2\", \"type\": \"file\", \"location\": \"/x\"}]}",
        )
        .unwrap();
        let issues = check_report(dir.path(), Some(&mpath)).unwrap();
        assert!(issues.iter().any(|i| i.contains("hash mismatch")));
    }

    #[test]
    fn expansion_rejects_unresolved_vars() {
        let err = expand_location("$DEFINITELY_NOT_SET_ANYWHERE_42/x").unwrap_err();
        assert!(err.contains("unresolved environment variable"));
    }

    #[test]
    fn expansion_substitutes_set_vars() {
        std::env::set_var("FTHARNESS_TEST_VAR", "/tmp/refs");
        assert_eq!(
            expand_location("${FTHARNESS_TEST_VAR}/doc.md").unwrap(),
            "/tmp/refs/doc.md"
        );
    }
}
