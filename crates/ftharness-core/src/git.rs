//! Version-control adapter: shells out to git and never swallows its errors.
//!
//! Every operation runs `git -C <repo root> ...` synchronously with captured
//! output. Failures surface the full command, exit code, and stderr through
//! [`HarnessError::Git`].

use crate::error::{HarnessError, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

pub struct Git {
    root: PathBuf,
}

/// One entry from `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub branch: Option<String>,
}

impl Git {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run(&self, args: &[&str]) -> Result<std::process::Output> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .args(args)
            .output()?;
        Ok(output)
    }

    /// Run and require exit 0; error carries command + stderr otherwise.
    fn run_ok(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args)?;
        if !output.status.success() {
            return Err(HarnessError::Git {
                command: format!("git {}", args.join(" ")),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run and report only success/failure, without treating failure as an
    /// error (for predicates like merge detection).
    fn run_check(&self, args: &[&str]) -> Result<bool> {
        Ok(self.run(args)?.status.success())
    }

    // -----------------------------------------------------------------------
    // Repository + branches
    // -----------------------------------------------------------------------

    pub fn ensure_repo(&self) -> Result<()> {
        let output = self.run(&["rev-parse", "--is-inside-work-tree"])?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() || stdout.trim() != "true" {
            return Err(HarnessError::NotGitRepo(self.root.clone()));
        }
        Ok(())
    }

    /// The branch considered integration base: `main`, else `master`, else
    /// whatever HEAD currently names.
    pub fn current_base_branch(&self) -> Result<String> {
        for candidate in ["main", "master"] {
            if self.branch_exists(candidate)? {
                return Ok(candidate.to_string());
            }
        }
        let head = self.run_ok(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let head = head.trim();
        if head.is_empty() {
            Ok("HEAD".to_string())
        } else {
            Ok(head.to_string())
        }
    }

    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let r = format!("refs/heads/{branch}");
        self.run_check(&["show-ref", "--verify", "--quiet", &r])
    }

    pub fn is_merged(&self, branch: &str, into: &str) -> Result<bool> {
        self.run_check(&["merge-base", "--is-ancestor", branch, into])
    }

    pub fn delete_branch(&self, branch: &str, force: bool) -> Result<()> {
        let flag = if force { "-D" } else { "-d" };
        self.run_ok(&["branch", flag, branch])?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Worktrees
    // -----------------------------------------------------------------------

    /// Register a checkout at `path` on a new branch `branch` cut from
    /// `base`. Fails if the branch exists or the path is non-empty.
    pub fn add_worktree(&self, path: &Path, branch: &str, base: &str) -> Result<()> {
        if self.branch_exists(branch)? {
            return Err(HarnessError::Git {
                command: format!("git worktree add {} -b {branch}", path.display()),
                code: 128,
                stderr: format!("branch already exists: {branch}"),
            });
        }
        let path_str = path.to_string_lossy().into_owned();
        self.run_ok(&["worktree", "add", path_str.as_str(), "-b", branch, base])?;
        Ok(())
    }

    /// Deregister and remove a checkout. Refuses dirty worktrees unless
    /// `force`.
    pub fn remove_worktree(&self, path: &Path, force: bool) -> Result<()> {
        let path_str = path.to_string_lossy().into_owned();
        let mut args: Vec<&str> = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(path_str.as_str());
        self.run_ok(&args)?;
        Ok(())
    }

    pub fn list_worktrees(&self) -> Result<Vec<WorktreeEntry>> {
        let out = self.run_ok(&["worktree", "list", "--porcelain"])?;
        Ok(parse_worktree_porcelain(&out))
    }

    /// No staged, unstaged, or untracked changes at `path`.
    pub fn worktree_is_clean(&self, path: &Path) -> Result<bool> {
        let out = self.run_in(path, &["status", "--porcelain"])?;
        Ok(out.trim().is_empty())
    }

    // -----------------------------------------------------------------------
    // Inspection inside a checkout
    // -----------------------------------------------------------------------

    fn run_in(&self, cwd: &Path, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(cwd)
            .args(args)
            .output()?;
        if !output.status.success() {
            return Err(HarnessError::Git {
                command: format!("git -C {} {}", cwd.display(), args.join(" ")),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    pub fn head_sha(&self, cwd: &Path) -> Result<String> {
        Ok(self.run_in(cwd, &["rev-parse", "HEAD"])?.trim().to_string())
    }

    pub fn head_branch(&self, cwd: &Path) -> Result<String> {
        Ok(self
            .run_in(cwd, &["rev-parse", "--abbrev-ref", "HEAD"])?
            .trim()
            .to_string())
    }

    /// Full message body of the HEAD commit at `cwd`.
    pub fn head_message(&self, cwd: &Path) -> Result<String> {
        self.run_in(cwd, &["show", "-s", "--format=%B", "HEAD"])
    }

    /// Full message body of an arbitrary commit in the main repository.
    pub fn show_commit_message(&self, sha: &str) -> Result<String> {
        self.run_ok(&["show", "-s", "--format=%B", sha])
    }

    /// `git commit -F <message file>` inside `cwd`, staging everything first.
    pub fn commit_all_with_file(&self, cwd: &Path, message_file: &Path) -> Result<String> {
        self.run_in(cwd, &["add", "-A"])?;
        let msg = message_file.to_string_lossy();
        self.run_in(cwd, &["commit", "-F", &msg])?;
        self.head_sha(cwd)
    }
}

fn parse_worktree_porcelain(out: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;
    for line in out.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(e) = current.take() {
                entries.push(e);
            }
            current = Some(WorktreeEntry {
                path: PathBuf::from(path),
                branch: None,
            });
        } else if let Some(branch) = line.strip_prefix("branch ") {
            if let Some(e) = current.as_mut() {
                e.branch = Some(
                    branch
                        .strip_prefix("refs/heads/")
                        .unwrap_or(branch)
                        .to_string(),
                );
            }
        }
    }
    if let Some(e) = current.take() {
        entries.push(e);
    }
    entries
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn init_repo(dir: &Path) {
        let run = |args: &[&str]| {
            let out = Command::new("git")
                .args(["-C", &dir.to_string_lossy()])
                .args(args)
                .output()
                .unwrap();
            assert!(
                out.status.success(),
                "git {args:?}: {}",
                String::from_utf8_lossy(&out.stderr)
            );
        };
        run(&["init", "-b", "main"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "Test"]);
        std::fs::write(dir.join("README.md"), "init\n").unwrap();
        run(&["add", "-A"]);
        run(&["commit", "-m", "init"]);
    }

    #[test]
    fn ensure_repo_rejects_plain_dir() {
        let dir = TempDir::new().unwrap();
        let git = Git::new(dir.path());
        assert!(matches!(
            git.ensure_repo(),
            Err(HarnessError::NotGitRepo(_))
        ));
    }

    #[test]
    fn base_branch_prefers_main() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());
        let git = Git::new(dir.path());
        git.ensure_repo().unwrap();
        assert_eq!(git.current_base_branch().unwrap(), "main");
    }

    #[test]
    fn worktree_lifecycle() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());
        let git = Git::new(dir.path());

        let wt = dir.path().join(".worktrees/F-demo-001");
        git.add_worktree(&wt, "feat/F-demo-001", "main").unwrap();
        assert!(wt.join("README.md").exists());
        assert!(git.branch_exists("feat/F-demo-001").unwrap());

        let listed = git.list_worktrees().unwrap();
        assert!(listed
            .iter()
            .any(|e| e.branch.as_deref() == Some("feat/F-demo-001")));

        assert!(git.worktree_is_clean(&wt).unwrap());
        std::fs::write(wt.join("new.txt"), "x").unwrap();
        assert!(!git.worktree_is_clean(&wt).unwrap());
        std::fs::remove_file(wt.join("new.txt")).unwrap();

        git.remove_worktree(&wt, false).unwrap();
        assert!(!wt.exists());
        git.delete_branch("feat/F-demo-001", true).unwrap();
        assert!(!git.branch_exists("feat/F-demo-001").unwrap());
    }

    #[test]
    fn add_worktree_rejects_existing_branch() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());
        let git = Git::new(dir.path());
        let wt = dir.path().join(".worktrees/F-demo-001");
        git.add_worktree(&wt, "feat/F-demo-001", "main").unwrap();
        let err = git
            .add_worktree(
                &dir.path().join(".worktrees/other"),
                "feat/F-demo-001",
                "main",
            )
            .unwrap_err();
        assert!(matches!(err, HarnessError::Git { .. }));
    }

    #[test]
    fn merge_detection() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());
        let git = Git::new(dir.path());
        let wt = dir.path().join(".worktrees/F-demo-001");
        git.add_worktree(&wt, "feat/F-demo-001", "main").unwrap();

        // Unmerged until the branch lands on main. A fresh branch with no
        // extra commits is trivially an ancestor.
        assert!(git.is_merged("feat/F-demo-001", "main").unwrap());

        std::fs::write(wt.join("work.txt"), "change\n").unwrap();
        let out = Command::new("git")
            .args(["-C", &wt.to_string_lossy(), "add", "-A"])
            .output()
            .unwrap();
        assert!(out.status.success());
        let out = Command::new("git")
            .args(["-C", &wt.to_string_lossy(), "commit", "-m", "work"])
            .output()
            .unwrap();
        assert!(out.status.success());
        assert!(!git.is_merged("feat/F-demo-001", "main").unwrap());

        let out = Command::new("git")
            .args([
                "-C",
                &dir.path().to_string_lossy(),
                "merge",
                "--no-ff",
                "feat/F-demo-001",
            ])
            .output()
            .unwrap();
        assert!(out.status.success());
        assert!(git.is_merged("feat/F-demo-001", "main").unwrap());
    }

    #[test]
    fn delete_unmerged_branch_requires_force() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());
        let git = Git::new(dir.path());
        let wt = dir.path().join(".worktrees/F-x-001");
        git.add_worktree(&wt, "feat/F-x-001", "main").unwrap();
        std::fs::write(wt.join("w.txt"), "w").unwrap();
        git.commit_all_with_file(&wt, &{
            let msg = dir.path().join("m.txt");
            std::fs::write(&msg, "wip\n").unwrap();
            msg
        })
        .unwrap();
        git.remove_worktree(&wt, false).unwrap();
        assert!(git.delete_branch("feat/F-x-001", false).is_err());
        git.delete_branch("feat/F-x-001", true).unwrap();
    }

    #[test]
    fn head_message_round_trip() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());
        let git = Git::new(dir.path());
        let msg = git.head_message(dir.path()).unwrap();
        assert_eq!(msg.trim(), "init");
        let sha = git.head_sha(dir.path()).unwrap();
        assert_eq!(sha.len(), 40);
        assert_eq!(git.head_branch(dir.path()).unwrap(), "main");
    }

    #[test]
    fn porcelain_parse() {
        let out = "worktree /repo\nHEAD abc\nbranch refs/heads/main\n\nworktree /repo/.worktrees/F-a-001\nHEAD def\nbranch refs/heads/feat/F-a-001\n\nworktree /repo/.worktrees/detached\nHEAD 123\ndetached\n";
        let entries = parse_worktree_porcelain(out);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].branch.as_deref(), Some("main"));
        assert_eq!(entries[1].branch.as_deref(), Some("feat/F-a-001"));
        assert_eq!(entries[2].branch, None);
    }
}
