use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn ftharness(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("ftharness").unwrap();
    cmd.arg("--root").arg(dir.path());
    cmd
}

fn git(dir: &Path, args: &[&str]) {
    let out = std::process::Command::new("git")
        .args(["-C", &dir.to_string_lossy()])
        .args(args)
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "git {args:?}: {}",
        String::from_utf8_lossy(&out.stderr)
    );
}

fn init_repo(dir: &TempDir) {
    git(dir.path(), &["init", "-b", "main"]);
    git(dir.path(), &["config", "user.email", "test@example.com"]);
    git(dir.path(), &["config", "user.name", "Test"]);
    std::fs::write(dir.path().join("README.md"), "init\n").unwrap();
    git(dir.path(), &["add", "-A"]);
    git(dir.path(), &["commit", "-m", "init"]);
}

fn init_harness(dir: &TempDir) {
    init_repo(dir);
    ftharness(dir).arg("initialize-harness").assert().success();
}

fn set_gate(dir: &TempDir, commands: &[&str]) {
    let config_path = dir.path().join(".bagakit/ft-harness/config.json");
    let list = commands
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");
    std::fs::write(
        &config_path,
        format!("{{\"gate\": {{\"project_type\": \"non_ui\", \"non_ui_commands\": [{list}]}}}}"),
    )
    .unwrap();
}

fn create_demo_feat(dir: &TempDir) -> String {
    let output = ftharness(dir)
        .args([
            "create-feat",
            "--title",
            "Demo Feat",
            "--slug",
            "demo-feat",
            "--goal",
            "Validate full loop",
        ])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8(output.stdout).unwrap();
    stdout
        .lines()
        .find_map(|l| l.strip_prefix("feat_id: "))
        .expect("feat_id line")
        .to_string()
}

// ---------------------------------------------------------------------------
// usage / exit codes
// ---------------------------------------------------------------------------

#[test]
fn missing_root_is_usage_error() {
    Command::cargo_bin("ftharness")
        .unwrap()
        .arg("list-feats")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--root"));
}

#[test]
fn unknown_subcommand_is_usage_error() {
    Command::cargo_bin("ftharness")
        .unwrap()
        .arg("no-such-command")
        .assert()
        .code(2);
}

#[test]
fn uninitialized_harness_exits_3() {
    let dir = TempDir::new().unwrap();
    init_repo(&dir);
    ftharness(&dir)
        .args(["start-task", "--feat", "F-demo-001", "--task", "T-001"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("not initialized"));
}

#[test]
fn corrupt_index_exits_5() {
    let dir = TempDir::new().unwrap();
    init_harness(&dir);
    std::fs::write(dir.path().join(".bagakit/ft-harness/index/feats.json"), "{broken").unwrap();
    ftharness(&dir).arg("list-feats").assert().code(5);
}

// ---------------------------------------------------------------------------
// initialize-harness
// ---------------------------------------------------------------------------

#[test]
fn initialize_creates_tree_and_is_idempotent() {
    let dir = TempDir::new().unwrap();
    init_repo(&dir);
    ftharness(&dir).arg("initialize-harness").assert().success();
    ftharness(&dir).arg("initialize-harness").assert().success();

    assert!(dir.path().join(".bagakit/ft-harness/index/feats.json").exists());
    assert!(dir.path().join(".bagakit/ft-harness/config.json").exists());
    assert!(dir.path().join(".bagakit/ft-harness/feats").is_dir());
    assert!(dir.path().join(".bagakit/ft-harness/feats-archived").is_dir());
    let gitignore = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
    assert!(gitignore.lines().any(|l| l == ".worktrees"));
}

// ---------------------------------------------------------------------------
// S1: happy path
// ---------------------------------------------------------------------------

#[test]
fn s1_full_loop_create_gate_commit_finish_archive() {
    let dir = TempDir::new().unwrap();
    init_harness(&dir);
    set_gate(&dir, &["bash -lc 'true'"]);

    let feat_id = create_demo_feat(&dir);
    assert_eq!(feat_id, "F-demo-feat-001");
    let worktree = dir.path().join(".worktrees").join(&feat_id);
    assert!(worktree.is_dir());

    ftharness(&dir)
        .args(["start-task", "--feat", &feat_id, "--task", "T-001"])
        .assert()
        .success()
        .stdout(predicate::str::contains("task_id: T-001"));

    ftharness(&dir)
        .args(["run-task-gate", "--feat", &feat_id, "--task", "T-001"])
        .assert()
        .success()
        .stdout(predicate::str::contains("gate_result: pass"));

    // Operator does the actual work in the isolated checkout.
    std::fs::write(worktree.join("feature.txt"), "implemented\n").unwrap();

    ftharness(&dir)
        .args([
            "prepare-task-commit",
            "--feat",
            &feat_id,
            "--task",
            "T-001",
            "--summary",
            "Implement T-001",
            "--execute",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("message_file: "))
        .stdout(predicate::str::contains("commit_sha: "));

    ftharness(&dir)
        .args([
            "finish-task",
            "--feat",
            &feat_id,
            "--task",
            "T-001",
            "--result",
            "done",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("feat_status: done"));

    git(dir.path(), &["merge", "--no-ff", &format!("feat/{feat_id}")]);

    ftharness(&dir)
        .args(["archive-feat", "--feat", &feat_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("archived: "));

    assert!(!worktree.exists());
    assert!(dir
        .path()
        .join(".bagakit/ft-harness/feats-archived")
        .join(&feat_id)
        .join("state.json")
        .exists());

    ftharness(&dir).arg("diagnose-harness").assert().success();
    ftharness(&dir)
        .arg("list-feats")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"feats\": []"));
}

// ---------------------------------------------------------------------------
// S2: blocked task
// ---------------------------------------------------------------------------

#[test]
fn s2_failing_gate_blocks_task_and_archive_refuses() {
    let dir = TempDir::new().unwrap();
    init_harness(&dir);
    set_gate(&dir, &["bash -lc 'false'"]);

    let feat_id = create_demo_feat(&dir);
    ftharness(&dir)
        .args(["start-task", "--feat", &feat_id, "--task", "T-001"])
        .assert()
        .success();

    ftharness(&dir)
        .args(["run-task-gate", "--feat", &feat_id, "--task", "T-001"])
        .assert()
        .code(3)
        .stdout(predicate::str::contains("gate_result: fail"));

    ftharness(&dir)
        .args([
            "finish-task",
            "--feat",
            &feat_id,
            "--task",
            "T-001",
            "--result",
            "blocked",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("feat_status: active"));

    ftharness(&dir)
        .args(["archive-feat", "--feat", &feat_id])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("done or abandoned"));
}

// ---------------------------------------------------------------------------
// S3: malformed commit
// ---------------------------------------------------------------------------

#[test]
fn s3_cross_field_violation_in_head_rejected() {
    let dir = TempDir::new().unwrap();
    init_harness(&dir);
    set_gate(&dir, &["bash -lc 'true'"]);

    let feat_id = create_demo_feat(&dir);
    ftharness(&dir)
        .args(["start-task", "--feat", &feat_id, "--task", "T-001"])
        .assert()
        .success();
    ftharness(&dir)
        .args(["run-task-gate", "--feat", &feat_id, "--task", "T-001"])
        .assert()
        .success();

    // Operator hand-writes a commit with Task-Status: done but
    // Gate-Result: fail.
    let worktree = dir.path().join(".worktrees").join(&feat_id);
    std::fs::write(worktree.join("feature.txt"), "x\n").unwrap();
    let msg = format!(
        "feat({feat_id}): task(T-001) bad\n\nPlan:\n- p\n\nCheck:\n- c\n\nLearn:\n- l\n\nFeat-ID: {feat_id}\nTask-ID: T-001\nGate-Result: fail\nTask-Status: done\n"
    );
    let msg_file = dir.path().join("bad.msg");
    std::fs::write(&msg_file, msg).unwrap();
    git(&worktree, &["add", "-A"]);
    git(
        &worktree,
        &["commit", "-F", &msg_file.to_string_lossy()],
    );

    ftharness(&dir)
        .args([
            "finish-task",
            "--feat",
            &feat_id,
            "--task",
            "T-001",
            "--result",
            "done",
        ])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("requires Gate-Result: pass"));

    // No SSOT change: the task is still in progress.
    ftharness(&dir)
        .args(["show-feat-status", "--feat", &feat_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("current_task: T-001"))
        .stdout(predicate::str::contains("in_progress=1"));
}

// ---------------------------------------------------------------------------
// Boundary behaviors
// ---------------------------------------------------------------------------

#[test]
fn slug_collision_with_active_feat_rejected() {
    let dir = TempDir::new().unwrap();
    init_harness(&dir);
    create_demo_feat(&dir);

    ftharness(&dir)
        .args([
            "create-feat",
            "--title",
            "Demo Again",
            "--slug",
            "demo-feat",
            "--goal",
            "dup",
        ])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("already uses slug"));
}

#[test]
fn archived_slug_can_be_reused_with_next_counter() {
    let dir = TempDir::new().unwrap();
    init_harness(&dir);
    set_gate(&dir, &["bash -lc 'true'"]);

    let feat_id = create_demo_feat(&dir);
    // Abandon and archive the first feat, then recreate the slug.
    ftharness(&dir)
        .args(["abandon-feat", "--feat", &feat_id])
        .assert()
        .success();
    ftharness(&dir)
        .args(["archive-feat", "--feat", &feat_id])
        .assert()
        .success();

    let second = create_demo_feat(&dir);
    assert_eq!(second, "F-demo-feat-002");
}

#[test]
fn gate_with_no_commands_fails() {
    let dir = TempDir::new().unwrap();
    init_harness(&dir);
    set_gate(&dir, &[]);

    let feat_id = create_demo_feat(&dir);
    ftharness(&dir)
        .args(["start-task", "--feat", &feat_id, "--task", "T-001"])
        .assert()
        .success();
    ftharness(&dir)
        .args(["run-task-gate", "--feat", &feat_id, "--task", "T-001"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("no non-ui gate command"));
}

#[test]
fn finish_done_without_gate_pass_rejected() {
    let dir = TempDir::new().unwrap();
    init_harness(&dir);
    let feat_id = create_demo_feat(&dir);
    ftharness(&dir)
        .args(["start-task", "--feat", &feat_id, "--task", "T-001"])
        .assert()
        .success();
    ftharness(&dir)
        .args([
            "finish-task",
            "--feat",
            &feat_id,
            "--task",
            "T-001",
            "--result",
            "done",
        ])
        .assert()
        .code(3);
}

#[test]
fn second_in_progress_task_rejected() {
    let dir = TempDir::new().unwrap();
    init_harness(&dir);
    let feat_id = create_demo_feat(&dir);
    ftharness(&dir)
        .args(["start-task", "--feat", &feat_id, "--task", "T-001"])
        .assert()
        .success();
    ftharness(&dir)
        .args(["start-task", "--feat", &feat_id])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("already in progress"));
}

// ---------------------------------------------------------------------------
// S6: doctor drift
// ---------------------------------------------------------------------------

#[test]
fn s6_deleted_worktree_reported_by_doctor() {
    let dir = TempDir::new().unwrap();
    init_harness(&dir);
    let feat_id = create_demo_feat(&dir);
    std::fs::remove_dir_all(dir.path().join(".worktrees").join(&feat_id)).unwrap();

    ftharness(&dir)
        .arg("diagnose-harness")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("WorktreeMissing"));

    // validate-harness (SSOT only) still passes: nothing in JSON drifted.
    ftharness(&dir).arg("validate-harness").assert().success();
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[test]
fn queries_emit_json_summaries() {
    let dir = TempDir::new().unwrap();
    init_harness(&dir);
    let feat_id = create_demo_feat(&dir);
    ftharness(&dir)
        .args(["start-task", "--feat", &feat_id, "--task", "T-001"])
        .assert()
        .success();

    ftharness(&dir)
        .arg("list-feats")
        .assert()
        .success()
        .stdout(predicate::str::contains(&feat_id))
        .stdout(predicate::str::contains("\"in_progress\": 1"));

    ftharness(&dir)
        .args(["get-feat", "--feat", &feat_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"state\""))
        .stdout(predicate::str::contains("\"tasks\""));

    ftharness(&dir)
        .args(["filter-feats", "--status", "active"])
        .assert()
        .success()
        .stdout(predicate::str::contains(&feat_id));

    ftharness(&dir)
        .args(["filter-feats", "--status", "done"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"feats\": []"));
}

// ---------------------------------------------------------------------------
// Reference readiness
// ---------------------------------------------------------------------------

#[test]
fn reference_gate_blocks_strict_create_until_report_generated() {
    let dir = TempDir::new().unwrap();
    init_harness(&dir);

    let reference = dir.path().join("reading.md");
    std::fs::write(&reference, "required reading").unwrap();
    let manifest = dir.path().join("manifest.json");
    std::fs::write(
        &manifest,
        format!(
            "{{\"entries\": [{{\"id\": \"reading\", \"type\": \"file\", \"location\": \"{}\"}}]}}",
            reference.display()
        ),
    )
    .unwrap();
    let manifest_arg = manifest.to_string_lossy().into_owned();

    // Strict create before any report exists: refused.
    ftharness(&dir)
        .args([
            "create-feat",
            "--title",
            "Gated",
            "--goal",
            "g",
            "--manifest",
            &manifest_arg,
        ])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("missing report"));

    ftharness(&dir)
        .args(["check-reference-readiness", "--manifest", &manifest_arg])
        .assert()
        .success()
        .stdout(predicate::str::contains("status: VALID"));

    ftharness(&dir)
        .args(["validate-reference-report", "--manifest", &manifest_arg])
        .assert()
        .success();

    ftharness(&dir)
        .args([
            "create-feat",
            "--title",
            "Gated",
            "--goal",
            "g",
            "--manifest",
            &manifest_arg,
        ])
        .assert()
        .success();

    // --no-strict bypasses the gate entirely.
    ftharness(&dir)
        .args([
            "create-feat",
            "--title",
            "Ungated",
            "--goal",
            "g",
            "--no-strict",
        ])
        .assert()
        .success();
}
