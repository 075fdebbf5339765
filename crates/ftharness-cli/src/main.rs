mod cmd;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use ftharness_core::types::TaskStatus;
use ftharness_core::HarnessError;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "ftharness",
    about = "Feat/task lifecycle harness — isolated worktrees, gated tasks, structured commits",
    version,
    propagate_version = true
)]
struct Cli {
    /// Repository root governed by the harness (required)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Output as JSON where supported
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// `done` / `blocked` — the only results a task can finish or commit with.
#[derive(Clone, Copy, ValueEnum)]
enum TerminalStatus {
    Done,
    Blocked,
}

impl From<TerminalStatus> for TaskStatus {
    fn from(value: TerminalStatus) -> Self {
        match value {
            TerminalStatus::Done => TaskStatus::Done,
            TerminalStatus::Blocked => TaskStatus::Blocked,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the reference read report from the manifest
    CheckReferenceReadiness {
        #[arg(long)]
        manifest: Option<PathBuf>,
    },

    /// Validate the existing reference report against the manifest
    ValidateReferenceReport {
        #[arg(long)]
        manifest: Option<PathBuf>,
    },

    /// Create the harness tree and seed its defaults
    InitializeHarness {
        #[arg(long)]
        manifest: Option<PathBuf>,
        /// Skip the reference-readiness precondition
        #[arg(long)]
        no_strict: bool,
        /// Enforce the reference-readiness precondition (default)
        #[arg(long, conflicts_with = "no_strict")]
        strict: bool,
    },

    /// Create a feat: branch, isolated worktree, state scaffold, index entry
    CreateFeat {
        #[arg(long)]
        title: String,
        /// Slug override (defaults to a slugified title)
        #[arg(long)]
        slug: Option<String>,
        #[arg(long)]
        goal: String,
        #[arg(long)]
        manifest: Option<PathBuf>,
        #[arg(long)]
        no_strict: bool,
        #[arg(long, conflicts_with = "no_strict")]
        strict: bool,
    },

    /// Show one feat (or all feats) with task counts
    ShowFeatStatus {
        #[arg(long)]
        feat: Option<String>,
    },

    /// Start a task (mints the next T-NNN when --task is omitted)
    StartTask {
        #[arg(long)]
        feat: String,
        #[arg(long)]
        task: Option<String>,
    },

    /// Run the quality gate for an in-progress task
    RunTaskGate {
        #[arg(long)]
        feat: String,
        #[arg(long)]
        task: String,
    },

    /// Emit the structured commit message for a task
    PrepareTaskCommit {
        #[arg(long)]
        feat: String,
        #[arg(long)]
        task: String,
        #[arg(long)]
        summary: String,
        #[arg(long, value_enum, default_value = "done")]
        task_status: TerminalStatus,
        /// Also commit in the feat worktree with the emitted message
        #[arg(long)]
        execute: bool,
    },

    /// Finish an in-progress task as done or blocked
    FinishTask {
        #[arg(long)]
        feat: String,
        #[arg(long)]
        task: String,
        #[arg(long, value_enum)]
        result: TerminalStatus,
    },

    /// Archive a done/abandoned feat: relocate state, drop worktree + branch
    ArchiveFeat {
        #[arg(long)]
        feat: String,
    },

    /// Mark a feat abandoned so it can be archived without completing
    AbandonFeat {
        #[arg(long)]
        feat: String,
    },

    /// Audit SSOT invariants
    ValidateHarness,

    /// Audit SSOT invariants plus VCS drift and thresholds
    DiagnoseHarness,

    /// List indexed feats with task stats (JSON)
    ListFeats,

    /// Dump one feat's state and tasks documents (JSON)
    GetFeat {
        #[arg(long)]
        feat: String,
    },

    /// Filter feats by status, task status, or substring (JSON)
    FilterFeats {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        task_status: Option<String>,
        #[arg(long)]
        contains: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let Some(root) = cli.root else {
        eprintln!("error: --root <dir> is required");
        std::process::exit(2);
    };
    let root = root.as_path();
    let json = cli.json;

    let result = match cli.command {
        Commands::CheckReferenceReadiness { manifest } => {
            cmd::reference::check(root, manifest.as_deref())
        }
        Commands::ValidateReferenceReport { manifest } => {
            cmd::reference::validate(root, manifest.as_deref())
        }
        Commands::InitializeHarness {
            manifest,
            no_strict,
            strict: _,
        } => cmd::init::run(root, !no_strict, manifest.as_deref()),
        Commands::CreateFeat {
            title,
            slug,
            goal,
            manifest,
            no_strict,
            strict: _,
        } => cmd::feat::create(
            root,
            &title,
            slug.as_deref(),
            &goal,
            !no_strict,
            manifest.as_deref(),
            json,
        ),
        Commands::ShowFeatStatus { feat } => cmd::feat::status(root, feat.as_deref(), json),
        Commands::StartTask { feat, task } => cmd::task::start(root, &feat, task.as_deref()),
        Commands::RunTaskGate { feat, task } => cmd::task::gate(root, &feat, &task),
        Commands::PrepareTaskCommit {
            feat,
            task,
            summary,
            task_status,
            execute,
        } => cmd::task::prepare_commit(root, &feat, &task, &summary, task_status.into(), execute),
        Commands::FinishTask { feat, task, result } => {
            cmd::task::finish(root, &feat, &task, result.into())
        }
        Commands::ArchiveFeat { feat } => cmd::feat::archive(root, &feat, json),
        Commands::AbandonFeat { feat } => cmd::feat::abandon(root, &feat),
        Commands::ValidateHarness => cmd::doctor::validate(root, json),
        Commands::DiagnoseHarness => cmd::doctor::diagnose(root, json),
        Commands::ListFeats => cmd::query::list(root),
        Commands::GetFeat { feat } => cmd::query::get(root, &feat),
        Commands::FilterFeats {
            status,
            task_status,
            contains,
        } => cmd::query::filter(
            root,
            status.as_deref(),
            task_status.as_deref(),
            contains.as_deref(),
        ),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        let code = e
            .downcast_ref::<HarnessError>()
            .map(HarnessError::exit_code)
            .unwrap_or(5);
        std::process::exit(code);
    }
}
