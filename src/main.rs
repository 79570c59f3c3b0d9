//! Devflow - guided task workflow for your repository.
//!
//! Each subcommand runs one workflow operation against the current
//! project and prints the resulting status.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use devflow::core::{migrate_legacy_layout, CommandRunner, Config, Executor, IdentityResolver};
use devflow::storage::{open_store, Frequency, ProjectSummary};
use devflow::workflow::{
    dispatch, GitCli, MarkerFiles, OperationCall, OperationOutcome, SyncOutcome, WorkflowEngine,
    WorkflowSession,
};

/// Guided task workflow for your repository
#[derive(Parser)]
#[command(name = "devflow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Subcommand to run (shows status when omitted)
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Project directory (defaults to the current directory)
    #[arg(short = 'C', long, global = true)]
    dir: Option<PathBuf>,

    /// User id to act as
    #[arg(long, global = true)]
    user: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Keep state local; skip the database
    #[arg(long, global = true)]
    no_db: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new task, replacing any current one
    #[command(alias = "start")]
    StartTask {
        /// What the task is about
        description: String,

        /// Task type (feature, bugfix, refactor, ...)
        #[arg(short = 't', long = "type")]
        task_type: Option<String>,
    },

    /// Record that the change is implemented
    #[command(alias = "fixed")]
    MarkBugFixed {
        /// Short summary of the fix
        #[arg(short, long)]
        summary: Option<String>,
    },

    /// Record that tests were written
    CreateTests,

    /// Skip testing for this task
    SkipTests {
        /// Why tests are not needed
        reason: String,
    },

    /// Record a test run
    #[command(alias = "test")]
    RunTests {
        /// The run failed
        #[arg(long)]
        failed: bool,

        /// Command used to run the tests
        #[arg(short, long)]
        command: Option<String>,

        /// Notes about the run
        #[arg(short, long)]
        details: Option<String>,
    },

    /// Record that documentation was written
    #[command(alias = "docs")]
    CreateDocumentation {
        /// Kind of documentation (readme, changelog, ...)
        #[arg(short = 't', long = "type")]
        doc_type: Option<String>,

        /// What was documented
        #[arg(short, long)]
        summary: Option<String>,
    },

    /// Run the pre-commit checklist
    #[command(alias = "ready")]
    CheckReadyToCommit,

    /// Stage, commit and push all changes
    #[command(alias = "commit")]
    CommitAndPush {
        /// Commit message (generated from the changed files when omitted)
        #[arg(short, long)]
        message: Option<String>,

        /// Branch to push to
        #[arg(short, long)]
        branch: Option<String>,
    },

    /// Run the release command and push tags
    #[command(alias = "release")]
    PerformRelease {
        /// Release command, or major/minor/patch to use the configured one
        command: String,

        /// Release type when it cannot be inferred from the command
        #[arg(short = 't', long = "type")]
        release_type: Option<String>,

        /// Release notes
        #[arg(short, long)]
        notes: Option<String>,
    },

    /// Finish without releasing
    SkipRelease {
        /// Why no release is needed
        reason: String,
    },

    /// Record the task in history and return to idle
    #[command(alias = "complete")]
    CompleteTask {
        /// Commit message to record (defaults to the last commit)
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Close the current task regardless of progress
    #[command(alias = "force-complete")]
    ForceCompleteTask {
        /// Why the task is being closed early
        reason: Option<String>,
    },

    /// Abandon the current task
    #[command(alias = "drop")]
    DropTask {
        /// Why the task was dropped
        reason: Option<String>,
    },

    /// Show the current phase and checklist
    #[command(name = "status", alias = "get-workflow-status")]
    Status,

    /// List completed tasks, newest first
    #[command(name = "history", alias = "view-history")]
    History {
        /// Page number
        #[arg(short, long)]
        page: Option<i64>,

        /// Entries per page (1-100)
        #[arg(short = 's', long)]
        page_size: Option<i64>,

        /// Earliest date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,

        /// Latest date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,
    },

    /// Show project totals and task counts per period
    Stats {
        /// Bucket size (daily, monthly, yearly)
        #[arg(short, long, default_value = "daily")]
        frequency: String,

        /// Earliest date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,

        /// Latest date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,
    },

    /// Run the next step when it needs no input
    #[command(alias = "continue")]
    ContinueWorkflow,

    /// Restart the current task from the coding phase
    #[command(alias = "rerun")]
    RerunWorkflow,

    /// Run an operation by name with JSON arguments
    Call {
        /// Operation name, e.g. start_task
        name: String,

        /// Arguments as a JSON object
        arguments: Option<String>,
    },

    /// Show configuration
    Config {
        /// Show config file path
        #[arg(long)]
        path: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

fn main() -> Result<()> {
    let mut cli = Cli::parse();
    dotenvy::dotenv().ok();

    // Setup logging
    let filter = if cli.verbose { EnvFilter::new("debug") } else { EnvFilter::new("warn") };

    tracing_subscriber::registry().with(fmt::layer().with_target(false)).with(filter).init();

    // Handle commands
    match cli.command.take().unwrap_or(Commands::Status) {
        Commands::Completions { shell } => {
            cmd_completions(shell);
            Ok(())
        }
        Commands::Config { path } => cmd_config(&cli, path),
        command => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(cmd_workflow(&cli, command))
        }
    }
}

fn project_dir(cli: &Cli) -> Result<PathBuf> {
    match &cli.dir {
        Some(dir) => Ok(dir.clone()),
        None => std::env::current_dir().context("Could not determine current directory"),
    }
}

/// Wire the engine for the project in `cli.dir`.
async fn build_engine(cli: &Cli) -> Result<WorkflowEngine> {
    let dir = project_dir(cli)?;
    let config = Config::load_in(&dir)?;

    let user = cli.user.clone().or_else(|| config.general.user_id.clone());
    let mut resolver = IdentityResolver::new(dir)
        .with_state_dir(config.general.state_dir.clone())
        .with_user_override(user);
    let identity = resolver.resolve().clone();
    if let Err(e) = identity.ensure_state_dir() {
        tracing::warn!("Could not prepare {}: {e}", identity.state_dir.display());
    }
    migrate_legacy_layout(&identity);

    let store = if config.database.enabled && !cli.no_db {
        match open_store(&config.database, &identity.default_database_path()) {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::warn!("Database disabled: {e}");
                None
            }
        }
    } else {
        None
    };

    let root = identity.project_path.clone();
    let session = WorkflowSession::open(identity, store).await?;
    let runner: Arc<dyn CommandRunner> = Arc::new(Executor::new());
    let vcs = Arc::new(GitCli::with_runner(root, Arc::clone(&runner)));
    let docs = Arc::new(MarkerFiles::new(config.workflow.doc_markers.clone()));

    Ok(WorkflowEngine::new(session, vcs, runner, docs, config.release))
}

/// Run one workflow subcommand.
async fn cmd_workflow(cli: &Cli, command: Commands) -> Result<()> {
    let mut engine = build_engine(cli).await?;

    let outcome = match command {
        Commands::StartTask { description, task_type } => {
            engine.start_task(&description, task_type.as_deref()).await?
        }
        Commands::MarkBugFixed { summary } => engine.mark_bug_fixed(summary.as_deref()).await?,
        Commands::CreateTests => engine.create_tests().await?,
        Commands::SkipTests { reason } => engine.skip_tests(&reason).await?,
        Commands::RunTests { failed, command, details } => {
            engine.run_tests(!failed, command.as_deref(), details.as_deref()).await?
        }
        Commands::CreateDocumentation { doc_type, summary } => {
            engine.create_documentation(doc_type.as_deref(), summary.as_deref()).await?
        }
        Commands::CheckReadyToCommit => engine.check_ready_to_commit().await?,
        Commands::CommitAndPush { message, branch } => {
            engine.commit_and_push(message.as_deref(), branch.as_deref()).await?
        }
        Commands::PerformRelease { command, release_type, notes } => {
            engine.perform_release(&command, release_type.as_deref(), notes.as_deref()).await?
        }
        Commands::SkipRelease { reason } => engine.skip_release(&reason).await?,
        Commands::CompleteTask { message } => engine.complete_task(message.as_deref()).await?,
        Commands::ForceCompleteTask { reason } => engine.force_complete_task(reason.as_deref()).await?,
        Commands::DropTask { reason } => engine.drop_task(reason.as_deref()).await?,
        Commands::Status => engine.get_workflow_status(),
        Commands::History { page, page_size, start, end } => {
            engine.view_history(page, page_size, start.as_deref(), end.as_deref()).await?
        }
        Commands::Stats { frequency, start, end } => {
            return cmd_stats(cli, &engine, &frequency, start.as_deref(), end.as_deref()).await;
        }
        Commands::ContinueWorkflow => engine.continue_workflow().await?,
        Commands::RerunWorkflow => engine.rerun_workflow().await?,
        Commands::Call { name, arguments } => {
            let arguments = match arguments.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
                Some(raw) => serde_json::from_str(raw).context("Arguments must be a JSON object")?,
                None => serde_json::Value::Null,
            };
            dispatch(&mut engine, OperationCall { name, arguments }).await?
        }
        Commands::Config { path } => return cmd_config(cli, path),
        Commands::Completions { shell } => {
            cmd_completions(shell);
            return Ok(());
        }
    };

    print_outcome(&outcome, cli.json)
}

fn print_outcome(outcome: &OperationOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    println!("{}", outcome.message);
    if let Some(SyncOutcome::Failed(reason)) = &outcome.sync {
        eprintln!("warning: saved locally, database sync failed: {reason}");
    }
    Ok(())
}

/// Show project totals and per-period counts.
async fn cmd_stats(
    cli: &Cli,
    engine: &WorkflowEngine,
    frequency: &str,
    start: Option<&str>,
    end: Option<&str>,
) -> Result<()> {
    let frequency: Frequency = frequency.parse().map_err(anyhow::Error::msg)?;
    let buckets = engine.history_summary(frequency, start, end).await?;

    let summary = match engine.session().stored_summary().await {
        Ok(Some(summary)) => summary,
        Ok(None) => ProjectSummary::from_history(&engine.state().history),
        Err(e) => {
            tracing::warn!("Using local history for totals: {e}");
            ProjectSummary::from_history(&engine.state().history)
        }
    };

    if cli.json {
        let report = serde_json::json!({ "summary": summary, "buckets": buckets });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Total tasks: {}", summary.total_tasks);
    if let Some(last) = &summary.last_active {
        println!("Last active: {last}");
    }
    for (task_type, count) in &summary.task_types {
        println!("  {task_type}: {count}");
    }

    if buckets.is_empty() {
        println!("\nNo tasks in range");
        return Ok(());
    }
    println!("\n{:<12} {:>6} {:>7} {:>8}", frequency.as_str(), "total", "forced", "dropped");
    for bucket in &buckets {
        println!("{:<12} {:>6} {:>7} {:>8}", bucket.period, bucket.total, bucket.forced, bucket.dropped);
    }
    Ok(())
}

/// Generate shell completions.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "devflow", &mut io::stdout());
}

/// Show configuration.
fn cmd_config(cli: &Cli, show_path: bool) -> Result<()> {
    if show_path {
        if let Some(path) = Config::config_dir() {
            println!("{}", path.display());
        }
        return Ok(());
    }

    let config = Config::load_in(&project_dir(cli)?)?;
    let toml = toml::to_string_pretty(&config)?;
    println!("{toml}");

    Ok(())
}
