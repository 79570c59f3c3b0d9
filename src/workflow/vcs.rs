//! Version control collaborator.
//!
//! The workflow only needs a handful of git porcelain commands; they are run
//! as plain subprocesses and only exit code, stdout and stderr are used.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use super::error::{WorkflowError, WorkflowResult};
use crate::core::{CommandRunner, ExecutionResult, Executor};

/// Operations the workflow performs against version control.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Paths with uncommitted changes, including untracked files.
    async fn changed_files(&self) -> WorkflowResult<Vec<String>>;

    /// Stage every change.
    async fn stage_all(&self) -> WorkflowResult<()>;

    /// Paths currently staged.
    async fn staged_files(&self) -> WorkflowResult<Vec<String>>;

    async fn commit(&self, message: &str) -> WorkflowResult<()>;

    /// Push `branch` to `remote`, optionally with tags.
    async fn push(&self, remote: &str, branch: &str, follow_tags: bool) -> WorkflowResult<()>;

    /// Checked-out branch, `None` when detached.
    async fn current_branch(&self) -> WorkflowResult<Option<String>>;

    /// Default branch advertised by `remote`, if known.
    async fn primary_branch(&self, remote: &str) -> WorkflowResult<Option<String>>;

    /// Commits reachable from HEAD that no branch of `remote` contains.
    async fn unpushed_commits(&self, remote: &str) -> WorkflowResult<u64>;
}

/// [`VersionControl`] backed by the `git` executable.
#[derive(Clone)]
pub struct GitCli {
    root: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl GitCli {
    /// Git in `root`, spawning real processes.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_runner(root, Arc::new(Executor::new()))
    }

    pub fn with_runner(root: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self { root: root.into(), runner }
    }

    async fn raw(&self, args: &[&str]) -> WorkflowResult<ExecutionResult> {
        let command = format!("git {}", args.join(" "));
        self.runner
            .run("git", args, &self.root)
            .await
            .map_err(|e| WorkflowError::spawn_failed(&command, &e))
    }

    async fn git(&self, args: &[&str]) -> WorkflowResult<String> {
        let result = self.raw(args).await?;
        if !result.success() {
            return Err(WorkflowError::ExternalCommand {
                command: format!("git {}", args.join(" ")),
                code: result.code,
                stdout: result.stdout,
                stderr: result.stderr,
            });
        }
        Ok(result.stdout)
    }
}

/// Paths from `git status --porcelain` output. Renames report the new path.
pub fn parse_porcelain(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.get(3..))
        .map(|path| {
            let path = path.rsplit_once(" -> ").map_or(path, |(_, to)| to);
            path.trim().trim_matches('"').to_string()
        })
        .filter(|path| !path.is_empty())
        .collect()
}

fn non_empty_lines(output: &str) -> Vec<String> {
    output.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect()
}

#[async_trait]
impl VersionControl for GitCli {
    async fn changed_files(&self) -> WorkflowResult<Vec<String>> {
        // Untracked directories are expanded so every new file is listed.
        Ok(parse_porcelain(&self.git(&["status", "--porcelain", "--untracked-files=all"]).await?))
    }

    async fn stage_all(&self) -> WorkflowResult<()> {
        self.git(&["add", "-A"]).await.map(|_| ())
    }

    async fn staged_files(&self) -> WorkflowResult<Vec<String>> {
        Ok(non_empty_lines(&self.git(&["diff", "--cached", "--name-only"]).await?))
    }

    async fn commit(&self, message: &str) -> WorkflowResult<()> {
        self.git(&["commit", "-m", message]).await.map(|_| ())
    }

    async fn push(&self, remote: &str, branch: &str, follow_tags: bool) -> WorkflowResult<()> {
        let mut args = vec!["push"];
        if follow_tags {
            args.push("--follow-tags");
        }
        args.extend([remote, branch]);
        self.git(&args).await.map(|_| ())
    }

    async fn current_branch(&self) -> WorkflowResult<Option<String>> {
        let branch = self.git(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        let branch = branch.trim();
        Ok((!branch.is_empty() && branch != "HEAD").then(|| branch.to_string()))
    }

    async fn primary_branch(&self, remote: &str) -> WorkflowResult<Option<String>> {
        let reference = format!("refs/remotes/{remote}/HEAD");
        // Exits non-zero when the remote HEAD was never fetched.
        let result = self.raw(&["symbolic-ref", &reference]).await?;
        if !result.success() {
            return Ok(None);
        }
        let prefix = format!("refs/remotes/{remote}/");
        Ok(result
            .stdout
            .trim()
            .strip_prefix(&prefix)
            .filter(|b| !b.is_empty())
            .map(String::from))
    }

    async fn unpushed_commits(&self, remote: &str) -> WorkflowResult<u64> {
        let remotes = format!("--remotes={remote}");
        // Fails on an unborn HEAD, which has nothing to push.
        let result = self.raw(&["rev-list", "--count", "HEAD", "--not", &remotes]).await?;
        if !result.success() {
            return Ok(0);
        }
        Ok(result.stdout.trim().parse().unwrap_or(0))
    }
}
