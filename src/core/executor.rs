//! External command execution.
//!
//! Spawns processes with captured output. Every call is a single attempt
//! with no retry or timeout; callers decide what to do with a failure.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command as ProcessCommand;

/// Result of executing a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,

    /// Captured standard output
    pub stdout: String,

    /// Captured standard error
    pub stderr: String,

    /// Time taken to execute
    pub duration: Duration,
}

impl ExecutionResult {
    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// A successful result with the given stdout. Handy for scripted runners.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self { code: Some(0), stdout: stdout.into(), stderr: String::new(), duration: Duration::ZERO }
    }

    /// A failed result with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self { code: Some(code), stdout: String::new(), stderr: stderr.into(), duration: Duration::ZERO }
    }
}

/// Something that can run external programs.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` in `cwd`, capturing output.
    async fn run(&self, program: &str, args: &[&str], cwd: &Path) -> std::io::Result<ExecutionResult>;

    /// Run a command line through the platform shell.
    async fn run_shell(&self, command: &str, cwd: &Path) -> std::io::Result<ExecutionResult> {
        let (shell, shell_arg) = get_shell();
        self.run(shell, &[shell_arg, command], cwd).await
    }
}

/// Process-spawning command runner.
#[derive(Debug, Default, Clone, Copy)]
pub struct Executor;

impl Executor {
    /// Create a new executor.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for Executor {
    async fn run(&self, program: &str, args: &[&str], cwd: &Path) -> std::io::Result<ExecutionResult> {
        let start = Instant::now();

        let output = ProcessCommand::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        let result = ExecutionResult {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration: start.elapsed(),
        };
        tracing::debug!(
            "{program} {} exited with {:?} in {:?}",
            args.join(" "),
            result.code,
            result.duration
        );
        Ok(result)
    }
}

/// Get the shell and argument for the current platform.
fn get_shell() -> (&'static str, &'static str) {
    if cfg!(target_os = "windows") {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_simple_command() {
        let result = Executor::new().run_shell("echo hello", Path::new(".")).await.unwrap();
        assert!(result.success());
        assert!(result.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_execute_with_working_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();

        let result = Executor::new().run("ls", &[], dir.path()).await.unwrap();
        assert!(result.stdout.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_execution_result() {
        let executor = Executor::new();

        let result = executor.run_shell("true", Path::new(".")).await.unwrap();
        assert!(result.success());
        assert_eq!(result.code, Some(0));

        let result = executor.run_shell("echo oops >&2; exit 3", Path::new(".")).await.unwrap();
        assert!(!result.success());
        assert_eq!(result.code, Some(3));
        assert!(result.stderr.contains("oops"));
    }

    #[tokio::test]
    async fn test_missing_program_is_io_error() {
        let result = Executor::new().run("devflow-no-such-program", &[], Path::new(".")).await;
        assert!(result.is_err());
    }
}
