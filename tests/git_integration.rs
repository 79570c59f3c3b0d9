//! Git Integration Tests
//!
//! Drives the engine against real repositories created with the `git`
//! binary, each with a bare repository as its `origin`. Skipped when git is
//! not installed.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use tempfile::TempDir;

use devflow::core::{CommandRunner, Executor, Identity, ReleaseConfig};
use devflow::workflow::{
    GitCli, MarkerFiles, Phase, ReleaseType, VersionControl, WorkflowEngine, WorkflowSession,
};

fn git_available() -> bool {
    Command::new("git").arg("--version").output().is_ok_and(|o| o.status.success())
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git").args(args).current_dir(dir).output().unwrap();
    assert!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn write(dir: &Path, path: &str, content: &str) {
    let path = dir.join(path);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// A working repository on `main` with one pushed commit.
struct Repo {
    work: TempDir,
    _origin: TempDir,
}

impl Repo {
    fn new() -> Self {
        let origin = TempDir::new().unwrap();
        git(origin.path(), &["init", "--bare", "--quiet"]);

        let work = TempDir::new().unwrap();
        let dir = work.path();
        git(dir, &["init", "--quiet"]);
        git(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        git(dir, &["config", "user.name", "Devflow Tests"]);
        git(dir, &["config", "user.email", "tests@devflow.invalid"]);
        git(dir, &["config", "commit.gpgsign", "false"]);
        write(dir, "package.json", "{}");
        write(dir, "README.md", "# demo\n");
        git(dir, &["add", "-A"]);
        git(dir, &["commit", "--quiet", "-m", "chore: initial"]);
        git(dir, &["remote", "add", "origin", &origin.path().to_string_lossy()]);
        git(dir, &["push", "--quiet", "origin", "main"]);

        Self { work, _origin: origin }
    }

    fn path(&self) -> &Path {
        self.work.path()
    }

    fn status(&self) -> String {
        git(self.path(), &["status", "--porcelain", "--untracked-files=all"])
    }

    fn git_cli(&self) -> GitCli {
        GitCli::new(self.path())
    }

    async fn engine(&self) -> WorkflowEngine {
        let identity = Identity::new("alice", self.path(), ".devflow");
        let session = WorkflowSession::open(identity, None).await.unwrap();
        let runner: Arc<dyn CommandRunner> = Arc::new(Executor::new());
        WorkflowEngine::new(
            session,
            Arc::new(GitCli::with_runner(self.path(), Arc::clone(&runner))),
            runner,
            Arc::new(MarkerFiles::default()),
            ReleaseConfig::default(),
        )
    }
}

async fn to_commit_phase(engine: &mut WorkflowEngine) {
    engine.start_task("Add login", None).await.unwrap();
    engine.mark_bug_fixed(None).await.unwrap();
    engine.create_tests().await.unwrap();
    engine.run_tests(true, Some("npm test"), None).await.unwrap();
    engine.create_documentation(None, None).await.unwrap();
    engine.check_ready_to_commit().await.unwrap();
    assert_eq!(engine.state().current_phase, Phase::Commit);
}

// ============================================================================
// Version Control
// ============================================================================

#[tokio::test]
async fn test_changed_files_lists_new_files_individually() {
    if !git_available() {
        eprintln!("git not installed; skipping");
        return;
    }
    let repo = Repo::new();
    write(repo.path(), "tests/unit/login.test.js", "test('x')\n");
    write(repo.path(), "docs/guide.md", "# guide\n");
    write(repo.path(), "README.md", "# demo\n\nUsage\n");

    let changed = repo.git_cli().changed_files().await.unwrap();
    assert_eq!(changed, vec!["README.md", "docs/guide.md", "tests/unit/login.test.js"]);
}

#[tokio::test]
async fn test_workflow_files_never_show_as_changes() {
    if !git_available() {
        eprintln!("git not installed; skipping");
        return;
    }
    let repo = Repo::new();
    let mut engine = repo.engine().await;
    engine.start_task("Add login", None).await.unwrap();

    assert!(repo.path().join(".devflow/alice/workflow_state.json").exists());
    assert_eq!(repo.status(), "");
    assert!(repo.git_cli().changed_files().await.unwrap().is_empty());
}

// ============================================================================
// Commit & Release
// ============================================================================

#[tokio::test]
async fn test_commit_then_release() {
    if !git_available() {
        eprintln!("git not installed; skipping");
        return;
    }
    let repo = Repo::new();
    let mut engine = repo.engine().await;
    to_commit_phase(&mut engine).await;

    write(repo.path(), "src/login.js", "export const login = () => {};\n");
    write(repo.path(), "tests/login.test.js", "test('login', () => {});\n");

    let outcome = engine.commit_and_push(None, None).await.unwrap();
    assert_eq!(outcome.state.current_phase, Phase::Release);
    assert_eq!(outcome.state.last_push_branch.as_deref(), Some("main"));

    let message = git(repo.path(), &["log", "-1", "--format=%B"]);
    assert!(message.starts_with("test: update src/login.js and tests/login.test.js"));
    let tracked = git(repo.path(), &["ls-files"]);
    assert!(tracked.contains("tests/login.test.js"));
    assert!(!tracked.contains(".devflow"));
    assert_eq!(git(repo.path(), &["rev-list", "--count", "HEAD", "--not", "--remotes=origin"]).trim(), "0");

    // Saving after the commit leaves the tree clean, so the release goes ahead.
    assert_eq!(repo.status(), "");
    let outcome = engine.perform_release("echo released", None, None).await.unwrap();
    assert!(outcome.state.released);
    assert_eq!(outcome.state.release_type, Some(ReleaseType::Patch));
    assert_eq!(outcome.state.current_phase, Phase::ReadyToComplete);

    let outcome = engine.complete_task(None).await.unwrap();
    assert_eq!(outcome.state.current_phase, Phase::Idle);
    assert_eq!(repo.status(), "");
}

#[tokio::test]
async fn test_commit_rejected_without_test_changes() {
    if !git_available() {
        eprintln!("git not installed; skipping");
        return;
    }
    let repo = Repo::new();
    let mut engine = repo.engine().await;
    to_commit_phase(&mut engine).await;

    write(repo.path(), "src/login.js", "export const login = () => {};\n");
    let err = engine.commit_and_push(None, None).await.unwrap_err();
    assert_eq!(err.to_string(), "Cannot run commit_and_push; unmet: Test changes (none among src/login.js)");
    assert_eq!(git(repo.path(), &["rev-list", "--count", "HEAD"]).trim(), "1");
}

#[tokio::test]
async fn test_clean_tree_pushes_earlier_commit() {
    if !git_available() {
        eprintln!("git not installed; skipping");
        return;
    }
    let repo = Repo::new();
    let mut engine = repo.engine().await;
    to_commit_phase(&mut engine).await;

    // Committed by hand but never pushed.
    write(repo.path(), "tests/login.test.js", "test('login', () => {});\n");
    git(repo.path(), &["add", "-A"]);
    git(repo.path(), &["commit", "--quiet", "-m", "test: add login test"]);
    assert_eq!(repo.git_cli().unpushed_commits("origin").await.unwrap(), 1);

    let outcome = engine.commit_and_push(None, None).await.unwrap();
    assert!(outcome.message.contains("pushed 1 unpushed commits to main"));
    assert!(outcome.state.commit_and_push_completed);
    assert_eq!(repo.git_cli().unpushed_commits("origin").await.unwrap(), 0);
}
