//! Guarded workflow operations.
//!
//! Each operation checks its preconditions against the in-memory state,
//! mutates it, saves, and returns an [`OperationOutcome`]. Guard and
//! validation failures leave the state untouched unless noted otherwise.

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;

use super::checks::DocumentationCheck;
use super::error::{WorkflowError, WorkflowResult};
use super::heuristics::{
    format_file_list, infer_release_type, is_test_path, synthesize_commit_message, ReleaseType,
};
use super::phase::Phase;
use super::session::{SyncOutcome, WorkflowSession};
use super::state::WorkflowState;
use super::vcs::VersionControl;
use crate::core::{CommandRunner, ReleaseConfig};
use crate::storage::{DateRange, Frequency, HistoryBucket, HistoryEntry, HistoryPage, HistoryQuery};

/// What an operation reports back.
#[derive(Debug, Clone, Serialize)]
pub struct OperationOutcome {
    /// Human-readable status
    pub message: String,
    /// State after the operation
    pub state: WorkflowState,
    /// Store sync result; `None` for read-only operations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncOutcome>,
    /// History page for `view_history`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<HistoryPage>,
}

/// The workflow state machine and its collaborators.
pub struct WorkflowEngine {
    session: WorkflowSession,
    vcs: Arc<dyn VersionControl>,
    runner: Arc<dyn CommandRunner>,
    docs: Arc<dyn DocumentationCheck>,
    release: ReleaseConfig,
}

impl WorkflowEngine {
    pub fn new(
        session: WorkflowSession,
        vcs: Arc<dyn VersionControl>,
        runner: Arc<dyn CommandRunner>,
        docs: Arc<dyn DocumentationCheck>,
        release: ReleaseConfig,
    ) -> Self {
        Self { session, vcs, runner, docs, release }
    }

    pub fn state(&self) -> &WorkflowState {
        self.session.state()
    }

    pub fn session(&self) -> &WorkflowSession {
        &self.session
    }

    fn state_mut(&mut self) -> &mut WorkflowState {
        self.session.state_mut()
    }

    async fn saved(&mut self, message: String) -> WorkflowResult<OperationOutcome> {
        let report = self.session.save().await?;
        Ok(OperationOutcome {
            message,
            state: self.session.state().clone(),
            sync: Some(report.sync),
            page: None,
        })
    }

    fn read_only(&self, message: String) -> OperationOutcome {
        OperationOutcome { message, state: self.session.state().clone(), sync: None, page: None }
    }

    fn with_next_step(&self, message: &str) -> String {
        format!("{message}\nNext: {}", self.state().next_step())
    }

    /// Begin a task, discarding progress on any current one.
    pub async fn start_task(
        &mut self,
        description: &str,
        task_type: Option<&str>,
    ) -> WorkflowResult<OperationOutcome> {
        let description = required(description, "Task description is required")?;
        let task_type = task_type.map(str::trim).filter(|t| !t.is_empty()).unwrap_or("feature");

        if self.state().has_active_task() {
            tracing::info!("Replacing active task '{}'", self.state().task_description);
        }
        self.state_mut().begin_task(description, task_type);
        tracing::info!("Started {task_type} task '{description}'");

        let message = self.with_next_step(&format!("Started {task_type} task: {description}"));
        self.saved(message).await
    }

    /// Record that the change itself is done.
    pub async fn mark_bug_fixed(&mut self, summary: Option<&str>) -> WorkflowResult<OperationOutcome> {
        if self.state().current_phase.is_idle() {
            return Err(WorkflowError::guard("mark_bug_fixed", ["Task started"]));
        }

        let summary = optional(summary);
        let state = self.state_mut();
        let message = if state.bug_fixed {
            // Re-marking keeps test and doc progress; only the ready check is redone.
            state.ready_check_completed = false;
            state.current_phase = if state.tests_passed && state.documentation_created {
                Phase::Ready
            } else {
                Phase::Testing
            };
            "Fix already recorded; progress kept"
        } else {
            state.bug_fixed = true;
            state.clear_after_fix();
            state.current_phase = Phase::Testing;
            "Fix recorded"
        };
        if summary.is_some() {
            state.bug_fix_summary = summary;
        }

        let message = self.with_next_step(message);
        self.saved(message).await
    }

    pub async fn create_tests(&mut self) -> WorkflowResult<OperationOutcome> {
        if !self.state().bug_fixed {
            return Err(WorkflowError::guard("create_tests", ["Bug fixed"]));
        }

        let state = self.state_mut();
        state.tests_created = true;
        if state.tests_skipped {
            state.tests_skipped = false;
            state.tests_skipped_reason = None;
            state.tests_passed = false;
        }
        state.ready_check_completed = false;
        state.current_phase = Phase::Testing;

        let message = self.with_next_step("Tests created");
        self.saved(message).await
    }

    pub async fn skip_tests(&mut self, reason: &str) -> WorkflowResult<OperationOutcome> {
        if !self.state().bug_fixed {
            return Err(WorkflowError::guard("skip_tests", ["Bug fixed"]));
        }
        let reason = required(reason, "A reason is required to skip tests")?;

        let state = self.state_mut();
        state.tests_created = true;
        state.tests_passed = true;
        state.tests_skipped = true;
        state.tests_skipped_reason = Some(reason.to_string());
        state.current_phase = Phase::Documentation;

        let message = self.with_next_step(&format!("Tests skipped: {reason}"));
        self.saved(message).await
    }

    /// Record a test run. A failing run is not an error; it keeps the task in testing.
    pub async fn run_tests(
        &mut self,
        passed: bool,
        test_command: Option<&str>,
        details: Option<&str>,
    ) -> WorkflowResult<OperationOutcome> {
        if !self.state().tests_created {
            return Err(WorkflowError::guard("run_tests", ["Tests created"]));
        }

        let state = self.state_mut();
        if let Some(command) = optional(test_command) {
            state.test_command = Some(command);
        }
        state.test_details = optional(details);

        let message = if passed {
            state.tests_passed = true;
            state.tests_skipped = false;
            state.tests_skipped_reason = None;
            state.current_phase = Phase::Documentation;
            "Tests passed"
        } else {
            state.tests_passed = false;
            state.ready_check_completed = false;
            state.current_phase = Phase::Testing;
            "Tests failed; fix them and run again"
        };
        tracing::info!("{message}");

        let message = self.with_next_step(message);
        self.saved(message).await
    }

    pub async fn create_documentation(
        &mut self,
        doc_type: Option<&str>,
        summary: Option<&str>,
    ) -> WorkflowResult<OperationOutcome> {
        if !self.state().tests_passed {
            return Err(WorkflowError::guard("create_documentation", ["Tests passed"]));
        }
        let root = self.session.identity().project_path.clone();
        if !self.docs.has_documentation(&root) {
            return Err(WorkflowError::guard("create_documentation", [self.docs.describe()]));
        }

        let state = self.state_mut();
        state.documentation_created = true;
        state.documentation_type = optional(doc_type);
        state.documentation_summary = optional(summary);
        state.current_phase = Phase::Ready;

        let message = self.with_next_step("Documentation recorded");
        self.saved(message).await
    }

    /// Evaluate the readiness checks. A failure still records the result.
    pub async fn check_ready_to_commit(&mut self) -> WorkflowResult<OperationOutcome> {
        let unmet = self.state().unmet_checks();
        let checklist = render_checklist(self.state());

        self.state_mut().ready_check_completed = unmet.is_empty();
        if !unmet.is_empty() {
            self.session.save().await?;
            return Err(WorkflowError::GuardViolation {
                operation: "check_ready_to_commit".to_string(),
                unmet,
            });
        }
        let state = self.state_mut();
        state.current_phase = state.phase_after_ready_check();

        let message = self.with_next_step(&format!("All checks passed\n{checklist}"));
        self.saved(message).await
    }

    /// Stage, commit and push the working tree.
    pub async fn commit_and_push(
        &mut self,
        commit_message: Option<&str>,
        branch: Option<&str>,
    ) -> WorkflowResult<OperationOutcome> {
        if !self.state().ready_check_completed {
            return Err(WorkflowError::guard("commit_and_push", ["Ready check completed"]));
        }

        let changed = self.vcs.changed_files().await?;
        if changed.is_empty() {
            return self.finish_clean_commit(branch).await;
        }

        if !self.state().tests_skipped && !changed.iter().any(|p| is_test_path(p)) {
            return Err(WorkflowError::guard(
                "commit_and_push",
                [format!("Test changes (none among {})", format_file_list(&changed))],
            ));
        }

        self.vcs.stage_all().await?;
        let mut staged = self.vcs.staged_files().await?;
        if staged.is_empty() {
            staged = changed;
        }
        let message = match optional(commit_message) {
            Some(message) => message,
            None => synthesize_commit_message(&staged),
        };
        self.vcs.commit(&message).await?;

        let branch = self.resolve_branch(branch).await?;
        self.vcs.push(&self.release.remote, &branch, false).await?;
        tracing::info!("Committed {} files and pushed to {branch}", staged.len());

        let summary = message.lines().next().unwrap_or_default().to_string();
        let state = self.state_mut();
        state.commit_and_push_completed = true;
        state.last_commit_message = Some(message);
        state.last_push_branch = Some(branch.clone());
        state.current_phase = state.phase_after_commit();

        let message = self.with_next_step(&format!("Committed \"{summary}\" and pushed to {branch}"));
        self.saved(message).await
    }

    /// Nothing to commit: push what an earlier attempt committed, then advance.
    async fn finish_clean_commit(&mut self, branch: Option<&str>) -> WorkflowResult<OperationOutcome> {
        let unpushed = self.vcs.unpushed_commits(&self.release.remote).await?;
        let message = if unpushed > 0 {
            let branch = self.resolve_branch(branch).await?;
            self.vcs.push(&self.release.remote, &branch, false).await?;
            tracing::info!("Pushed {unpushed} earlier commits to {branch}");
            self.state_mut().last_push_branch = Some(branch.clone());
            format!("Working tree clean; pushed {unpushed} unpushed commits to {branch}")
        } else {
            "Working tree clean; treating the task as committed".to_string()
        };

        let state = self.state_mut();
        state.commit_and_push_completed = true;
        state.current_phase = state.phase_after_commit();
        let message = self.with_next_step(&message);
        self.saved(message).await
    }

    async fn resolve_branch(&self, explicit: Option<&str>) -> WorkflowResult<String> {
        if let Some(branch) = optional(explicit) {
            return Ok(branch);
        }
        if let Some(branch) = self.vcs.primary_branch(&self.release.remote).await? {
            return Ok(branch);
        }
        self.vcs
            .current_branch()
            .await?
            .ok_or_else(|| WorkflowError::Validation("Cannot determine a branch to push; pass one explicitly".into()))
    }

    /// Run the release command and push tags.
    ///
    /// `command` may be a bare `major`/`minor`/`patch`, in which case the
    /// configured release command template is used.
    pub async fn perform_release(
        &mut self,
        command: &str,
        release_type: Option<&str>,
        notes: Option<&str>,
    ) -> WorkflowResult<OperationOutcome> {
        if !self.state().commit_and_push_completed {
            return Err(WorkflowError::guard("perform_release", ["Commit and push completed"]));
        }
        let command = required(command, "A release command is required")?;
        let explicit_type = match optional(release_type) {
            Some(raw) => Some(raw.parse::<ReleaseType>().map_err(WorkflowError::Validation)?),
            None => None,
        };

        let changed = self.vcs.changed_files().await?;
        if !changed.is_empty() {
            let state = self.state_mut();
            state.clear_after_commit_check();
            state.current_phase = Phase::Commit;
            self.session.save().await?;
            tracing::warn!("Release refused; {} files changed since the last commit", changed.len());
            return Err(WorkflowError::StaleState { changed });
        }

        let (release_type, command) = match command.parse::<ReleaseType>() {
            Ok(bare) => (bare, self.release.command.replace("{type}", bare.as_str())),
            Err(_) => {
                let inferred = explicit_type.unwrap_or_else(|| {
                    infer_release_type(self.state().last_commit_message.as_deref().unwrap_or_default())
                });
                (inferred, command.to_string())
            }
        };

        let root = self.session.identity().project_path.clone();
        let result = self
            .runner
            .run_shell(&command, &root)
            .await
            .map_err(|e| WorkflowError::spawn_failed(&command, &e))?;
        if !result.success() {
            return Err(WorkflowError::ExternalCommand {
                command,
                code: result.code,
                stdout: result.stdout,
                stderr: result.stderr,
            });
        }

        let last_branch = self.state().last_push_branch.clone();
        let branch = self.resolve_branch(last_branch.as_deref()).await?;
        self.vcs.push(&self.release.remote, &branch, true).await?;
        tracing::info!("Released {release_type} with `{command}`");

        let state = self.state_mut();
        state.released = true;
        state.release_skipped = false;
        state.release_skipped_reason = None;
        state.release_command = Some(command.clone());
        state.release_type = Some(release_type);
        state.release_notes = optional(notes);
        state.current_phase = Phase::ReadyToComplete;

        let message = self.with_next_step(&format!("Released {release_type} with `{command}`"));
        self.saved(message).await
    }

    pub async fn skip_release(&mut self, reason: &str) -> WorkflowResult<OperationOutcome> {
        if !self.state().commit_and_push_completed {
            return Err(WorkflowError::guard("skip_release", ["Commit and push completed"]));
        }
        let reason = required(reason, "A reason is required to skip the release")?;

        let state = self.state_mut();
        state.released = false;
        state.release_skipped = true;
        state.release_skipped_reason = Some(reason.to_string());
        state.current_phase = Phase::ReadyToComplete;

        let message = self.with_next_step(&format!("Release skipped: {reason}"));
        self.saved(message).await
    }

    /// Record the finished task and return to idle.
    pub async fn complete_task(&mut self, commit_message: Option<&str>) -> WorkflowResult<OperationOutcome> {
        let phase = self.state().current_phase;
        if phase != Phase::ReadyToComplete {
            return Err(WorkflowError::guard(
                "complete_task",
                [format!("Phase ready_to_complete (currently {phase})")],
            ));
        }

        let state = self.state();
        let message = optional(commit_message)
            .or_else(|| state.last_commit_message.clone())
            .unwrap_or_default();
        let entry = HistoryEntry::new(state.task_description.clone(), state.task_type.clone(), message);
        let text = format!("Completed: {}", entry.task_description);

        self.session.record_history(entry);
        self.saved(text).await
    }

    /// Close the active task regardless of progress.
    pub async fn force_complete_task(&mut self, reason: Option<&str>) -> WorkflowResult<OperationOutcome> {
        let entry = self.closing_entry("force_complete_task")?.forced(optional(reason));
        let text = format!("Force-completed: {}", entry.task_description);
        tracing::warn!("{text}");

        self.session.record_history(entry);
        self.saved(text).await
    }

    /// Abandon the active task.
    pub async fn drop_task(&mut self, reason: Option<&str>) -> WorkflowResult<OperationOutcome> {
        let entry = self.closing_entry("drop_task")?.dropped(optional(reason));
        let text = format!("Dropped: {}", entry.task_description);

        self.session.record_history(entry);
        self.saved(text).await
    }

    fn closing_entry(&self, operation: &str) -> WorkflowResult<HistoryEntry> {
        let state = self.state();
        if !state.has_active_task() {
            return Err(WorkflowError::guard(operation, ["Active task"]));
        }
        let commit_message = state.last_commit_message.clone().unwrap_or_default();
        Ok(HistoryEntry::new(state.task_description.clone(), state.task_type.clone(), commit_message))
    }

    /// Describe the current phase, checklist and next step.
    pub fn get_workflow_status(&self) -> OperationOutcome {
        self.read_only(render_status(self.state()))
    }

    /// One page of history, newest first.
    pub async fn view_history(
        &self,
        page: Option<i64>,
        page_size: Option<i64>,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> WorkflowResult<OperationOutcome> {
        let range = parse_range(start_date, end_date)?;
        let query = HistoryQuery::new(page.unwrap_or(1), page_size.unwrap_or(i64::from(crate::storage::DEFAULT_PAGE_SIZE)))
            .with_range(range);
        let page = self.session.history_page(&query).await;

        let mut message = format!(
            "History page {} of {} ({} tasks)",
            page.page,
            page.total_pages.max(1),
            page.total_entries
        );
        for entry in &page.entries {
            let marker = if entry.forced {
                " [forced]"
            } else if entry.dropped {
                " [dropped]"
            } else {
                ""
            };
            let _ = write!(message, "\n{}  {} ({}){marker}", entry.date(), entry.task_description, entry.task_type);
        }

        let mut outcome = self.read_only(message);
        outcome.page = Some(page);
        Ok(outcome)
    }

    /// Task counts per day, month or year.
    pub async fn history_summary(
        &self,
        frequency: Frequency,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> WorkflowResult<Vec<HistoryBucket>> {
        let range = parse_range(start_date, end_date)?;
        Ok(self.session.history_buckets(&range, frequency).await)
    }

    /// Advance automatically where the next step needs no input.
    pub async fn continue_workflow(&mut self) -> WorkflowResult<OperationOutcome> {
        match self.state().current_phase {
            Phase::Ready => {
                let checked = self.check_ready_to_commit().await?;
                if self.state().current_phase != Phase::Commit {
                    return Ok(checked);
                }
                let committed = self.commit_and_push(None, None).await?;
                Ok(OperationOutcome {
                    message: format!("{}\n{}", first_line(&checked.message), committed.message),
                    ..committed
                })
            }
            Phase::Commit if self.state().ready_check_completed => self.commit_and_push(None, None).await,
            _ => Ok(self.read_only(format!(
                "Nothing to run automatically in phase {}\nNext: {}",
                self.state().current_phase,
                self.state().next_step()
            ))),
        }
    }

    /// Restart the current task from the coding phase.
    pub async fn rerun_workflow(&mut self) -> WorkflowResult<OperationOutcome> {
        let state = self.state();
        if state.task_description.trim().is_empty() {
            return Err(WorkflowError::guard("rerun_workflow", ["Current task"]));
        }
        let description = state.task_description.clone();
        let task_type = state.task_type.clone();
        self.start_task(&description, Some(&task_type)).await
    }
}

fn required<'a>(value: &'a str, message: &str) -> WorkflowResult<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(WorkflowError::Validation(message.to_string()));
    }
    Ok(value)
}

fn optional(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(String::from)
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

fn parse_date(raw: Option<&str>, label: &str) -> WorkflowResult<Option<NaiveDate>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        // Accept full timestamps too; only the date part matters.
        Some(value) => NaiveDate::parse_from_str(value.get(..10).unwrap_or(value), "%Y-%m-%d")
            .map(Some)
            .map_err(|_| WorkflowError::Validation(format!("Invalid {label} '{value}', expected YYYY-MM-DD"))),
        None => Ok(None),
    }
}

fn parse_range(start: Option<&str>, end: Option<&str>) -> WorkflowResult<DateRange> {
    Ok(DateRange::new(parse_date(start, "start date")?, parse_date(end, "end date")?))
}

fn render_checklist(state: &WorkflowState) -> String {
    state
        .readiness()
        .iter()
        .map(|check| format!("  [{}] {}", if check.passed { "x" } else { " " }, check.name))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_status(state: &WorkflowState) -> String {
    if !state.has_active_task() {
        return format!(
            "No active task ({} completed)\nNext: {}",
            state.history.len(),
            state.next_step()
        );
    }

    let mut out = format!(
        "Task: {} ({})\nPhase: {} ({})\n{}",
        state.task_description,
        state.task_type,
        state.current_phase.label(),
        state.current_phase,
        render_checklist(state)
    );
    if state.tests_skipped {
        let _ = write!(out, "\nTests skipped: {}", state.tests_skipped_reason.as_deref().unwrap_or("-"));
    }
    if let Some(message) = &state.last_commit_message {
        let _ = write!(out, "\nLast commit: {}", first_line(message));
    }
    if state.released {
        let _ = write!(out, "\nReleased: {}", state.release_command.as_deref().unwrap_or("-"));
    } else if state.release_skipped {
        let _ = write!(out, "\nRelease skipped: {}", state.release_skipped_reason.as_deref().unwrap_or("-"));
    }
    let _ = write!(out, "\nNext: {}", state.next_step());
    out
}
