//! Named operation catalogue.
//!
//! Lets callers drive the engine with an operation name and a JSON argument
//! object, e.g. `{"name": "start_task", "arguments": {"description": "Add login"}}`.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{WorkflowError, WorkflowResult};
use super::operations::{OperationOutcome, WorkflowEngine};

/// The operations a caller can invoke by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    StartTask,
    MarkBugFixed,
    CreateTests,
    SkipTests,
    RunTests,
    CreateDocumentation,
    CheckReadyToCommit,
    CommitAndPush,
    PerformRelease,
    SkipRelease,
    CompleteTask,
    ForceCompleteTask,
    DropTask,
    GetWorkflowStatus,
    ViewHistory,
    ContinueWorkflow,
    RerunWorkflow,
}

impl Operation {
    pub const ALL: [Self; 17] = [
        Self::StartTask,
        Self::MarkBugFixed,
        Self::CreateTests,
        Self::SkipTests,
        Self::RunTests,
        Self::CreateDocumentation,
        Self::CheckReadyToCommit,
        Self::CommitAndPush,
        Self::PerformRelease,
        Self::SkipRelease,
        Self::CompleteTask,
        Self::ForceCompleteTask,
        Self::DropTask,
        Self::GetWorkflowStatus,
        Self::ViewHistory,
        Self::ContinueWorkflow,
        Self::RerunWorkflow,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StartTask => "start_task",
            Self::MarkBugFixed => "mark_bug_fixed",
            Self::CreateTests => "create_tests",
            Self::SkipTests => "skip_tests",
            Self::RunTests => "run_tests",
            Self::CreateDocumentation => "create_documentation",
            Self::CheckReadyToCommit => "check_ready_to_commit",
            Self::CommitAndPush => "commit_and_push",
            Self::PerformRelease => "perform_release",
            Self::SkipRelease => "skip_release",
            Self::CompleteTask => "complete_task",
            Self::ForceCompleteTask => "force_complete_task",
            Self::DropTask => "drop_task",
            Self::GetWorkflowStatus => "get_workflow_status",
            Self::ViewHistory => "view_history",
            Self::ContinueWorkflow => "continue_workflow",
            Self::RerunWorkflow => "rerun_workflow",
        }
    }

    /// Whether the operation never changes state.
    pub const fn is_read_only(self) -> bool {
        matches!(self, Self::GetWorkflowStatus | Self::ViewHistory)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == wanted)
            .ok_or_else(|| WorkflowError::Validation(format!("Unknown operation '{}'", s.trim())))
    }
}

/// A request to run one named operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl OperationCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), arguments: Value::Null }
    }

    /// Add one argument.
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if !self.arguments.is_object() {
            self.arguments = Value::Object(serde_json::Map::new());
        }
        if let Value::Object(map) = &mut self.arguments {
            map.insert(key.into(), value.into());
        }
        self
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StartTaskArgs {
    description: String,
    #[serde(alias = "type", alias = "task_type")]
    task_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SummaryArgs {
    summary: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ReasonArgs {
    reason: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct OptionalReasonArgs {
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunTestsArgs {
    passed: bool,
    #[serde(default, alias = "test_command")]
    test_command: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DocumentationArgs {
    #[serde(alias = "type", alias = "doc_type")]
    doc_type: Option<String>,
    summary: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CommitArgs {
    #[serde(alias = "commit_message", alias = "message")]
    commit_message: Option<String>,
    branch: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ReleaseArgs {
    command: String,
    #[serde(alias = "release_type", alias = "type")]
    release_type: Option<String>,
    notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct HistoryArgs {
    page: Option<i64>,
    #[serde(alias = "page_size")]
    page_size: Option<i64>,
    #[serde(alias = "start_date")]
    start_date: Option<String>,
    #[serde(alias = "end_date")]
    end_date: Option<String>,
}

fn parse_args<T: DeserializeOwned + Default>(operation: Operation, arguments: Value) -> WorkflowResult<T> {
    if arguments.is_null() {
        return Ok(T::default());
    }
    parse_required(operation, arguments)
}

fn parse_required<T: DeserializeOwned>(operation: Operation, arguments: Value) -> WorkflowResult<T> {
    let arguments = if arguments.is_null() { Value::Object(serde_json::Map::new()) } else { arguments };
    serde_json::from_value(arguments)
        .map_err(|e| WorkflowError::Validation(format!("Invalid arguments for {operation}: {e}")))
}

/// Run `call` against `engine`.
pub async fn dispatch(engine: &mut WorkflowEngine, call: OperationCall) -> WorkflowResult<OperationOutcome> {
    let operation: Operation = call.name.parse()?;
    let arguments = call.arguments;
    tracing::debug!("Dispatching {operation}");

    match operation {
        Operation::StartTask => {
            let args: StartTaskArgs = parse_args(operation, arguments)?;
            engine.start_task(&args.description, args.task_type.as_deref()).await
        }
        Operation::MarkBugFixed => {
            let args: SummaryArgs = parse_args(operation, arguments)?;
            engine.mark_bug_fixed(args.summary.as_deref()).await
        }
        Operation::CreateTests => engine.create_tests().await,
        Operation::SkipTests => {
            let args: ReasonArgs = parse_args(operation, arguments)?;
            engine.skip_tests(&args.reason).await
        }
        Operation::RunTests => {
            let args: RunTestsArgs = parse_required(operation, arguments)?;
            engine.run_tests(args.passed, args.test_command.as_deref(), args.details.as_deref()).await
        }
        Operation::CreateDocumentation => {
            let args: DocumentationArgs = parse_args(operation, arguments)?;
            engine.create_documentation(args.doc_type.as_deref(), args.summary.as_deref()).await
        }
        Operation::CheckReadyToCommit => engine.check_ready_to_commit().await,
        Operation::CommitAndPush => {
            let args: CommitArgs = parse_args(operation, arguments)?;
            engine.commit_and_push(args.commit_message.as_deref(), args.branch.as_deref()).await
        }
        Operation::PerformRelease => {
            let args: ReleaseArgs = parse_args(operation, arguments)?;
            engine
                .perform_release(&args.command, args.release_type.as_deref(), args.notes.as_deref())
                .await
        }
        Operation::SkipRelease => {
            let args: ReasonArgs = parse_args(operation, arguments)?;
            engine.skip_release(&args.reason).await
        }
        Operation::CompleteTask => {
            let args: CommitArgs = parse_args(operation, arguments)?;
            engine.complete_task(args.commit_message.as_deref()).await
        }
        Operation::ForceCompleteTask => {
            let args: OptionalReasonArgs = parse_args(operation, arguments)?;
            engine.force_complete_task(args.reason.as_deref()).await
        }
        Operation::DropTask => {
            let args: OptionalReasonArgs = parse_args(operation, arguments)?;
            engine.drop_task(args.reason.as_deref()).await
        }
        Operation::GetWorkflowStatus => Ok(engine.get_workflow_status()),
        Operation::ViewHistory => {
            let args: HistoryArgs = parse_args(operation, arguments)?;
            engine
                .view_history(args.page, args.page_size, args.start_date.as_deref(), args.end_date.as_deref())
                .await
        }
        Operation::ContinueWorkflow => engine.continue_workflow().await,
        Operation::RerunWorkflow => engine.rerun_workflow().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_names() {
        assert_eq!(Operation::ALL.len(), 17);
        for op in Operation::ALL {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
        }
        assert_eq!("mark-bug-fixed".parse::<Operation>().unwrap(), Operation::MarkBugFixed);
        assert!(matches!("deploy".parse::<Operation>(), Err(WorkflowError::Validation(_))));
    }

    #[test]
    fn test_argument_aliases() {
        let args: StartTaskArgs =
            parse_args(Operation::StartTask, json!({"description": "Fix login", "type": "bugfix"})).unwrap();
        assert_eq!(args.task_type.as_deref(), Some("bugfix"));

        let args: HistoryArgs =
            parse_args(Operation::ViewHistory, json!({"pageSize": 5, "start_date": "2024-01-01"})).unwrap();
        assert_eq!(args.page_size, Some(5));
        assert_eq!(args.start_date.as_deref(), Some("2024-01-01"));

        let args: CommitArgs = parse_args(Operation::CommitAndPush, Value::Null).unwrap();
        assert!(args.commit_message.is_none());
    }

    #[test]
    fn test_run_tests_needs_passed() {
        let err = parse_required::<RunTestsArgs>(Operation::RunTests, Value::Null).unwrap_err();
        assert!(err.to_string().starts_with("Invalid arguments for run_tests"));

        let args: RunTestsArgs =
            parse_required(Operation::RunTests, json!({"passed": true, "testCommand": "npm test"})).unwrap();
        assert!(args.passed);
        assert_eq!(args.test_command.as_deref(), Some("npm test"));
    }

    #[test]
    fn test_call_builder() {
        let call = OperationCall::new("skip_tests").arg("reason", "docs only");
        assert_eq!(call.arguments, json!({"reason": "docs only"}));
    }
}
