//! Workflow error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::StorageError;

/// Result type for workflow operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Errors raised by workflow operations.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Missing or malformed operation arguments. Nothing was changed.
    #[error("{0}")]
    Validation(String),

    /// A prerequisite check failed.
    #[error("Cannot run {operation}; unmet: {}", .unmet.join(", "))]
    GuardViolation { operation: String, unmet: Vec<String> },

    /// An external program exited unsuccessfully or could not be started.
    #[error("`{command}` failed ({}): {}", exit_label(.code), .stderr.trim())]
    ExternalCommand { command: String, code: Option<i32>, stdout: String, stderr: String },

    /// The working tree changed after the last recorded commit.
    #[error(
        "Working tree changed since the last commit ({}); phase moved back to commit",
        .changed.join(", ")
    )]
    StaleState { changed: Vec<String> },

    /// Another process saved the snapshot after it was loaded.
    #[error(
        "{} was modified by another process (loaded revision {expected}, found {found})",
        .path.display()
    )]
    ConcurrentModification { path: PathBuf, expected: u64, found: u64 },

    /// An explicit backend read failed.
    #[error("Persistence error: {0}")]
    Persistence(#[from] StorageError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "no exit code".to_string(), |c| format!("exit code {c}"))
}

impl WorkflowError {
    pub(crate) fn guard(operation: &str, unmet: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::GuardViolation {
            operation: operation.to_string(),
            unmet: unmet.into_iter().map(Into::into).collect(),
        }
    }

    pub(crate) fn spawn_failed(command: &str, err: &std::io::Error) -> Self {
        Self::ExternalCommand {
            command: command.to_string(),
            code: None,
            stdout: String::new(),
            stderr: err.to_string(),
        }
    }

    /// Whether the caller can fix this by changing input or workflow order.
    pub fn is_actionable(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::GuardViolation { .. } | Self::StaleState { .. })
    }
}
