//! Task workflow state machine.
//!
//! Walks one task at a time through coding, testing, documentation, commit
//! and release before recording it in the project history.
//!
//! ## Layout
//!
//! - [`WorkflowState`] - the persisted record and its invariants
//! - [`WorkflowSession`] - local snapshot plus optional backend sync
//! - [`WorkflowEngine`] - guarded operations over a session
//! - [`dispatch`] - run an operation by name with JSON arguments
//!
//! Version control and documentation detection sit behind the
//! [`VersionControl`] and [`DocumentationCheck`] traits.

mod catalogue;
mod checks;
mod error;
mod heuristics;
mod operations;
mod phase;
mod session;
mod state;
mod vcs;

pub use catalogue::{dispatch, Operation, OperationCall};
pub use checks::{DocumentationCheck, MarkerFiles};
pub use error::{WorkflowError, WorkflowResult};
pub use heuristics::{
    classify_changes, commit_summary, format_file_list, infer_release_type, is_docs_path,
    is_test_path, synthesize_commit_message, ReleaseType,
};
pub use operations::{OperationOutcome, WorkflowEngine};
pub use phase::Phase;
pub use session::{SaveReport, SyncOutcome, WorkflowSession};
pub use state::{ReadinessCheck, WorkflowState};
pub use vcs::{parse_porcelain, GitCli, VersionControl};
