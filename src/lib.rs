//! # Devflow
//!
//! Task workflow tracking for your repository: start a task, fix, test,
//! document, commit, release and complete it, with every step guarded.
//!
//! State lives in a per-user snapshot under the project's `.devflow`
//! directory and is optionally mirrored to SQLite, MySQL or PostgreSQL so
//! completed tasks can be paged and summarized across machines.
//!
//! ## Quick Start
//!
//! ```bash
//! devflow start "Add login form" --type feature
//! devflow fixed
//! devflow create-tests
//! devflow test --command "npm test"
//! devflow docs --type readme
//! devflow ready
//! devflow commit
//! devflow release patch
//! devflow complete
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow common patterns that are intentional in this codebase
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::struct_field_names)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::map_unwrap_or)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::ref_option)]
#![allow(clippy::future_not_send)]
#![allow(clippy::significant_drop_tightening)]

pub mod core;
pub mod storage;
pub mod workflow;

// Re-export commonly used types
pub use core::{Config, Identity, IdentityResolver};
pub use storage::{open_store, BackendKind, WorkflowStore};
pub use workflow::{dispatch, OperationCall, OperationOutcome, WorkflowEngine, WorkflowError, WorkflowSession};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "devflow";
