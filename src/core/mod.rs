//! Core types and functionality for devflow.
//!
//! This module contains configuration, identity resolution and external
//! command execution shared by the workflow engine and the CLI.

mod config;
mod executor;
mod identity;

pub use config::{
    Config, DatabaseConfig, GeneralConfig, ReleaseConfig, WorkflowConfig, LOCAL_CONFIG_FILE,
};
pub use executor::{CommandRunner, ExecutionResult, Executor};
pub use identity::{
    ensure_state_dir, find_project_root, migrate_legacy_layout, Identity, IdentityResolver, LegacyMigration,
    LegacyMirror, PROJECT_MARKERS, STATE_FILE_NAME, SUMMARY_FILE_NAME,
};
