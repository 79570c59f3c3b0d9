//! Identity and location resolution.
//!
//! Works out which project a workflow belongs to, which logical user owns it,
//! and where its state files live:
//!
//! ```text
//! <root>/.devflow/user_id                      persisted user id
//! <root>/.devflow/<user>/workflow_state.json   workflow snapshot
//! <root>/.devflow/<user>/workflow_summary.json derived summary
//! ```
//!
//! Missing files are never an error here. They mean "create it".
//!
//! The state directory carries a `.gitignore` of `*` so none of these files
//! ever appear as working-tree changes.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Files or directories whose presence marks a project root.
pub const PROJECT_MARKERS: [&str; 10] = [
    ".git",
    "Cargo.toml",
    "package.json",
    "pyproject.toml",
    "go.mod",
    "setup.py",
    "pom.xml",
    "build.gradle",
    "composer.json",
    "Gemfile",
];

pub const STATE_FILE_NAME: &str = "workflow_state.json";
pub const SUMMARY_FILE_NAME: &str = "workflow_summary.json";
const USER_ID_FILE_NAME: &str = "user_id";
const GITIGNORE_FILE_NAME: &str = ".gitignore";

/// Resolved location of one workflow instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub project_path: PathBuf,
    /// `<root>/.devflow`
    pub state_dir: PathBuf,
    pub state_file: PathBuf,
    pub summary_file: PathBuf,
}

impl Identity {
    /// Build the layout for a known user and project root.
    pub fn new(user_id: impl Into<String>, project_path: impl Into<PathBuf>, state_dir_name: &str) -> Self {
        let user_id = user_id.into();
        let project_path = project_path.into();
        let state_dir = project_path.join(state_dir_name);
        let user_dir = state_dir.join(&user_id);
        Self {
            state_file: user_dir.join(STATE_FILE_NAME),
            summary_file: user_dir.join(SUMMARY_FILE_NAME),
            user_id,
            project_path,
            state_dir,
        }
    }

    /// Project path as stored in the database.
    pub fn project_key(&self) -> String {
        self.project_path.to_string_lossy().into_owned()
    }

    /// Pre-per-user snapshot location.
    pub fn legacy_state_file(&self) -> PathBuf {
        self.state_dir.join(STATE_FILE_NAME)
    }

    /// Default SQLite database file for this project.
    pub fn default_database_path(&self) -> PathBuf {
        self.state_dir.join("workflow.db")
    }

    /// Create the state directory and its ignore file if missing.
    pub fn ensure_state_dir(&self) -> io::Result<()> {
        ensure_state_dir(&self.state_dir)
    }
}

/// Create `state_dir` with a `.gitignore` that hides everything inside it.
pub fn ensure_state_dir(state_dir: &Path) -> io::Result<()> {
    fs::create_dir_all(state_dir)?;
    let ignore = state_dir.join(GITIGNORE_FILE_NAME);
    if !ignore.exists() {
        fs::write(&ignore, "*\n")?;
    }
    Ok(())
}

/// Resolves and caches the [`Identity`] for one process.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    cwd: PathBuf,
    state_dir_name: String,
    user_override: Option<String>,
    resolved: Option<Identity>,
}

impl IdentityResolver {
    /// Resolver rooted at `cwd`, using `.devflow` as the state directory.
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self { cwd: cwd.into(), state_dir_name: ".devflow".to_string(), user_override: None, resolved: None }
    }

    #[must_use]
    pub fn with_state_dir(mut self, name: impl Into<String>) -> Self {
        self.state_dir_name = name.into();
        self
    }

    /// Use this user id instead of the marker file.
    #[must_use]
    pub fn with_user_override(mut self, user_id: Option<String>) -> Self {
        self.user_override = user_id;
        self
    }

    /// Resolve once; later calls return the cached identity.
    pub fn resolve(&mut self) -> &Identity {
        let Self { cwd, state_dir_name, user_override, resolved } = self;
        resolved.get_or_insert_with(|| {
            let project_path = find_project_root(cwd);
            let state_dir = project_path.join(state_dir_name.as_str());
            let user_id = resolve_user_id(user_override.as_deref(), &state_dir);
            tracing::debug!("Resolved user {user_id} for {}", project_path.display());
            Identity::new(user_id, project_path, state_dir_name)
        })
    }
}

fn resolve_user_id(user_override: Option<&str>, state_dir: &Path) -> String {
    if let Some(user_id) = user_override.map(str::trim) {
        if is_valid_user_id(user_id) {
            return user_id.to_string();
        }
        tracing::warn!("Ignoring invalid user id override '{user_id}'");
    }

    let marker = state_dir.join(USER_ID_FILE_NAME);
    if let Ok(content) = fs::read_to_string(&marker) {
        let user_id = content.trim();
        if is_valid_user_id(user_id) {
            return user_id.to_string();
        }
        tracing::warn!("Ignoring malformed user id marker at {}", marker.display());
    }

    let user_id = match single_legacy_user(state_dir) {
        Some(legacy) => {
            tracing::info!("Adopting existing user directory {legacy}");
            legacy
        }
        None => uuid::Uuid::new_v4().to_string(),
    };

    if let Err(e) = ensure_state_dir(state_dir).and_then(|()| fs::write(&marker, &user_id)) {
        tracing::warn!("Could not persist user id to {}: {e}", marker.display());
    }
    user_id
}

fn is_valid_user_id(user_id: &str) -> bool {
    !user_id.is_empty()
        && user_id != "."
        && user_id != ".."
        && !user_id.contains(['/', '\\'])
        && !user_id.chars().any(char::is_control)
}

/// The only subdirectory of `state_dir` holding a snapshot, if exactly one does.
fn single_legacy_user(state_dir: &Path) -> Option<String> {
    let entries = fs::read_dir(state_dir).ok()?;
    let mut candidates = entries
        .filter_map(Result::ok)
        .filter(|e| e.path().join(STATE_FILE_NAME).is_file())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| is_valid_user_id(name));

    let first = candidates.next()?;
    if candidates.next().is_some() {
        return None;
    }
    Some(first)
}

/// Walk upward from `start` to the nearest directory holding a project marker.
///
/// A filesystem root is never returned as a match; without a marker the
/// starting directory is used.
pub fn find_project_root(start: &Path) -> PathBuf {
    let start = fs::canonicalize(start).unwrap_or_else(|_| start.to_path_buf());
    for dir in start.ancestors() {
        if dir.parent().is_none() {
            break;
        }
        if PROJECT_MARKERS.iter().any(|m| dir.join(m).exists()) {
            return dir.to_path_buf();
        }
    }
    start
}

/// How the legacy snapshot path was re-created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyMirror {
    HardLink,
    SymLink,
    Copy,
}

/// What [`migrate_legacy_layout`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LegacyMigration {
    /// The legacy snapshot was copied into the per-user location.
    pub imported: bool,
    /// The legacy path was re-created pointing at the per-user file.
    pub mirror: Option<LegacyMirror>,
}

/// One-time move from the shared snapshot to the per-user layout.
///
/// Imports `<state_dir>/workflow_state.json` when the per-user file does not
/// exist yet, then keeps the legacy path readable for older tooling through a
/// hard link, a symlink or a copy, whichever works first. Safe to run on
/// every startup; failures are logged and skipped.
pub fn migrate_legacy_layout(identity: &Identity) -> LegacyMigration {
    let legacy = identity.legacy_state_file();
    let mut outcome = LegacyMigration::default();

    if legacy.is_file() && !identity.state_file.exists() {
        let imported = identity
            .state_file
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::copy(&legacy, &identity.state_file));
        match imported {
            Ok(_) => {
                tracing::info!("Imported legacy snapshot into {}", identity.state_file.display());
                outcome.imported = true;
            }
            Err(e) => tracing::warn!("Could not import legacy snapshot: {e}"),
        }
    }

    if fs::symlink_metadata(&legacy).is_err() && identity.state_file.is_file() {
        outcome.mirror = mirror_file(&identity.state_file, &legacy);
        match outcome.mirror {
            Some(kind) => tracing::debug!("Mirrored snapshot to {} ({kind:?})", legacy.display()),
            None => tracing::warn!("Could not mirror snapshot to {}", legacy.display()),
        }
    }

    outcome
}

fn mirror_file(source: &Path, target: &Path) -> Option<LegacyMirror> {
    if fs::hard_link(source, target).is_ok() {
        return Some(LegacyMirror::HardLink);
    }
    #[cfg(unix)]
    if std::os::unix::fs::symlink(source, target).is_ok() {
        return Some(LegacyMirror::SymLink);
    }
    fs::copy(source, target).ok().map(|_| LegacyMirror::Copy)
}
