//! Commit and release text rules.
//!
//! Pure string functions: release-type inference from conventional commit
//! messages, test/docs path classification, and commit message synthesis
//! from a staged change set.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Semantic version bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseType {
    Major,
    Minor,
    Patch,
}

impl ReleaseType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Major => "major",
            Self::Minor => "minor",
            Self::Patch => "patch",
        }
    }
}

impl fmt::Display for ReleaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReleaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "major" => Ok(Self::Major),
            "minor" => Ok(Self::Minor),
            "patch" => Ok(Self::Patch),
            other => Err(format!("unknown release type '{other}' (expected major, minor or patch)")),
        }
    }
}

// `type!:` or `type(scope)!:` at the start of the header.
static BREAKING_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[A-Za-z]+(\([^)]*\))?!:").expect("valid regex"));

static BREAKING_NOTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^.*\bbreaking[ -]change\b").expect("valid regex"));

static LEADING_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([A-Za-z]+)").expect("valid regex"));

/// Infer the version bump implied by a commit message.
pub fn infer_release_type(message: &str) -> ReleaseType {
    let header = message.lines().next().unwrap_or_default();
    if BREAKING_HEADER.is_match(header) || BREAKING_NOTE.is_match(message) {
        return ReleaseType::Major;
    }

    let token = LEADING_TOKEN
        .captures(header)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase())
        .unwrap_or_default();

    match token.as_str() {
        "feat" => ReleaseType::Minor,
        _ => ReleaseType::Patch,
    }
}

const TEST_DIRS: [&str; 5] = ["test", "tests", "__tests__", "spec", "specs"];
const DOC_EXTENSIONS: [&str; 4] = ["md", "rst", "adoc", "txt"];

fn segments(path: &str) -> Vec<&str> {
    path.split(['/', '\\']).filter(|s| !s.is_empty() && *s != ".").collect()
}

fn is_directory_entry(path: &str) -> bool {
    path.ends_with(['/', '\\'])
}

/// Whether a changed path looks like a test file or lies in a test directory.
///
/// A trailing separator marks a directory entry such as `tests/`.
pub fn is_test_path(path: &str) -> bool {
    let parts = segments(path);
    if is_directory_entry(path) {
        return parts.iter().any(|d| TEST_DIRS.contains(d));
    }
    let Some((file, dirs)) = parts.split_last() else {
        return false;
    };

    if dirs.iter().any(|d| TEST_DIRS.contains(d)) {
        return true;
    }

    let name = file.to_lowercase();
    name.contains(".test.")
        || name.contains(".spec.")
        || name.contains("_test.")
        || name.starts_with("test_")
}

/// Whether a changed path looks like documentation.
pub fn is_docs_path(path: &str) -> bool {
    let parts = segments(path);
    let Some(file) = parts.last() else {
        return false;
    };

    if (parts.len() > 1 || is_directory_entry(path)) && matches!(parts[0], "docs" | "doc") {
        return true;
    }
    if is_directory_entry(path) {
        return false;
    }

    let upper = file.to_uppercase();
    if upper.starts_with("README") || upper.starts_with("CHANGELOG") {
        return true;
    }

    parts.len() == 1
        && file
            .rsplit_once('.')
            .is_some_and(|(_, ext)| DOC_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// Conventional-commit type for a change set: test, then docs, then chore.
pub fn classify_changes<S: AsRef<str>>(paths: &[S]) -> &'static str {
    if paths.iter().any(|p| is_test_path(p.as_ref())) {
        "test"
    } else if paths.iter().any(|p| is_docs_path(p.as_ref())) {
        "docs"
    } else {
        "chore"
    }
}

/// Render up to three paths joined with commas and "and"; more collapse to "+N more".
pub fn format_file_list<S: AsRef<str>>(paths: &[S]) -> String {
    let names: Vec<&str> = paths.iter().map(AsRef::as_ref).collect();
    match names.as_slice() {
        [] => "files".to_string(),
        [a] => (*a).to_string(),
        [a, b] => format!("{a} and {b}"),
        [a, b, c] => format!("{a}, {b} and {c}"),
        [a, b, c, rest @ ..] => format!("{a}, {b}, {c} +{} more", rest.len()),
    }
}

/// Summary line for a change set, e.g. `test: update tests/login.test.js`.
pub fn commit_summary<S: AsRef<str>>(paths: &[S]) -> String {
    format!("{}: update {}", classify_changes(paths), format_file_list(paths))
}

/// Full commit message: summary, blank line, `Files changed:` and one `- path` per file.
pub fn synthesize_commit_message<S: AsRef<str>>(paths: &[S]) -> String {
    let mut message = commit_summary(paths);
    if !paths.is_empty() {
        message.push_str("\n\nFiles changed:");
        for path in paths {
            message.push_str("\n- ");
            message.push_str(path.as_ref());
        }
    }
    message
}
