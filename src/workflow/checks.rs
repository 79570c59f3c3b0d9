//! Documentation presence check.

use std::path::Path;

/// Decides whether a project has documentation to point at.
pub trait DocumentationCheck: Send + Sync {
    /// Whether documentation exists under `project_root`.
    fn has_documentation(&self, project_root: &Path) -> bool;

    /// What the check looks for, shown when it fails.
    fn describe(&self) -> String;
}

/// Passes when any configured marker path exists under the project root.
#[derive(Debug, Clone)]
pub struct MarkerFiles {
    markers: Vec<String>,
}

impl MarkerFiles {
    pub fn new(markers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { markers: markers.into_iter().map(Into::into).collect() }
    }
}

impl Default for MarkerFiles {
    fn default() -> Self {
        Self::new(["README.md", "README", "docs", "CHANGELOG.md"])
    }
}

impl DocumentationCheck for MarkerFiles {
    fn has_documentation(&self, project_root: &Path) -> bool {
        self.markers.iter().any(|m| project_root.join(m).exists())
    }

    fn describe(&self) -> String {
        format!("Documentation marker present (one of: {})", self.markers.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_marker_files() {
        let dir = TempDir::new().unwrap();
        let check = MarkerFiles::default();
        assert!(!check.has_documentation(dir.path()));

        std::fs::create_dir(dir.path().join("docs")).unwrap();
        assert!(check.has_documentation(dir.path()));
    }

    #[test]
    fn test_custom_markers() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("GUIDE.adoc"), "= Guide").unwrap();

        assert!(MarkerFiles::new(["GUIDE.adoc"]).has_documentation(dir.path()));
        assert!(MarkerFiles::new(["GUIDE.adoc"]).describe().contains("GUIDE.adoc"));
    }
}
