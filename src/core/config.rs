//! Configuration management for devflow.
//!
//! Handles loading configuration from TOML files and the environment.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::storage::BackendKind;

/// Name of the per-project configuration file.
pub const LOCAL_CONFIG_FILE: &str = ".devflow.toml";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Persistence backend
    pub database: DatabaseConfig,

    /// Workflow guard settings
    pub workflow: WorkflowConfig,

    /// Release settings
    pub release: ReleaseConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// State directory name, relative to the project root
    pub state_dir: String,

    /// Fixed user id; skips marker-file resolution when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Persistence backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Whether state and history are mirrored to a database
    pub enabled: bool,

    /// Engine to use (sqlite, mysql, postgres)
    pub backend: BackendKind,

    /// Connection string for server backends, or `sqlite:<path>`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// SQLite database file; defaults to `<state_dir>/workflow.db`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Maximum pooled connections
    pub max_connections: u32,

    /// Seconds to wait for a connection before giving up
    pub connect_timeout_secs: u64,
}

/// Workflow guard settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Paths (relative to the project root) that count as documentation
    pub doc_markers: Vec<String>,
}

/// Release settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseConfig {
    /// Command run for a bare release type; `{type}` is substituted
    pub command: String,

    /// Remote used for push and branch discovery
    pub remote: String,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Looks for config in:
    /// 1. `.devflow.toml` in the current directory
    /// 2. `~/.config/devflow/config.toml`
    /// 3. Falls back to defaults
    ///
    /// Environment overrides are applied on top.
    pub fn load() -> anyhow::Result<Self> {
        let cwd = std::env::current_dir()?;
        Self::load_in(&cwd)
    }

    /// Same as [`Config::load`], looking for the local file in `dir`.
    pub fn load_in(dir: &Path) -> anyhow::Result<Self> {
        let mut config = Self::discover(dir)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn discover(dir: &Path) -> anyhow::Result<Self> {
        let local_config = dir.join(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Some(global_config) = Self::config_dir().map(|d| d.join("config.toml")) {
            if global_config.exists() {
                return Self::load_from_file(&global_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config {}: {e}", path.display()))?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply `DEVFLOW_*` environment variables.
    ///
    /// `DEVFLOW_DB_BACKEND` and `DEVFLOW_DB_URL` also enable the database.
    pub fn apply_env_overrides(&mut self) {
        if let Some(backend) = env_value("DEVFLOW_DB_BACKEND") {
            match backend.parse::<BackendKind>() {
                Ok(kind) => {
                    self.database.backend = kind;
                    self.database.enabled = true;
                }
                Err(e) => tracing::warn!("Ignoring DEVFLOW_DB_BACKEND: {e}"),
            }
        }
        if let Some(url) = env_value("DEVFLOW_DB_URL") {
            self.database.url = Some(url);
            self.database.enabled = true;
        }
        if let Some(user_id) = env_value("DEVFLOW_USER_ID") {
            self.general.user_id = Some(user_id);
        }
    }

    /// Save configuration to the global config file.
    pub fn save(&self) -> anyhow::Result<PathBuf> {
        let config_dir =
            Self::config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        std::fs::write(&config_path, toml::to_string_pretty(self)?)?;
        Ok(config_path)
    }

    /// Get the global config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("devflow"))
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self { state_dir: ".devflow".to_string(), user_id: None }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: BackendKind::Sqlite,
            url: None,
            path: None,
            max_connections: 5,
            connect_timeout_secs: 5,
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            doc_markers: vec![
                "README.md".to_string(),
                "README".to_string(),
                "docs".to_string(),
                "CHANGELOG.md".to_string(),
            ],
        }
    }
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self { command: "npm version {type}".to_string(), remote: "origin".to_string() }
    }
}
