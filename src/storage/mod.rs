//! Durable workflow storage.
//!
//! A single async contract, [`WorkflowStore`], is implemented once per SQL
//! engine. All three implementations keep the same three tables:
//!
//! ```text
//! workflow_history    one row per completed / forced / dropped task
//! workflow_summaries  derived aggregate, rebuilt after every history write
//! workflow_states     opaque JSON snapshot per (user, project)
//! ```
//!
//! Pools are opened lazily on first use and kept for the lifetime of the
//! store; the schema is migrated once per store instance.

mod error;
mod model;
mod mysql;
mod postgres;
mod sqlite;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use error::{StorageError, StorageResult};
pub use model::{
    bucket_history, description_hash, now_timestamp, project_hash, DateRange, Frequency, HistoryBucket,
    HistoryEntry, HistoryPage, HistoryQuery, ProjectSummary, RecentTask, DEFAULT_PAGE_SIZE,
    MAX_PAGE_SIZE, RECENT_TASKS, SUMMARY_WINDOW,
};
pub use mysql::MySqlStore;
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

use crate::core::DatabaseConfig;

/// Supported SQL engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    #[serde(rename = "sqlite")]
    Sqlite,
    #[serde(rename = "mysql")]
    MySql,
    #[serde(rename = "postgres", alias = "postgresql")]
    Postgres,
}

impl BackendKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            "mysql" => Ok(Self::MySql),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(StorageError::InvalidInput(format!(
                "unsupported database backend '{other}' (expected sqlite, mysql, postgres or postgresql)"
            ))),
        }
    }
}

/// Pool sizing shared by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self { max_connections: 5, connect_timeout: Duration::from_secs(5) }
    }
}

/// Storage contract for workflow history, summaries and state snapshots.
///
/// Every method scopes its data by `(user_id, project_path)`.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Which engine backs this store.
    fn backend(&self) -> BackendKind;

    /// Open the pool and migrate the schema. Idempotent.
    async fn connect(&self) -> StorageResult<()>;

    /// Create missing tables, columns and indexes. Safe to re-run.
    async fn migrate(&self) -> StorageResult<()>;

    /// Upsert a history entry keyed by `(user, project, timestamp, description)`
    /// and rebuild the project summary.
    async fn insert_history_entry(
        &self,
        user_id: &str,
        project_path: &str,
        entry: &HistoryEntry,
    ) -> StorageResult<()>;

    /// Recompute and store the summary from the newest history rows.
    async fn update_summary_for_user(
        &self,
        user_id: &str,
        project_path: &str,
    ) -> StorageResult<ProjectSummary>;

    async fn get_summary_for_user(
        &self,
        user_id: &str,
        project_path: &str,
    ) -> StorageResult<Option<ProjectSummary>>;

    /// Read one page of history, newest first.
    async fn get_history_for_user(
        &self,
        user_id: &str,
        project_path: &str,
        query: &HistoryQuery,
    ) -> StorageResult<HistoryPage>;

    /// Count history rows per period, newest period first.
    async fn get_history_summary(
        &self,
        user_id: &str,
        project_path: &str,
        range: &DateRange,
        frequency: Frequency,
    ) -> StorageResult<Vec<HistoryBucket>>;

    /// Last-write-wins upsert of an opaque state document.
    async fn save_state(
        &self,
        user_id: &str,
        project_path: &str,
        state: &serde_json::Value,
    ) -> StorageResult<()>;

    async fn get_state(
        &self,
        user_id: &str,
        project_path: &str,
    ) -> StorageResult<Option<serde_json::Value>>;
}

/// Build the store selected by configuration.
///
/// No connection is made here; the returned store connects on first use.
pub fn open_store(
    config: &DatabaseConfig,
    default_sqlite_path: &Path,
) -> StorageResult<Arc<dyn WorkflowStore>> {
    let settings = PoolSettings {
        max_connections: config.max_connections.max(1),
        connect_timeout: Duration::from_secs(config.connect_timeout_secs.max(1)),
    };

    let store: Arc<dyn WorkflowStore> = match config.backend {
        BackendKind::Sqlite => {
            let path = sqlite_path(config, default_sqlite_path);
            Arc::new(SqliteStore::new(path, settings))
        }
        BackendKind::MySql => Arc::new(MySqlStore::new(required_url(config)?, settings)),
        BackendKind::Postgres => Arc::new(PostgresStore::new(required_url(config)?, settings)),
    };

    tracing::debug!("Configured {} workflow store", store.backend());
    Ok(store)
}

fn sqlite_path(config: &DatabaseConfig, default_path: &Path) -> PathBuf {
    if let Some(path) = config.path.as_deref().filter(|p| !p.trim().is_empty()) {
        let expanded = shellexpand::tilde(path);
        return PathBuf::from(expanded.as_ref());
    }
    if let Some(url) = config.url.as_deref() {
        let rest = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:"));
        if let Some(rest) = rest.filter(|r| !r.trim().is_empty()) {
            return PathBuf::from(shellexpand::tilde(rest).as_ref());
        }
    }
    default_path.to_path_buf()
}

fn required_url(config: &DatabaseConfig) -> StorageResult<String> {
    config.url.clone().filter(|u| !u.trim().is_empty()).ok_or_else(|| {
        StorageError::InvalidInput(format!(
            "database.url is required for the {} backend",
            config.backend
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("sqlite".parse::<BackendKind>().unwrap(), BackendKind::Sqlite);
        assert_eq!("MySQL".parse::<BackendKind>().unwrap(), BackendKind::MySql);
        assert_eq!("postgres".parse::<BackendKind>().unwrap(), BackendKind::Postgres);
        assert_eq!("postgresql".parse::<BackendKind>().unwrap(), BackendKind::Postgres);
        assert!("oracle".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_backend_kind_deserializes_alias() {
        #[derive(Deserialize)]
        struct Holder {
            backend: BackendKind,
        }
        let holder: Holder = toml::from_str("backend = \"postgresql\"").unwrap();
        assert_eq!(holder.backend, BackendKind::Postgres);
    }

    #[test]
    fn test_open_store_requires_url_for_servers() {
        let config = DatabaseConfig { backend: BackendKind::MySql, ..DatabaseConfig::default() };
        let result = open_store(&config, Path::new("/tmp/unused.db"));
        assert!(matches!(result, Err(StorageError::InvalidInput(_))));
    }

    #[test]
    fn test_sqlite_path_resolution() {
        let default = Path::new("/project/.devflow/workflow.db");

        let config = DatabaseConfig::default();
        assert_eq!(sqlite_path(&config, default), default);

        let config =
            DatabaseConfig { url: Some("sqlite:/data/flow.db".to_string()), ..DatabaseConfig::default() };
        assert_eq!(sqlite_path(&config, default), PathBuf::from("/data/flow.db"));

        let config = DatabaseConfig {
            path: Some("/explicit.db".to_string()),
            url: Some("sqlite:/data/flow.db".to_string()),
            ..DatabaseConfig::default()
        };
        assert_eq!(sqlite_path(&config, default), PathBuf::from("/explicit.db"));
    }

    #[test]
    fn test_open_sqlite_store_is_lazy() {
        let config = DatabaseConfig::default();
        let store = open_store(&config, Path::new("/nonexistent/dir/flow.db")).unwrap();
        assert_eq!(store.backend(), BackendKind::Sqlite);
    }
}
