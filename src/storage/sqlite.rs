//! SQLite adapter for workflow storage.
//!
//! This is the default backend: a single database file next to the project
//! state directory, created on first use.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tokio::sync::OnceCell;

use super::{
    description_hash, now_timestamp, BackendKind, DateRange, Frequency, HistoryBucket,
    HistoryEntry, HistoryPage, HistoryQuery, PoolSettings, ProjectSummary, StorageError,
    StorageResult, WorkflowStore, SUMMARY_WINDOW,
};

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS workflow_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        project_path TEXT NOT NULL,
        task_description TEXT NOT NULL,
        description_hash TEXT NOT NULL DEFAULT '',
        task_type TEXT NOT NULL DEFAULT '',
        commit_message TEXT NOT NULL DEFAULT '',
        entry_timestamp TEXT NOT NULL,
        forced INTEGER NOT NULL DEFAULT 0,
        force_reason TEXT,
        dropped INTEGER NOT NULL DEFAULT 0,
        drop_reason TEXT,
        created_at TEXT NOT NULL DEFAULT ''
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS workflow_summaries (
        user_id TEXT NOT NULL,
        project_path TEXT NOT NULL,
        total_tasks INTEGER NOT NULL DEFAULT 0,
        task_types TEXT NOT NULL DEFAULT '{}',
        last_active TEXT,
        recent_tasks TEXT NOT NULL DEFAULT '[]',
        updated_at TEXT NOT NULL DEFAULT '',
        PRIMARY KEY (user_id, project_path)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS workflow_states (
        user_id TEXT NOT NULL,
        project_path TEXT NOT NULL,
        state TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (user_id, project_path)
    )
    "#,
];

// Columns added after the first schema; older databases get them on migrate.
const LATE_COLUMNS: [(&str, &str, &str); 13] = [
    ("workflow_history", "description_hash", "TEXT NOT NULL DEFAULT ''"),
    ("workflow_history", "task_type", "TEXT NOT NULL DEFAULT ''"),
    ("workflow_history", "commit_message", "TEXT NOT NULL DEFAULT ''"),
    ("workflow_history", "forced", "INTEGER NOT NULL DEFAULT 0"),
    ("workflow_history", "force_reason", "TEXT"),
    ("workflow_history", "dropped", "INTEGER NOT NULL DEFAULT 0"),
    ("workflow_history", "drop_reason", "TEXT"),
    ("workflow_history", "created_at", "TEXT NOT NULL DEFAULT ''"),
    ("workflow_summaries", "total_tasks", "INTEGER NOT NULL DEFAULT 0"),
    ("workflow_summaries", "task_types", "TEXT NOT NULL DEFAULT '{}'"),
    ("workflow_summaries", "last_active", "TEXT"),
    ("workflow_summaries", "recent_tasks", "TEXT NOT NULL DEFAULT '[]'"),
    ("workflow_summaries", "updated_at", "TEXT NOT NULL DEFAULT ''"),
];

const ENTRY_COLUMNS: &str = "task_description, task_type, commit_message, entry_timestamp, \
                             forced, force_reason, dropped, drop_reason";

const SCOPE_FILTER: &str = "user_id = ? AND project_path = ? \
     AND (? IS NULL OR substr(entry_timestamp, 1, 10) >= ?) \
     AND (? IS NULL OR substr(entry_timestamp, 1, 10) <= ?)";

/// SQLite-backed workflow store.
pub struct SqliteStore {
    path: PathBuf,
    settings: PoolSettings,
    pool: OnceCell<SqlitePool>,
}

impl SqliteStore {
    /// Create a store for the database file at `path`. Nothing is opened yet.
    pub fn new(path: impl Into<PathBuf>, settings: PoolSettings) -> Self {
        Self { path: path.into(), settings, pool: OnceCell::new() }
    }

    /// Location of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn pool(&self) -> StorageResult<&SqlitePool> {
        self.pool
            .get_or_try_init(|| async {
                let pool = self.open_pool().await?;
                run_migrations(&pool).await?;
                tracing::info!("Opened sqlite workflow store at {}", self.path.display());
                Ok::<_, StorageError>(pool)
            })
            .await
    }

    async fn open_pool(&self) -> StorageResult<SqlitePool> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| StorageError::Connection {
                backend: "sqlite",
                message: format!("cannot create {}: {e}", parent.display()),
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true)
            .busy_timeout(self.settings.connect_timeout);

        SqlitePoolOptions::new()
            .max_connections(self.settings.max_connections)
            .acquire_timeout(self.settings.connect_timeout)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection { backend: "sqlite", message: e.to_string() })
    }
}

async fn run_migrations(pool: &SqlitePool) -> StorageResult<()> {
    for stmt in SCHEMA {
        sqlx::query(stmt).execute(pool).await.map_err(StorageError::migration)?;
    }

    for (table, column, decl) in LATE_COLUMNS {
        let existing: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info(?)")
            .bind(table)
            .fetch_all(pool)
            .await
            .map_err(StorageError::migration)?;
        if existing.iter().any(|c| c == column) {
            continue;
        }
        let sql = format!("ALTER TABLE {table} ADD COLUMN {column} {decl}");
        match sqlx::query(&sql).execute(pool).await {
            Ok(_) => tracing::info!("Added column {table}.{column}"),
            Err(err) if is_duplicate_column(&err) => {
                tracing::warn!("Column {table}.{column} already present: {err}");
            }
            Err(err) => return Err(StorageError::migration(err)),
        }
    }

    backfill_description_hashes(pool).await?;
    ensure_identity_index(pool).await
}

fn is_duplicate_column(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.message().contains("duplicate column name"),
        _ => false,
    }
}

async fn backfill_description_hashes(pool: &SqlitePool) -> StorageResult<()> {
    let rows: Vec<(i64, String)> = sqlx::query_as(
        "SELECT id, task_description FROM workflow_history WHERE description_hash = ''",
    )
    .fetch_all(pool)
    .await
    .map_err(StorageError::migration)?;

    for (id, description) in &rows {
        sqlx::query("UPDATE workflow_history SET description_hash = ? WHERE id = ?")
            .bind(description_hash(description))
            .bind(id)
            .execute(pool)
            .await
            .map_err(StorageError::migration)?;
    }
    if !rows.is_empty() {
        tracing::info!("Backfilled description hashes for {} history rows", rows.len());
    }
    Ok(())
}

async fn ensure_identity_index(pool: &SqlitePool) -> StorageResult<()> {
    let exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' \
         AND name = 'idx_workflow_history_identity'",
    )
    .fetch_one(pool)
    .await
    .map_err(StorageError::migration)?;

    if exists == 0 {
        let collapsed = sqlx::query(
            "DELETE FROM workflow_history WHERE id NOT IN (\
                 SELECT MAX(id) FROM workflow_history \
                 GROUP BY user_id, project_path, entry_timestamp, description_hash)",
        )
        .execute(pool)
        .await
        .map_err(StorageError::migration)?
        .rows_affected();
        if collapsed > 0 {
            tracing::warn!("Collapsed {collapsed} duplicate history rows before indexing");
        }

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_workflow_history_identity \
             ON workflow_history (user_id, project_path, entry_timestamp, description_hash)",
        )
        .execute(pool)
        .await
        .map_err(StorageError::migration)?;
    }

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_workflow_history_scope \
         ON workflow_history (user_id, project_path, entry_timestamp)",
    )
    .execute(pool)
    .await
    .map_err(StorageError::migration)?;

    Ok(())
}

fn entry_from_row(row: &SqliteRow) -> Result<HistoryEntry, sqlx::Error> {
    Ok(HistoryEntry {
        task_description: row.try_get("task_description")?,
        task_type: row.try_get("task_type")?,
        commit_message: row.try_get("commit_message")?,
        timestamp: row.try_get("entry_timestamp")?,
        forced: row.try_get("forced")?,
        force_reason: row.try_get("force_reason")?,
        dropped: row.try_get("dropped")?,
        drop_reason: row.try_get("drop_reason")?,
    })
}

#[async_trait]
impl WorkflowStore for SqliteStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn connect(&self) -> StorageResult<()> {
        self.pool().await.map(|_| ())
    }

    async fn migrate(&self) -> StorageResult<()> {
        if self.pool.initialized() {
            let pool = self.pool().await?;
            return run_migrations(pool).await;
        }
        self.connect().await
    }

    async fn insert_history_entry(
        &self,
        user_id: &str,
        project_path: &str,
        entry: &HistoryEntry,
    ) -> StorageResult<()> {
        let pool = self.pool().await?;
        sqlx::query(
            r#"
            INSERT INTO workflow_history
                (user_id, project_path, task_description, description_hash, task_type,
                 commit_message, entry_timestamp, forced, force_reason, dropped, drop_reason,
                 created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, project_path, entry_timestamp, description_hash) DO UPDATE SET
                commit_message = excluded.commit_message,
                forced = excluded.forced,
                force_reason = excluded.force_reason,
                dropped = excluded.dropped,
                drop_reason = excluded.drop_reason
            "#,
        )
        .bind(user_id)
        .bind(project_path)
        .bind(&entry.task_description)
        .bind(entry.description_hash())
        .bind(&entry.task_type)
        .bind(&entry.commit_message)
        .bind(&entry.timestamp)
        .bind(entry.forced)
        .bind(&entry.force_reason)
        .bind(entry.dropped)
        .bind(&entry.drop_reason)
        .bind(now_timestamp())
        .execute(pool)
        .await
        .map_err(StorageError::query)?;

        self.update_summary_for_user(user_id, project_path).await?;
        Ok(())
    }

    async fn update_summary_for_user(
        &self,
        user_id: &str,
        project_path: &str,
    ) -> StorageResult<ProjectSummary> {
        let pool = self.pool().await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM workflow_history WHERE user_id = ? AND project_path = ?",
        )
        .bind(user_id)
        .bind(project_path)
        .fetch_one(pool)
        .await
        .map_err(StorageError::query)?;

        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM workflow_history WHERE user_id = ? AND project_path = ? \
             ORDER BY entry_timestamp DESC, id DESC LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(project_path)
            .bind(SUMMARY_WINDOW as i64)
            .fetch_all(pool)
            .await
            .map_err(StorageError::query)?;
        let recent =
            rows.iter().map(entry_from_row).collect::<Result<Vec<_>, _>>().map_err(StorageError::query)?;

        let summary = ProjectSummary::from_recent(total.max(0) as u64, &recent);
        let (task_types, recent_tasks) = summary.encode_columns()?;

        sqlx::query(
            r#"
            INSERT INTO workflow_summaries
                (user_id, project_path, total_tasks, task_types, last_active, recent_tasks, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, project_path) DO UPDATE SET
                total_tasks = excluded.total_tasks,
                task_types = excluded.task_types,
                last_active = excluded.last_active,
                recent_tasks = excluded.recent_tasks,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(project_path)
        .bind(total)
        .bind(task_types)
        .bind(&summary.last_active)
        .bind(recent_tasks)
        .bind(now_timestamp())
        .execute(pool)
        .await
        .map_err(StorageError::query)?;

        Ok(summary)
    }

    async fn get_summary_for_user(
        &self,
        user_id: &str,
        project_path: &str,
    ) -> StorageResult<Option<ProjectSummary>> {
        let pool = self.pool().await?;
        let row = sqlx::query(
            "SELECT total_tasks, task_types, last_active, recent_tasks FROM workflow_summaries \
             WHERE user_id = ? AND project_path = ?",
        )
        .bind(user_id)
        .bind(project_path)
        .fetch_optional(pool)
        .await
        .map_err(StorageError::query)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let total: i64 = row.try_get("total_tasks").map_err(StorageError::query)?;
        let task_types: Option<String> = row.try_get("task_types").map_err(StorageError::query)?;
        let last_active: Option<String> = row.try_get("last_active").map_err(StorageError::query)?;
        let recent: Option<String> = row.try_get("recent_tasks").map_err(StorageError::query)?;

        ProjectSummary::decode_columns(total, task_types.as_deref(), last_active, recent.as_deref())
            .map(Some)
    }

    async fn get_history_for_user(
        &self,
        user_id: &str,
        project_path: &str,
        query: &HistoryQuery,
    ) -> StorageResult<HistoryPage> {
        let pool = self.pool().await?;
        let start = query.range.start_key();
        let end = query.range.end_key();

        let count_sql = format!("SELECT COUNT(*) FROM workflow_history WHERE {SCOPE_FILTER}");
        let total: i64 = sqlx::query_scalar(&count_sql)
            .bind(user_id)
            .bind(project_path)
            .bind(&start)
            .bind(&start)
            .bind(&end)
            .bind(&end)
            .fetch_one(pool)
            .await
            .map_err(StorageError::query)?;

        let page_sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM workflow_history WHERE {SCOPE_FILTER} \
             ORDER BY entry_timestamp DESC, id DESC LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query(&page_sql)
            .bind(user_id)
            .bind(project_path)
            .bind(&start)
            .bind(&start)
            .bind(&end)
            .bind(&end)
            .bind(i64::from(query.page_size))
            .bind(query.offset() as i64)
            .fetch_all(pool)
            .await
            .map_err(StorageError::query)?;
        let entries =
            rows.iter().map(entry_from_row).collect::<Result<Vec<_>, _>>().map_err(StorageError::query)?;

        Ok(HistoryPage::new(entries, query, total.max(0) as u64))
    }

    async fn get_history_summary(
        &self,
        user_id: &str,
        project_path: &str,
        range: &DateRange,
        frequency: Frequency,
    ) -> StorageResult<Vec<HistoryBucket>> {
        let pool = self.pool().await?;
        let start = range.start_key();
        let end = range.end_key();

        let sql = format!(
            "SELECT substr(entry_timestamp, 1, {len}) AS period, COUNT(*) AS total, \
                    SUM(CASE WHEN forced THEN 1 ELSE 0 END) AS forced_count, \
                    SUM(CASE WHEN dropped THEN 1 ELSE 0 END) AS dropped_count \
             FROM workflow_history WHERE {SCOPE_FILTER} \
             GROUP BY period ORDER BY period DESC",
            len = frequency.prefix_len()
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(project_path)
            .bind(&start)
            .bind(&start)
            .bind(&end)
            .bind(&end)
            .fetch_all(pool)
            .await
            .map_err(StorageError::query)?;

        rows.iter()
            .map(|row| {
                Ok(HistoryBucket {
                    period: row.try_get("period")?,
                    total: row.try_get::<i64, _>("total")?.max(0) as u64,
                    forced: row.try_get::<i64, _>("forced_count")?.max(0) as u64,
                    dropped: row.try_get::<i64, _>("dropped_count")?.max(0) as u64,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(StorageError::query)
    }

    async fn save_state(
        &self,
        user_id: &str,
        project_path: &str,
        state: &serde_json::Value,
    ) -> StorageResult<()> {
        let pool = self.pool().await?;
        let document = serde_json::to_string(state)?;
        sqlx::query(
            r#"
            INSERT INTO workflow_states (user_id, project_path, state, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (user_id, project_path) DO UPDATE SET
                state = excluded.state,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(project_path)
        .bind(document)
        .bind(now_timestamp())
        .execute(pool)
        .await
        .map_err(StorageError::query)?;
        Ok(())
    }

    async fn get_state(
        &self,
        user_id: &str,
        project_path: &str,
    ) -> StorageResult<Option<serde_json::Value>> {
        let pool = self.pool().await?;
        let document: Option<String> = sqlx::query_scalar(
            "SELECT state FROM workflow_states WHERE user_id = ? AND project_path = ?",
        )
        .bind(user_id)
        .bind(project_path)
        .fetch_optional(pool)
        .await
        .map_err(StorageError::query)?;

        document.map(|raw| serde_json::from_str(&raw)).transpose().map_err(StorageError::from)
    }
}
