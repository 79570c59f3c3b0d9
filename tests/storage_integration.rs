//! Storage Integration Tests
//!
//! Runs the same contract against every backend. SQLite always runs;
//! MySQL and PostgreSQL run when `DEVFLOW_TEST_MYSQL_URL` /
//! `DEVFLOW_TEST_POSTGRES_URL` point at a server.

use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::json;
use tempfile::TempDir;

use devflow::storage::{
    DateRange, Frequency, HistoryBucket, HistoryEntry, HistoryQuery, MySqlStore, PoolSettings,
    PostgresStore, SqliteStore, WorkflowStore,
};

const USER: &str = "alice";

fn entry_at(description: &str, task_type: &str, timestamp: &str) -> HistoryEntry {
    let mut entry = HistoryEntry::new(description, task_type, format!("feat: {description}"));
    entry.timestamp = timestamp.to_string();
    entry
}

/// Unique per run so shared servers never see leftovers.
fn fresh_project() -> String {
    format!("/work/{}", uuid::Uuid::new_v4())
}

fn date(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
}

// ============================================================================
// Contract
// ============================================================================

async fn check_upsert_is_idempotent(store: &dyn WorkflowStore) {
    let project = fresh_project();
    let entry = entry_at("Add login", "feature", "2024-01-10T09:00:00.000Z");

    store.insert_history_entry(USER, &project, &entry).await.unwrap();
    store.insert_history_entry(USER, &project, &entry).await.unwrap();

    let page = store.get_history_for_user(USER, &project, &HistoryQuery::default()).await.unwrap();
    assert_eq!(page.total_entries, 1);
    assert_eq!(page.entries, vec![entry]);

    // Same description at another time is a separate task.
    let again = entry_at("Add login", "feature", "2024-01-11T09:00:00.000Z");
    store.insert_history_entry(USER, &project, &again).await.unwrap();
    let page = store.get_history_for_user(USER, &project, &HistoryQuery::default()).await.unwrap();
    assert_eq!(page.total_entries, 2);
}

async fn check_pagination(store: &dyn WorkflowStore) {
    let project = fresh_project();
    for day in 1..=12 {
        let entry = entry_at(&format!("Task {day}"), "feature", &format!("2024-03-{day:02}T12:00:00.000Z"));
        store.insert_history_entry(USER, &project, &entry).await.unwrap();
    }

    let page = store.get_history_for_user(USER, &project, &HistoryQuery::new(2, 5)).await.unwrap();
    assert_eq!(page.page, 2);
    assert_eq!(page.total_entries, 12);
    assert_eq!(page.total_pages, 3);
    let names: Vec<&str> = page.entries.iter().map(|e| e.task_description.as_str()).collect();
    assert_eq!(names, vec!["Task 7", "Task 6", "Task 5", "Task 4", "Task 3"]);

    // Out-of-range bounds are clamped.
    let page = store.get_history_for_user(USER, &project, &HistoryQuery::new(0, 0)).await.unwrap();
    assert_eq!((page.page, page.page_size), (1, 1));
    assert_eq!(page.entries[0].task_description, "Task 12");

    let page = store.get_history_for_user(USER, &project, &HistoryQuery::new(1, 500)).await.unwrap();
    assert_eq!(page.page_size, 100);
    assert_eq!(page.entries.len(), 12);

    // Date bounds are inclusive.
    let range = DateRange::new(Some(date("2024-03-03")), Some(date("2024-03-05")));
    let query = HistoryQuery::new(1, 10).with_range(range);
    let page = store.get_history_for_user(USER, &project, &query).await.unwrap();
    assert_eq!(page.total_entries, 3);
    assert_eq!(page.entries[0].task_description, "Task 5");
}

async fn check_summary_and_buckets(store: &dyn WorkflowStore) {
    let project = fresh_project();
    let entries = [
        entry_at("Add login", "feature", "2024-01-05T08:00:00.000Z"),
        entry_at("Fix crash", "bugfix", "2024-01-20T08:00:00.000Z"),
        entry_at("Old spike", "research", "2024-02-02T08:00:00.000Z").dropped(Some("stale".into())),
    ];
    for entry in &entries {
        store.insert_history_entry(USER, &project, entry).await.unwrap();
    }

    let summary = store.get_summary_for_user(USER, &project).await.unwrap().unwrap();
    assert_eq!(summary.total_tasks, 3);
    assert_eq!(summary.task_types.get("feature"), Some(&1));
    assert_eq!(summary.task_types.get("bugfix"), Some(&1));
    assert_eq!(summary.last_active.as_deref(), Some("2024-02-02T08:00:00.000Z"));
    assert_eq!(summary.recent_tasks[0].task_description, "Old spike");

    let rebuilt = store.update_summary_for_user(USER, &project).await.unwrap();
    assert_eq!(rebuilt, summary);

    let buckets = store
        .get_history_summary(USER, &project, &DateRange::default(), Frequency::Monthly)
        .await
        .unwrap();
    assert_eq!(
        buckets,
        vec![
            HistoryBucket { period: "2024-02".into(), total: 1, forced: 0, dropped: 1 },
            HistoryBucket { period: "2024-01".into(), total: 2, forced: 0, dropped: 0 },
        ]
    );

    let range = DateRange::new(Some(date("2024-01-10")), None);
    let daily = store.get_history_summary(USER, &project, &range, Frequency::Daily).await.unwrap();
    let periods: Vec<&str> = daily.iter().map(|b| b.period.as_str()).collect();
    assert_eq!(periods, vec!["2024-02-02", "2024-01-20"]);

    let yearly = store
        .get_history_summary(USER, &project, &DateRange::default(), Frequency::Yearly)
        .await
        .unwrap();
    assert_eq!(yearly.len(), 1);
    assert_eq!(yearly[0].total, 3);
}

async fn check_state_and_scoping(store: &dyn WorkflowStore) {
    let project = fresh_project();
    assert_eq!(store.get_state(USER, &project).await.unwrap(), None);
    assert_eq!(store.get_summary_for_user(USER, &project).await.unwrap(), None);

    store.save_state(USER, &project, &json!({"currentPhase": "coding"})).await.unwrap();
    store.save_state(USER, &project, &json!({"currentPhase": "testing"})).await.unwrap();
    assert_eq!(
        store.get_state(USER, &project).await.unwrap(),
        Some(json!({"currentPhase": "testing"}))
    );

    // Another user in the same project sees nothing.
    let entry = entry_at("Add login", "feature", "2024-01-10T09:00:00.000Z");
    store.insert_history_entry(USER, &project, &entry).await.unwrap();
    let page = store.get_history_for_user("bob", &project, &HistoryQuery::default()).await.unwrap();
    assert_eq!(page.total_entries, 0);
    assert_eq!(store.get_state("bob", &project).await.unwrap(), None);

    // Ids and paths compare exactly on every backend.
    let page = store.get_history_for_user("ALICE", &project, &HistoryQuery::default()).await.unwrap();
    assert_eq!(page.total_entries, 0);
    let upper = project.to_uppercase();
    assert_eq!(store.get_state(USER, &upper).await.unwrap(), None);
}

async fn check_long_keys(store: &dyn WorkflowStore) {
    let project = format!("{}/{}", fresh_project(), "nested/".repeat(100));
    let user = "u".repeat(200);
    let task_type = "t".repeat(200);
    let entry = entry_at("Deep path", &task_type, "2024-04-01T09:00:00.000Z");

    store.insert_history_entry(&user, &project, &entry).await.unwrap();
    store.save_state(&user, &project, &json!({"currentPhase": "idle"})).await.unwrap();

    let page = store.get_history_for_user(&user, &project, &HistoryQuery::default()).await.unwrap();
    assert_eq!(page.entries, vec![entry]);
    assert_eq!(store.get_summary_for_user(&user, &project).await.unwrap().unwrap().total_tasks, 1);
    assert!(store.get_state(&user, &project).await.unwrap().is_some());
}

async fn run_contract(store: Arc<dyn WorkflowStore>) {
    store.connect().await.unwrap();
    // Migrating again must be harmless.
    store.migrate().await.unwrap();

    check_upsert_is_idempotent(store.as_ref()).await;
    check_pagination(store.as_ref()).await;
    check_summary_and_buckets(store.as_ref()).await;
    check_state_and_scoping(store.as_ref()).await;
    check_long_keys(store.as_ref()).await;
}

// ============================================================================
// Backends
// ============================================================================

#[tokio::test]
async fn test_sqlite_contract() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::new(dir.path().join("workflow.db"), PoolSettings::default());
    run_contract(Arc::new(store)).await;
}

#[tokio::test]
async fn test_sqlite_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("workflow.db");
    let entry = entry_at("Add login", "feature", "2024-01-10T09:00:00.000Z");

    let first = SqliteStore::new(&path, PoolSettings::default());
    first.insert_history_entry(USER, "/work/app", &entry).await.unwrap();
    drop(first);

    let second = SqliteStore::new(&path, PoolSettings::default());
    let page = second.get_history_for_user(USER, "/work/app", &HistoryQuery::default()).await.unwrap();
    assert_eq!(page.entries, vec![entry]);
}

#[tokio::test]
async fn test_mysql_contract() {
    let Ok(url) = std::env::var("DEVFLOW_TEST_MYSQL_URL") else {
        eprintln!("DEVFLOW_TEST_MYSQL_URL not set; skipping");
        return;
    };
    run_contract(Arc::new(MySqlStore::new(url, PoolSettings::default()))).await;
}

#[tokio::test]
async fn test_postgres_contract() {
    let Ok(url) = std::env::var("DEVFLOW_TEST_POSTGRES_URL") else {
        eprintln!("DEVFLOW_TEST_POSTGRES_URL not set; skipping");
        return;
    };
    run_contract(Arc::new(PostgresStore::new(url, PoolSettings::default()))).await;
}
