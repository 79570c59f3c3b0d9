//! Records exchanged with a workflow store.
//!
//! Timestamps travel as RFC 3339 strings (UTC, millisecond precision). Every
//! backend stores them as text, so date filters and period buckets are plain
//! prefix comparisons and behave the same on SQLite, MySQL and PostgreSQL.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::StorageResult;

/// Number of most recent entries the type distribution is computed over.
pub const SUMMARY_WINDOW: usize = 20;

/// Number of entries listed in `recent_tasks`.
pub const RECENT_TASKS: usize = 5;

/// Upper bound for a history page.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// A completed, forced or dropped task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub task_description: String,
    #[serde(default)]
    pub task_type: String,
    #[serde(default)]
    pub commit_message: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub forced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_reason: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub dropped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drop_reason: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl HistoryEntry {
    /// Create an entry stamped with the current time.
    pub fn new(
        task_description: impl Into<String>,
        task_type: impl Into<String>,
        commit_message: impl Into<String>,
    ) -> Self {
        Self {
            task_description: task_description.into(),
            task_type: task_type.into(),
            commit_message: commit_message.into(),
            timestamp: now_timestamp(),
            forced: false,
            force_reason: None,
            dropped: false,
            drop_reason: None,
        }
    }

    /// Mark the entry as force-completed.
    pub fn forced(mut self, reason: Option<String>) -> Self {
        self.forced = true;
        self.force_reason = reason;
        self
    }

    /// Mark the entry as dropped.
    pub fn dropped(mut self, reason: Option<String>) -> Self {
        self.dropped = true;
        self.drop_reason = reason;
        self
    }

    /// Hash of the description, the last component of the uniqueness key.
    pub fn description_hash(&self) -> String {
        description_hash(&self.task_description)
    }

    /// Calendar date of the entry (`YYYY-MM-DD`).
    pub fn date(&self) -> &str {
        period_prefix(&self.timestamp, 10)
    }
}

/// Current time formatted the way history timestamps are stored.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// SHA-256 hex digest of a task description.
pub fn description_hash(description: &str) -> String {
    format!("{:x}", Sha256::digest(description.as_bytes()))
}

/// SHA-256 hex digest of a project path, for backends that cannot index long text.
pub fn project_hash(project_path: &str) -> String {
    description_hash(project_path)
}

fn period_prefix(timestamp: &str, len: usize) -> &str {
    timestamp.get(..len).unwrap_or(timestamp)
}

/// One of the five most recent tasks in a summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentTask {
    pub task_description: String,
    pub task_type: String,
    pub timestamp: String,
}

/// Aggregate over a project's history, rebuilt after every history write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectSummary {
    pub total_tasks: u64,
    pub task_types: BTreeMap<String, u64>,
    pub last_active: Option<String>,
    pub recent_tasks: Vec<RecentTask>,
}

impl ProjectSummary {
    /// Build a summary from the total row count and the newest rows.
    ///
    /// `newest_first` must already be ordered by timestamp descending; only
    /// the first [`SUMMARY_WINDOW`] rows are considered.
    pub fn from_recent(total_tasks: u64, newest_first: &[HistoryEntry]) -> Self {
        let window = &newest_first[..newest_first.len().min(SUMMARY_WINDOW)];

        let mut task_types = BTreeMap::new();
        for entry in window {
            *task_types.entry(entry.task_type.clone()).or_insert(0) += 1;
        }

        let recent_tasks = window
            .iter()
            .take(RECENT_TASKS)
            .map(|entry| RecentTask {
                task_description: entry.task_description.clone(),
                task_type: entry.task_type.clone(),
                timestamp: entry.timestamp.clone(),
            })
            .collect();

        Self {
            total_tasks,
            task_types,
            last_active: window.first().map(|e| e.timestamp.clone()),
            recent_tasks,
        }
    }

    /// Build a summary from an unordered history list.
    pub fn from_history(history: &[HistoryEntry]) -> Self {
        let sorted = sort_newest_first(history);
        Self::from_recent(history.len() as u64, &sorted)
    }

    /// Encode `task_types` and `recent_tasks` for their text columns.
    pub(crate) fn encode_columns(&self) -> StorageResult<(String, String)> {
        Ok((serde_json::to_string(&self.task_types)?, serde_json::to_string(&self.recent_tasks)?))
    }

    /// Rebuild a summary from a stored row. Missing JSON columns (rows written
    /// by older releases) decode as empty.
    pub(crate) fn decode_columns(
        total_tasks: i64,
        task_types: Option<&str>,
        last_active: Option<String>,
        recent_tasks: Option<&str>,
    ) -> StorageResult<Self> {
        let task_types = match task_types.filter(|s| !s.trim().is_empty()) {
            Some(raw) => serde_json::from_str(raw)?,
            None => BTreeMap::new(),
        };
        let recent_tasks = match recent_tasks.filter(|s| !s.trim().is_empty()) {
            Some(raw) => serde_json::from_str(raw)?,
            None => Vec::new(),
        };
        Ok(Self {
            total_tasks: total_tasks.max(0) as u64,
            task_types,
            last_active: last_active.filter(|s| !s.is_empty()),
            recent_tasks,
        })
    }
}

fn sort_newest_first(history: &[HistoryEntry]) -> Vec<HistoryEntry> {
    let mut sorted = history.to_vec();
    // Stable sort keeps insertion order for equal timestamps; reverse so the
    // later-appended entry wins ties, matching `ORDER BY timestamp DESC, id DESC`.
    sorted.reverse();
    sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    sorted
}

/// Bucket granularity for history summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Monthly,
    Yearly,
}

impl Frequency {
    /// Length of the timestamp prefix that forms a period label.
    pub const fn prefix_len(self) -> usize {
        match self {
            Self::Daily => 10,
            Self::Monthly => 7,
            Self::Yearly => 4,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }
}

impl Default for Frequency {
    fn default() -> Self {
        Self::Daily
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" | "day" => Ok(Self::Daily),
            "monthly" | "month" => Ok(Self::Monthly),
            "yearly" | "year" => Ok(Self::Yearly),
            other => Err(format!("unknown frequency '{other}' (expected daily, monthly or yearly)")),
        }
    }
}

/// Inclusive date range; either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    /// Lower bound as a `YYYY-MM-DD` string.
    pub fn start_key(&self) -> Option<String> {
        self.start.map(|d| d.format("%Y-%m-%d").to_string())
    }

    /// Upper bound as a `YYYY-MM-DD` string.
    pub fn end_key(&self) -> Option<String> {
        self.end.map(|d| d.format("%Y-%m-%d").to_string())
    }

    /// Whether an entry falls inside the range, comparing dates only.
    pub fn contains(&self, entry: &HistoryEntry) -> bool {
        let date = entry.date();
        if let Some(start) = self.start_key() {
            if date < start.as_str() {
                return false;
            }
        }
        if let Some(end) = self.end_key() {
            if date > end.as_str() {
                return false;
            }
        }
        true
    }
}

/// A page request with clamped bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryQuery {
    pub page: u32,
    pub page_size: u32,
    pub range: DateRange,
}

impl HistoryQuery {
    /// Clamp `page` to `[1, ∞)` and `page_size` to `[1, 100]`.
    pub fn new(page: i64, page_size: i64) -> Self {
        let page = page.clamp(1, i64::from(u32::MAX)) as u32;
        let page_size = page_size.clamp(1, i64::from(MAX_PAGE_SIZE)) as u32;
        Self { page, page_size, range: DateRange::default() }
    }

    pub fn with_range(mut self, range: DateRange) -> Self {
        self.range = range;
        self
    }

    /// Rows to skip before the page starts.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }

    /// Paginate an in-memory history with the same rules the backends use.
    pub fn apply(&self, history: &[HistoryEntry]) -> HistoryPage {
        let filtered: Vec<HistoryEntry> =
            sort_newest_first(history).into_iter().filter(|e| self.range.contains(e)).collect();
        let total = filtered.len() as u64;
        let entries = filtered
            .into_iter()
            .skip(self.offset() as usize)
            .take(self.page_size as usize)
            .collect();
        HistoryPage::new(entries, self, total)
    }
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self::new(1, i64::from(DEFAULT_PAGE_SIZE))
    }
}

/// One page of history, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub entries: Vec<HistoryEntry>,
    pub page: u32,
    pub page_size: u32,
    pub total_entries: u64,
    pub total_pages: u64,
}

impl HistoryPage {
    pub fn new(entries: Vec<HistoryEntry>, query: &HistoryQuery, total_entries: u64) -> Self {
        Self {
            entries,
            page: query.page,
            page_size: query.page_size,
            total_entries,
            total_pages: total_entries.div_ceil(u64::from(query.page_size)),
        }
    }
}

/// Task counts for one period label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryBucket {
    pub period: String,
    pub total: u64,
    pub forced: u64,
    pub dropped: u64,
}

/// Bucket an in-memory history, descending by period.
pub fn bucket_history(
    history: &[HistoryEntry],
    range: &DateRange,
    frequency: Frequency,
) -> Vec<HistoryBucket> {
    let mut buckets: BTreeMap<String, HistoryBucket> = BTreeMap::new();
    for entry in history.iter().filter(|e| range.contains(e)) {
        let period = period_prefix(&entry.timestamp, frequency.prefix_len()).to_string();
        let bucket = buckets.entry(period.clone()).or_insert_with(|| HistoryBucket {
            period,
            total: 0,
            forced: 0,
            dropped: 0,
        });
        bucket.total += 1;
        bucket.forced += u64::from(entry.forced);
        bucket.dropped += u64::from(entry.dropped);
    }
    buckets.into_values().rev().collect()
}
