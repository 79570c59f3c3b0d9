//! Loading and saving workflow state.
//!
//! The local snapshot file is the source of truth for this process. The
//! configured store gets a copy of the state and the whole local history on
//! each save. Upserts are idempotent, so entries a failed sync left behind, or
//! recorded before a store was configured, arrive with the next successful
//! one. Failing to reach the store is reported, never fatal.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use super::error::{WorkflowError, WorkflowResult};
use super::phase::Phase;
use super::state::WorkflowState;
use crate::core::Identity;
use crate::storage::{
    bucket_history, now_timestamp, DateRange, Frequency, HistoryBucket, HistoryEntry, HistoryPage,
    HistoryQuery, ProjectSummary, WorkflowStore,
};

/// What happened to the backend copy during a save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// No store configured.
    Disabled,
    Synced,
    /// The local save succeeded but the store rejected the copy.
    Failed(String),
}

impl SyncOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Result of a successful local save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    pub state_file: PathBuf,
    pub sync: SyncOutcome,
}

/// Sibling of the snapshot, regenerated on every save.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SummaryDocument<'a> {
    user_id: &'a str,
    project_path: String,
    current_phase: Phase,
    task_description: &'a str,
    generated_at: String,
    #[serde(flatten)]
    summary: ProjectSummary,
}

/// An open workflow instance bound to its identity and optional store.
pub struct WorkflowSession {
    identity: Identity,
    state: WorkflowState,
    store: Option<Arc<dyn WorkflowStore>>,
    /// Revision found on disk when loaded or last saved; `None` if no file.
    disk_revision: Option<u64>,
}

impl WorkflowSession {
    /// Load the snapshot for `identity`, consulting the store when the local
    /// file is missing or older than the store's copy.
    pub async fn open(identity: Identity, store: Option<Arc<dyn WorkflowStore>>) -> WorkflowResult<Self> {
        let local = read_snapshot(&identity.state_file)?;
        let disk_revision = local.as_ref().map(|s| s.revision);

        let remote = match &store {
            Some(store) => fetch_remote_state(store.as_ref(), &identity).await,
            None => None,
        };

        let mut state = match (local, remote) {
            (None, Some(remote)) => {
                tracing::info!("No local snapshot; adopting state from {} store", backend_name(&store));
                remote
            }
            (Some(local), Some(remote)) if is_newer(&remote, &local) => {
                tracing::info!("Local snapshot is stale; adopting state from {} store", backend_name(&store));
                remote
            }
            (Some(local), _) => local,
            (None, None) => WorkflowState::default(),
        };
        state.normalize();

        Ok(Self { identity, state, store, disk_revision })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut WorkflowState {
        &mut self.state
    }

    pub fn store(&self) -> Option<&Arc<dyn WorkflowStore>> {
        self.store.as_ref()
    }

    /// Append a finished task to the history; it reaches the store on the next save.
    pub fn record_history(&mut self, entry: HistoryEntry) {
        self.state.finish_task(entry);
    }

    /// Write the snapshot and summary files, then sync the store.
    ///
    /// Fails with [`WorkflowError::ConcurrentModification`] when another
    /// process saved the snapshot since this session read it.
    pub async fn save(&mut self) -> WorkflowResult<SaveReport> {
        let path = self.identity.state_file.clone();
        let on_disk = read_snapshot_revision(&path);
        if let Some(found) = on_disk {
            if Some(found) != self.disk_revision {
                return Err(WorkflowError::ConcurrentModification {
                    path,
                    expected: self.disk_revision.unwrap_or(0),
                    found,
                });
            }
        }

        self.state.revision = self.state.revision.max(on_disk.unwrap_or(0)) + 1;
        self.state.updated_at = Some(now_timestamp());

        self.identity.ensure_state_dir()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Written in place so a hard-linked legacy mirror keeps seeing updates.
        fs::write(&path, serde_json::to_string_pretty(&self.state)?)?;
        self.disk_revision = Some(self.state.revision);
        self.write_summary_file()?;
        tracing::debug!("Saved revision {} to {}", self.state.revision, path.display());

        let sync = self.sync().await;
        if let SyncOutcome::Failed(reason) = &sync {
            tracing::warn!("Workflow state saved locally but not synced: {reason}");
        }
        Ok(SaveReport { state_file: path, sync })
    }

    fn write_summary_file(&self) -> WorkflowResult<()> {
        let document = SummaryDocument {
            user_id: &self.identity.user_id,
            project_path: self.identity.project_key(),
            current_phase: self.state.current_phase,
            task_description: &self.state.task_description,
            generated_at: now_timestamp(),
            summary: ProjectSummary::from_history(&self.state.history),
        };
        fs::write(&self.identity.summary_file, serde_json::to_string_pretty(&document)?)?;
        Ok(())
    }

    async fn sync(&self) -> SyncOutcome {
        let Some(store) = self.store.clone() else {
            return SyncOutcome::Disabled;
        };
        let user = self.identity.user_id.as_str();
        let project = self.identity.project_key();

        let document = match serde_json::to_value(&self.state) {
            Ok(document) => document,
            Err(e) => return SyncOutcome::Failed(e.to_string()),
        };
        if let Err(e) = store.save_state(user, &project, &document).await {
            return SyncOutcome::Failed(e.to_string());
        }

        for entry in &self.state.history {
            if let Err(e) = store.insert_history_entry(user, &project, entry).await {
                return SyncOutcome::Failed(e.to_string());
            }
        }
        SyncOutcome::Synced
    }

    /// One page of history, from the store when it answers, else from the snapshot.
    pub async fn history_page(&self, query: &HistoryQuery) -> HistoryPage {
        if let Some(store) = &self.store {
            match store.get_history_for_user(&self.identity.user_id, &self.identity.project_key(), query).await {
                Ok(page) => return page,
                Err(e) => tracing::warn!("Reading history from store failed, using local history: {e}"),
            }
        }
        query.apply(&self.state.history)
    }

    /// Per-period counts, from the store when it answers, else from the snapshot.
    pub async fn history_buckets(&self, range: &DateRange, frequency: Frequency) -> Vec<HistoryBucket> {
        if let Some(store) = &self.store {
            match store
                .get_history_summary(&self.identity.user_id, &self.identity.project_key(), range, frequency)
                .await
            {
                Ok(buckets) => return buckets,
                Err(e) => tracing::warn!("Reading history summary from store failed: {e}"),
            }
        }
        bucket_history(&self.state.history, range, frequency)
    }

    /// The stored project summary. Errors here are surfaced to the caller.
    pub async fn stored_summary(&self) -> WorkflowResult<Option<ProjectSummary>> {
        match &self.store {
            Some(store) => Ok(store
                .get_summary_for_user(&self.identity.user_id, &self.identity.project_key())
                .await?),
            None => Ok(None),
        }
    }
}

fn backend_name(store: &Option<Arc<dyn WorkflowStore>>) -> &'static str {
    store.as_ref().map_or("no", |s| s.backend().as_str())
}

fn is_newer(candidate: &WorkflowState, current: &WorkflowState) -> bool {
    match (&candidate.updated_at, &current.updated_at) {
        (Some(candidate), Some(current)) => candidate > current,
        (Some(_), None) => true,
        _ => false,
    }
}

fn read_snapshot(path: &Path) -> WorkflowResult<Option<WorkflowState>> {
    match fs::read_to_string(path) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn read_snapshot_revision(path: &Path) -> Option<u64> {
    let raw = fs::read_to_string(path).ok()?;
    let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
    Some(value.get("revision").and_then(serde_json::Value::as_u64).unwrap_or(0))
}

async fn fetch_remote_state(store: &dyn WorkflowStore, identity: &Identity) -> Option<WorkflowState> {
    match store.get_state(&identity.user_id, &identity.project_key()).await {
        Ok(Some(document)) => match serde_json::from_value(document) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!("Ignoring unreadable state from store: {e}");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            tracing::warn!("Could not read state from store: {e}");
            None
        }
    }
}
