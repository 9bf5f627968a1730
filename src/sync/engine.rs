use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::catalog::{
    CatalogEntity, CatalogStorage, Clip, CollectionConfig, CollectionKind, Lesson, StorageError,
};
use crate::remote::{read_json, RemoteError, RemoteFile, RemoteStore};
use crate::sync::planner::{self, ItemState, Resolution};
use crate::sync::queue::{TaskKind, DEFAULT_PRIORITY, HIGH_PRIORITY};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Remote file {0} disappeared during sync")]
    FileVanished(String),

    #[error("Lesson {0} has no media blob to upload")]
    MissingBlob(Uuid),

    #[error("Record {child} references parent {parent} which exists neither locally nor remotely")]
    MissingParent { child: Uuid, parent: Uuid },
}

/// Counters for what one completed task did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSummary {
    pub uploaded: usize,
    pub downloaded: usize,
    pub removed: usize,
    pub deferred: usize,
    pub duration_ms: u64,
}

/// Result of running one task. Follow-ups are enqueued by the worker after
/// the finished task leaves the queue, so duplicate suppression cannot
/// swallow them.
#[derive(Debug, Default)]
pub struct TaskOutcome {
    pub summary: ReconcileSummary,
    pub followups: Vec<(TaskKind, i32)>,
}

/// Executes one sync task against the catalogue and the remote store. Local
/// records are only ever created or updated here, never deleted; deletions
/// flow strictly outward through the tombstone log.
pub struct SyncEngine {
    storage: Arc<CatalogStorage>,
    remote: Arc<dyn RemoteStore>,
}

impl SyncEngine {
    pub fn new(storage: Arc<CatalogStorage>, remote: Arc<dyn RemoteStore>) -> Self {
        Self { storage, remote }
    }

    pub async fn run(&self, kind: &TaskKind) -> Result<TaskOutcome, SyncError> {
        match kind {
            TaskKind::ReconcileCollection { collection } => match collection {
                CollectionKind::Lessons => self.reconcile::<Lesson>().await,
                CollectionKind::Clips => self.reconcile::<Clip>().await,
            },
            TaskKind::SyncCollectionConfig { collection } => self.sync_config(*collection).await,
        }
    }

    async fn reconcile<E: CatalogEntity>(&self) -> Result<TaskOutcome, SyncError> {
        let start = std::time::Instant::now();
        let collection = E::COLLECTION;
        log::info!("Sync: reconciling {}", collection);

        // 1. Snapshot local records and tombstones
        let local: Vec<E> = self.storage.list_all()?;
        let snapshot: Vec<ItemState> = local
            .iter()
            .map(|record| ItemState {
                id: record.id(),
                modified_at: record.modified_at(),
            })
            .collect();
        let tombstones: HashSet<String> = self
            .storage
            .list_tombstones()?
            .into_iter()
            .map(|t| t.remote_id)
            .collect();

        // 2. List the remote collection folder
        let listing = self.remote.list(collection.folder()).await?;
        log::info!(
            "Sync: {} has {} local records, {} remote files, {} tombstones",
            collection,
            snapshot.len(),
            listing.len(),
            tombstones.len(),
        );

        // 3. Plan
        let plan = planner::plan(&snapshot, &listing, &tombstones);
        let mut outcome = TaskOutcome::default();

        // 4. Push deletions first and prune their tombstones
        for file_id in &plan.remote_deletes {
            self.remote.delete(file_id).await?;
            self.storage.remove_tombstones(std::slice::from_ref(file_id))?;
            outcome.summary.removed += 1;
            log::debug!("Sync: deleted remote file {}", file_id);
        }

        // 5. Uploads
        for id in &plan.uploads {
            if self.upload_record::<E>(*id).await? {
                outcome.summary.uploaded += 1;
            }
        }

        // 6. Downloads. Clips whose parent lesson is still on its way get
        // deferred; the remote parent listing is fetched at most once.
        let mut remote_parents: Option<HashSet<Uuid>> = None;
        for rf in &plan.downloads {
            if self.download_record::<E>(rf, &mut remote_parents).await? {
                outcome.summary.downloaded += 1;
            } else {
                outcome.summary.deferred += 1;
            }
        }

        if outcome.summary.deferred > 0 {
            // Pull the missing parents first, then come back for the clips
            if let Some(parent) = E::PARENT {
                outcome.followups.push((
                    TaskKind::ReconcileCollection { collection: parent },
                    HIGH_PRIORITY,
                ));
            }
            outcome
                .followups
                .push((TaskKind::ReconcileCollection { collection }, DEFAULT_PRIORITY));
        }

        outcome.summary.duration_ms = start.elapsed().as_millis() as u64;
        log::info!(
            "Sync: {} done: {} uploaded, {} downloaded, {} deleted, {} deferred in {}ms",
            collection,
            outcome.summary.uploaded,
            outcome.summary.downloaded,
            outcome.summary.removed,
            outcome.summary.deferred,
            outcome.summary.duration_ms,
        );

        Ok(outcome)
    }

    /// Upload one record, blob first so the record body can reference the
    /// blob's remote id. Returns false when the record was deleted locally
    /// after planning.
    async fn upload_record<E: CatalogEntity>(&self, id: Uuid) -> Result<bool, SyncError> {
        let collection = E::COLLECTION;

        // Fresh read, edits made since planning are included
        let Some(mut record) = self.storage.get::<E>(id)? else {
            log::debug!("Sync: {} {} deleted locally before upload, skipping", collection, id);
            return Ok(false);
        };

        if E::HAS_BLOB {
            let blob = self.storage.get_blob(id)?.ok_or(SyncError::MissingBlob(id))?;
            let existing = record.blob_remote_id().map(|s| s.to_string());
            let blob_file = self
                .remote
                .write(
                    "media",
                    &format!("{}.bin", id),
                    blob,
                    record.blob_mime(),
                    existing.as_deref(),
                )
                .await?;
            record.set_blob_remote_id(Some(blob_file.id));
            // The blob id has to survive a failed record write below,
            // otherwise the retry uploads a second copy nobody references
            self.storage.put(&record)?;
        }

        let body = serde_json::to_vec_pretty(&record)?;
        let existing = record.remote_id().map(|s| s.to_string());
        let file = self
            .remote
            .write(
                collection.folder(),
                &format!("{}.json", id),
                body,
                "application/json",
                existing.as_deref(),
            )
            .await?;

        // The remote clock is authoritative once a write succeeds
        record.set_remote_id(Some(file.id.clone()));
        record.set_modified_at(file.modified_at);
        self.storage.put(&record)?;

        log::debug!("Sync: uploaded {} {} -> {}", collection, id, file.id);
        Ok(true)
    }

    /// Download one record into the catalogue, updating any existing local
    /// copy in place. Returns false when the download was skipped, either
    /// because the parent has not arrived yet or because a mid-task local
    /// write outranks the planned revision; the follow-up pass re-resolves
    /// both cases.
    async fn download_record<E: CatalogEntity>(
        &self,
        rf: &RemoteFile,
        remote_parents: &mut Option<HashSet<Uuid>>,
    ) -> Result<bool, SyncError> {
        let collection = E::COLLECTION;

        let bytes = self
            .remote
            .read(&rf.id)
            .await?
            .ok_or_else(|| SyncError::FileVanished(rf.name.clone()))?;
        let mut record: E = serde_json::from_slice(&bytes)?;

        // A record may not land before its parent does
        if let (Some(parent_kind), Some(parent_id)) = (E::PARENT, record.parent_id()) {
            if !self.storage.exists(parent_kind, parent_id) {
                if remote_parents.is_none() {
                    let listing = self.remote.list(parent_kind.folder()).await?;
                    let ids: HashSet<Uuid> = listing
                        .iter()
                        .filter_map(|f| f.name.strip_suffix(".json"))
                        .filter_map(|s| s.parse().ok())
                        .collect();
                    *remote_parents = Some(ids);
                }
                let known_remotely = remote_parents
                    .as_ref()
                    .map(|p| p.contains(&parent_id))
                    .unwrap_or(false);

                if known_remotely {
                    log::info!(
                        "Sync: deferring {} {} until {} {} arrives",
                        collection,
                        record.id(),
                        parent_kind,
                        parent_id,
                    );
                    return Ok(false);
                }
                return Err(SyncError::MissingParent {
                    child: record.id(),
                    parent: parent_id,
                });
            }
        }

        // Blob before record so a missing blob fails the task instead of
        // leaving a lesson that cannot play
        let mut blob = None;
        if E::HAS_BLOB {
            if let Some(blob_id) = record.blob_remote_id() {
                let bytes = self
                    .remote
                    .read(blob_id)
                    .await?
                    .ok_or_else(|| SyncError::FileVanished(format!("{}.bin", record.id())))?;
                blob = Some(bytes);
            }
        }

        // The plan was drawn from the state at listing time; with every
        // remote read done, re-read the local side once more. A write made
        // while this task was in flight outranks the planned revision and
        // is left for the follow-up pass to re-resolve
        match self.storage.get::<E>(record.id())? {
            Some(current)
                if planner::resolve(current.modified_at(), rf.modified_at)
                    == Resolution::Upload =>
            {
                log::info!(
                    "Sync: {} {} edited locally during sync, keeping the local copy",
                    collection,
                    record.id(),
                );
                return Ok(false);
            }
            None => {
                let deleted = self
                    .storage
                    .list_tombstones()?
                    .iter()
                    .any(|t| t.remote_id == rf.id);
                if deleted {
                    log::info!(
                        "Sync: {} {} deleted locally during sync, skipping download",
                        collection,
                        record.id(),
                    );
                    return Ok(false);
                }
            }
            _ => {}
        }

        if let Some(bytes) = blob {
            self.storage.put_blob(record.id(), &bytes)?;
        }
        record.set_remote_id(Some(rf.id.clone()));
        record.set_modified_at(rf.modified_at);
        self.storage.put(&record)?;

        log::debug!("Sync: downloaded {} {} <- {}", collection, record.id(), rf.id);
        Ok(true)
    }

    /// Sync the shared config document of one collection by comparing its
    /// local and remote modification times.
    async fn sync_config(&self, collection: CollectionKind) -> Result<TaskOutcome, SyncError> {
        let start = std::time::Instant::now();
        log::info!("Sync: config for {}", collection);

        let local = self.storage.get_config(collection)?;
        let listing = self.remote.list("config").await?;
        // Two devices creating the config concurrently can leave duplicate
        // names; the newest write wins, ties broken by greatest id, same
        // dominance rule the planner applies to record listings
        let remote_file = listing
            .into_iter()
            .filter(|f| f.name == collection.config_file())
            .max_by(|a, b| a.modified_at.cmp(&b.modified_at).then_with(|| a.id.cmp(&b.id)));

        let mut outcome = TaskOutcome::default();

        match (local, remote_file) {
            (None, None) => {}
            (Some(config), None) => {
                self.upload_config(collection, config, None).await?;
                outcome.summary.uploaded += 1;
            }
            (None, Some(rf)) => {
                if self.download_config(collection, &rf).await? {
                    outcome.summary.downloaded += 1;
                } else {
                    outcome.summary.deferred += 1;
                }
            }
            (Some(config), Some(rf)) => match planner::resolve(config.modified_at, rf.modified_at)
            {
                Resolution::Upload => {
                    self.upload_config(collection, config, Some(rf.id)).await?;
                    outcome.summary.uploaded += 1;
                }
                Resolution::Download => {
                    if self.download_config(collection, &rf).await? {
                        outcome.summary.downloaded += 1;
                    } else {
                        outcome.summary.deferred += 1;
                    }
                }
                Resolution::InSync => {
                    log::debug!("Sync: {} config already in sync", collection);
                }
            },
        }

        if outcome.summary.deferred > 0 {
            // The edit that outranked the download happened while this task
            // held the duplicate-suppression slot; schedule the re-resolve
            // ourselves
            outcome
                .followups
                .push((TaskKind::SyncCollectionConfig { collection }, DEFAULT_PRIORITY));
        }

        outcome.summary.duration_ms = start.elapsed().as_millis() as u64;
        Ok(outcome)
    }

    async fn upload_config(
        &self,
        collection: CollectionKind,
        mut config: CollectionConfig,
        listed_id: Option<String>,
    ) -> Result<(), SyncError> {
        let body = serde_json::to_vec_pretty(&config)?;
        // Prefer the id the listing just reported over a stored one
        let existing = listed_id.or_else(|| config.remote_id.clone());
        let file = self
            .remote
            .write(
                "config",
                collection.config_file(),
                body,
                "application/json",
                existing.as_deref(),
            )
            .await?;

        config.remote_id = Some(file.id);
        config.modified_at = file.modified_at;
        self.storage.put_config(collection, &config)?;

        log::debug!("Sync: uploaded {} config", collection);
        Ok(())
    }

    /// Returns false when a config edit made mid-task outranks the planned
    /// download.
    async fn download_config(
        &self,
        collection: CollectionKind,
        rf: &RemoteFile,
    ) -> Result<bool, SyncError> {
        let mut config: CollectionConfig = read_json(self.remote.as_ref(), &rf.id)
            .await?
            .ok_or_else(|| SyncError::FileVanished(rf.name.clone()))?;

        if let Some(current) = self.storage.get_config(collection)? {
            if planner::resolve(current.modified_at, rf.modified_at) == Resolution::Upload {
                log::info!(
                    "Sync: {} config edited during sync, keeping the local copy",
                    collection
                );
                return Ok(false);
            }
        }

        config.remote_id = Some(rf.id.clone());
        config.modified_at = rf.modified_at;
        self.storage.put_config(collection, &config)?;

        log::debug!("Sync: downloaded {} config", collection);
        Ok(true)
    }
}
