use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use uuid::Uuid;

use super::models::{CatalogEntity, CollectionConfig, CollectionKind, Tombstone};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record not found in {0}: {1}")]
    RecordNotFound(CollectionKind, Uuid),

    #[error("Data directory not found")]
    DataDirNotFound,
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// File-backed catalogue store: one JSON document per record under a
/// per-collection directory, media blobs under `media/`, plus the tombstone
/// log and the per-collection config documents as JSON sidecar files.
pub struct CatalogStorage {
    base_path: PathBuf,
    // The tombstone log and the config documents are whole-file rewrites
    // shared between the host and the sync worker; without this lock two
    // interleaved read-modify-write cycles can drop each other's entries
    meta_lock: Mutex<()>,
}

impl CatalogStorage {
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            base_path,
            meta_lock: Mutex::new(()),
        }
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        dirs::data_local_dir()
            .map(|p| p.join("clipshelf"))
            .ok_or(StorageError::DataDirNotFound)
    }

    /// Initialize storage directories
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(self.collection_dir(CollectionKind::Lessons))?;
        fs::create_dir_all(self.collection_dir(CollectionKind::Clips))?;
        fs::create_dir_all(self.media_dir())?;
        fs::create_dir_all(self.config_dir())?;
        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn collection_dir(&self, kind: CollectionKind) -> PathBuf {
        self.base_path.join(kind.folder())
    }

    fn record_path(&self, kind: CollectionKind, id: Uuid) -> PathBuf {
        self.collection_dir(kind).join(format!("{}.json", id))
    }

    fn media_dir(&self) -> PathBuf {
        self.base_path.join("media")
    }

    fn blob_path(&self, id: Uuid) -> PathBuf {
        self.media_dir().join(format!("{}.bin", id))
    }

    fn config_dir(&self) -> PathBuf {
        self.base_path.join("config")
    }

    fn config_path(&self, kind: CollectionKind) -> PathBuf {
        self.config_dir().join(kind.config_file())
    }

    fn tombstones_path(&self) -> PathBuf {
        self.base_path.join("tombstones.json")
    }

    /// Write through a sibling temp file and rename, so a concurrent
    /// reader sees the old content or the new, never a truncated file.
    fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
        // Unique staging name, two writers must not tear each other
        let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4()));
        fs::write(&tmp, content)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    // ===== Record Operations =====

    pub fn list_all<E: CatalogEntity>(&self) -> Result<Vec<E>> {
        let dir = self.collection_dir(E::COLLECTION);

        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.is_file() && path.extension().map_or(false, |e| e == "json") {
                let content = fs::read_to_string(&path)?;
                let record: E = serde_json::from_str(&content)?;
                records.push(record);
            }
        }

        // Sort by modified_at descending
        records.sort_by(|a, b| b.modified_at().cmp(&a.modified_at()));

        Ok(records)
    }

    pub fn get<E: CatalogEntity>(&self, id: Uuid) -> Result<Option<E>> {
        let path = self.record_path(E::COLLECTION, id);

        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        let record: E = serde_json::from_str(&content)?;
        Ok(Some(record))
    }

    /// Check for a record without deserializing it.
    pub fn exists(&self, kind: CollectionKind, id: Uuid) -> bool {
        self.record_path(kind, id).exists()
    }

    /// Write a record as-is. Timestamps are left untouched so the sync
    /// engine can stamp remote-assigned modification times; user edits go
    /// through the models' `mark_modified` first.
    pub fn put<E: CatalogEntity>(&self, record: &E) -> Result<()> {
        let path = self.record_path(E::COLLECTION, record.id());

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(record)?;
        Self::write_atomic(&path, content.as_bytes())
    }

    /// Delete a record and its blob, recording tombstones for any remote
    /// files the record was synced to. A record that never uploaded leaves
    /// no tombstones behind.
    pub fn delete_entity<E: CatalogEntity>(&self, id: Uuid) -> Result<()> {
        let record: E = self
            .get(id)?
            .ok_or(StorageError::RecordNotFound(E::COLLECTION, id))?;

        let mut remote_ids = Vec::new();
        if let Some(rid) = record.remote_id() {
            remote_ids.push(rid.to_string());
        }
        if let Some(rid) = record.blob_remote_id() {
            remote_ids.push(rid.to_string());
        }
        if !remote_ids.is_empty() {
            self.add_tombstones(&remote_ids)?;
        }

        fs::remove_file(self.record_path(E::COLLECTION, id))?;
        if E::HAS_BLOB {
            self.delete_blob(id)?;
        }

        Ok(())
    }

    // ===== Blob Operations =====

    pub fn put_blob(&self, id: Uuid, content: &[u8]) -> Result<()> {
        let path = self.blob_path(id);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        Self::write_atomic(&path, content)
    }

    pub fn get_blob(&self, id: Uuid) -> Result<Option<Vec<u8>>> {
        let path = self.blob_path(id);

        if !path.exists() {
            return Ok(None);
        }

        Ok(Some(fs::read(&path)?))
    }

    pub fn delete_blob(&self, id: Uuid) -> Result<()> {
        let path = self.blob_path(id);

        if path.exists() {
            fs::remove_file(&path)?;
        }

        Ok(())
    }

    // ===== Tombstone Operations =====

    pub fn list_tombstones(&self) -> Result<Vec<Tombstone>> {
        let _guard = self.meta_lock.lock().unwrap();
        self.read_tombstones()
    }

    fn read_tombstones(&self) -> Result<Vec<Tombstone>> {
        let path = self.tombstones_path();

        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&path)?;
        let tombstones: Vec<Tombstone> = serde_json::from_str(&content)?;
        Ok(tombstones)
    }

    fn save_tombstones(&self, tombstones: &[Tombstone]) -> Result<()> {
        let content = serde_json::to_string_pretty(tombstones)?;
        Self::write_atomic(&self.tombstones_path(), content.as_bytes())
    }

    /// Record that these remote file ids were intentionally deleted. Ids
    /// already present are not duplicated.
    pub fn add_tombstones(&self, remote_ids: &[String]) -> Result<()> {
        let _guard = self.meta_lock.lock().unwrap();
        let mut tombstones = self.read_tombstones()?;

        for rid in remote_ids {
            if !tombstones.iter().any(|t| &t.remote_id == rid) {
                tombstones.push(Tombstone::new(rid.clone()));
            }
        }

        self.save_tombstones(&tombstones)
    }

    /// Drop tombstones once the remote deletion has been confirmed.
    pub fn remove_tombstones(&self, remote_ids: &[String]) -> Result<()> {
        let _guard = self.meta_lock.lock().unwrap();
        let mut tombstones = self.read_tombstones()?;
        tombstones.retain(|t| !remote_ids.contains(&t.remote_id));
        self.save_tombstones(&tombstones)
    }

    // ===== Config Operations =====

    pub fn get_config(&self, kind: CollectionKind) -> Result<Option<CollectionConfig>> {
        let _guard = self.meta_lock.lock().unwrap();
        let path = self.config_path(kind);

        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        let config: CollectionConfig = serde_json::from_str(&content)?;
        Ok(Some(config))
    }

    pub fn put_config(&self, kind: CollectionKind, config: &CollectionConfig) -> Result<()> {
        let _guard = self.meta_lock.lock().unwrap();
        let path = self.config_path(kind);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(config)?;
        Self::write_atomic(&path, content.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::models::{Clip, Lesson};
    use tempfile::TempDir;

    fn test_storage() -> (TempDir, CatalogStorage) {
        let dir = TempDir::new().unwrap();
        let storage = CatalogStorage::new(dir.path().to_path_buf());
        storage.init().unwrap();
        (dir, storage)
    }

    #[test]
    fn test_put_and_get_roundtrip() {
        let (_dir, storage) = test_storage();

        let lesson = Lesson::new("Intro to knots".to_string());
        storage.put(&lesson).unwrap();

        let loaded: Lesson = storage.get(lesson.id).unwrap().unwrap();
        assert_eq!(loaded.id, lesson.id);
        assert_eq!(loaded.title, "Intro to knots");
        assert!(loaded.remote_id.is_none());
    }

    #[test]
    fn test_get_missing_returns_none() {
        let (_dir, storage) = test_storage();
        let missing: Option<Lesson> = storage.get(Uuid::new_v4()).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_put_preserves_caller_timestamps() {
        let (_dir, storage) = test_storage();

        let mut lesson = Lesson::new("Timing".to_string());
        let original = lesson.modified_at;
        storage.put(&lesson).unwrap();

        let stored: Lesson = storage.get(lesson.id).unwrap().unwrap();
        assert_eq!(stored.modified_at, original);

        // User edits stamp the model; put itself never touches the clock
        lesson.mark_modified();
        storage.put(&lesson).unwrap();
        let stored: Lesson = storage.get(lesson.id).unwrap().unwrap();
        assert!(stored.modified_at >= original);
        assert_eq!(stored.modified_at, lesson.modified_at);
    }

    #[test]
    fn test_list_all_per_collection() {
        let (_dir, storage) = test_storage();

        let lesson = Lesson::new("Splicing".to_string());
        storage.put(&lesson).unwrap();
        let clip = Clip::new(lesson.id, "Eye splice".to_string(), 10.0, 25.0);
        storage.put(&clip).unwrap();

        let lessons: Vec<Lesson> = storage.list_all().unwrap();
        let clips: Vec<Clip> = storage.list_all().unwrap();
        assert_eq!(lessons.len(), 1);
        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].lesson_id, lesson.id);
    }

    #[test]
    fn test_blob_roundtrip() {
        let (_dir, storage) = test_storage();
        let id = Uuid::new_v4();

        storage.put_blob(id, b"fake video bytes").unwrap();
        assert_eq!(
            storage.get_blob(id).unwrap().unwrap(),
            b"fake video bytes".to_vec()
        );

        storage.delete_blob(id).unwrap();
        assert!(storage.get_blob(id).unwrap().is_none());
        // Deleting again is a no-op
        storage.delete_blob(id).unwrap();
    }

    #[test]
    fn test_delete_entity_records_tombstones() {
        let (_dir, storage) = test_storage();

        let mut lesson = Lesson::new("Whipping".to_string());
        lesson.remote_id = Some("remote-rec-1".to_string());
        lesson.media_remote_id = Some("remote-blob-1".to_string());
        storage.put(&lesson).unwrap();
        storage.put_blob(lesson.id, b"blob").unwrap();

        storage.delete_entity::<Lesson>(lesson.id).unwrap();

        assert!(storage.get::<Lesson>(lesson.id).unwrap().is_none());
        assert!(storage.get_blob(lesson.id).unwrap().is_none());

        let tombstones = storage.list_tombstones().unwrap();
        let ids: Vec<&str> = tombstones.iter().map(|t| t.remote_id.as_str()).collect();
        assert_eq!(tombstones.len(), 2);
        assert!(ids.contains(&"remote-rec-1"));
        assert!(ids.contains(&"remote-blob-1"));
    }

    #[test]
    fn test_delete_unsynced_entity_leaves_no_tombstones() {
        let (_dir, storage) = test_storage();

        let lesson = Lesson::new("Never uploaded".to_string());
        storage.put(&lesson).unwrap();
        storage.delete_entity::<Lesson>(lesson.id).unwrap();

        assert!(storage.list_tombstones().unwrap().is_empty());
    }

    #[test]
    fn test_tombstone_add_and_remove() {
        let (_dir, storage) = test_storage();

        storage
            .add_tombstones(&["a".to_string(), "b".to_string()])
            .unwrap();
        // Re-adding an existing id does not duplicate it
        storage.add_tombstones(&["a".to_string()]).unwrap();
        assert_eq!(storage.list_tombstones().unwrap().len(), 2);

        storage.remove_tombstones(&["a".to_string()]).unwrap();
        let remaining = storage.list_tombstones().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].remote_id, "b");
    }

    #[test]
    fn test_concurrent_tombstone_writes_keep_all_entries() {
        let (_dir, storage) = test_storage();
        let storage = std::sync::Arc::new(storage);

        // The host deletes records while the worker prunes; simulate with
        // two writers hammering the log at once
        let writers: Vec<_> = (0..2)
            .map(|w| {
                let storage = storage.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        storage.add_tombstones(&[format!("w{}-{}", w, i)]).unwrap();
                    }
                })
            })
            .collect();
        for handle in writers {
            handle.join().unwrap();
        }

        assert_eq!(storage.list_tombstones().unwrap().len(), 200);
    }

    #[test]
    fn test_config_roundtrip() {
        let (_dir, storage) = test_storage();

        assert!(storage.get_config(CollectionKind::Lessons).unwrap().is_none());

        let mut config = CollectionConfig::new();
        config.order.push(Uuid::new_v4());
        storage.put_config(CollectionKind::Lessons, &config).unwrap();

        let loaded = storage.get_config(CollectionKind::Lessons).unwrap().unwrap();
        assert_eq!(loaded.order, config.order);
        assert!(storage.get_config(CollectionKind::Clips).unwrap().is_none());
    }
}
