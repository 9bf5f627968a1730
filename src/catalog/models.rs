use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    Lessons,
    Clips,
}

impl CollectionKind {
    /// Remote folder (and local subdirectory) holding this collection's records.
    pub fn folder(&self) -> &'static str {
        match self {
            CollectionKind::Lessons => "lessons",
            CollectionKind::Clips => "clips",
        }
    }

    /// File name of the shared per-collection config document.
    pub fn config_file(&self) -> &'static str {
        match self {
            CollectionKind::Lessons => "lessons.json",
            CollectionKind::Clips => "clips.json",
        }
    }
}

impl std::fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.folder())
    }
}

/// Behavior every synced record shares: identity, modification time, and the
/// remote file reference populated after the first upload. Lessons also carry
/// a media blob with its own remote reference; clips reference a parent
/// lesson that must exist before the clip may be inserted.
pub trait CatalogEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: CollectionKind;
    const HAS_BLOB: bool = false;
    const PARENT: Option<CollectionKind> = None;

    fn id(&self) -> Uuid;
    fn modified_at(&self) -> DateTime<Utc>;
    fn set_modified_at(&mut self, at: DateTime<Utc>);
    fn remote_id(&self) -> Option<&str>;
    fn set_remote_id(&mut self, id: Option<String>);

    fn blob_remote_id(&self) -> Option<&str> {
        None
    }

    fn set_blob_remote_id(&mut self, _id: Option<String>) {}

    fn blob_mime(&self) -> &str {
        "application/octet-stream"
    }

    fn parent_id(&self) -> Option<Uuid> {
        None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: Uuid,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub duration_secs: f64,
    pub media_type: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_remote_id: Option<String>,
}

impl Lesson {
    pub fn new(title: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title,
            notes: None,
            duration_secs: 0.0,
            media_type: "video/mp4".to_string(),
            created_at: now,
            modified_at: now,
            remote_id: None,
            media_remote_id: None,
        }
    }

    pub fn mark_modified(&mut self) {
        self.modified_at = Utc::now();
    }
}

impl CatalogEntity for Lesson {
    const COLLECTION: CollectionKind = CollectionKind::Lessons;
    const HAS_BLOB: bool = true;

    fn id(&self) -> Uuid {
        self.id
    }

    fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }

    fn set_modified_at(&mut self, at: DateTime<Utc>) {
        self.modified_at = at;
    }

    fn remote_id(&self) -> Option<&str> {
        self.remote_id.as_deref()
    }

    fn set_remote_id(&mut self, id: Option<String>) {
        self.remote_id = id;
    }

    fn blob_remote_id(&self) -> Option<&str> {
        self.media_remote_id.as_deref()
    }

    fn set_blob_remote_id(&mut self, id: Option<String>) {
        self.media_remote_id = id;
    }

    fn blob_mime(&self) -> &str {
        &self.media_type
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clip {
    pub id: Uuid,
    pub lesson_id: Uuid,
    pub label: String,
    pub tags: Vec<String>,
    pub start_secs: f64,
    pub end_secs: f64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
}

impl Clip {
    pub fn new(lesson_id: Uuid, label: String, start_secs: f64, end_secs: f64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            lesson_id,
            label,
            tags: Vec::new(),
            start_secs,
            end_secs,
            created_at: now,
            modified_at: now,
            remote_id: None,
        }
    }

    pub fn mark_modified(&mut self) {
        self.modified_at = Utc::now();
    }
}

impl CatalogEntity for Clip {
    const COLLECTION: CollectionKind = CollectionKind::Clips;
    const PARENT: Option<CollectionKind> = Some(CollectionKind::Lessons);

    fn id(&self) -> Uuid {
        self.id
    }

    fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }

    fn set_modified_at(&mut self, at: DateTime<Utc>) {
        self.modified_at = at;
    }

    fn remote_id(&self) -> Option<&str> {
        self.remote_id.as_deref()
    }

    fn set_remote_id(&mut self, id: Option<String>) {
        self.remote_id = id;
    }

    fn parent_id(&self) -> Option<Uuid> {
        Some(self.lesson_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigGroup {
    pub name: String,
    pub items: Vec<Uuid>,
}

/// Shared ordering/grouping document for one collection. One JSON file per
/// collection on the remote; synced whole-file by timestamp comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionConfig {
    pub order: Vec<Uuid>,
    pub groups: Vec<ConfigGroup>,
    pub modified_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
}

impl CollectionConfig {
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            groups: Vec::new(),
            modified_at: Utc::now(),
            remote_id: None,
        }
    }

    pub fn mark_modified(&mut self) {
        self.modified_at = Utc::now();
    }
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    pub remote_id: String,
    pub deleted_at: DateTime<Utc>,
}

impl Tombstone {
    pub fn new(remote_id: String) -> Self {
        Self {
            remote_id,
            deleted_at: Utc::now(),
        }
    }
}
