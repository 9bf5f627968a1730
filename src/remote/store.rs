use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Authentication failed")]
    AuthFailed,
    #[error("Remote file not found: {0}")]
    NotFound(String),
    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Metadata the remote store reports for one file. `modified_at` is the
/// store's own clock and is what timestamp comparisons are made against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub modified_at: DateTime<Utc>,
}

/// Flat remote file store addressed by folder name and file id. The sync
/// engine only ever talks to this trait; `DriveClient` implements it over
/// HTTP and `MemoryRemote` in process.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// List the files in one folder (non-recursive).
    async fn list(&self, folder: &str) -> Result<Vec<RemoteFile>, RemoteError>;

    /// Read file contents by id. `Ok(None)` means the file no longer exists.
    async fn read(&self, file_id: &str) -> Result<Option<Vec<u8>>, RemoteError>;

    /// Create or overwrite a file. With `existing_file_id` set the content
    /// replaces that file; if the id has gone stale a new file is created
    /// instead. Returns the resulting file's metadata.
    async fn write(
        &self,
        folder: &str,
        name: &str,
        content: Vec<u8>,
        mime_type: &str,
        existing_file_id: Option<&str>,
    ) -> Result<RemoteFile, RemoteError>;

    /// Delete by id. Deleting a file that is already gone succeeds.
    async fn delete(&self, file_id: &str) -> Result<(), RemoteError>;
}

/// Read and deserialize a JSON file, `Ok(None)` if it no longer exists.
pub async fn read_json<T: DeserializeOwned>(
    store: &dyn RemoteStore,
    file_id: &str,
) -> Result<Option<T>, RemoteError> {
    match store.read(file_id).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}
