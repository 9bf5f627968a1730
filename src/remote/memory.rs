use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::store::{RemoteError, RemoteFile, RemoteStore};

/// In-process remote store backing tests and local-only runs. Assigns its
/// own file ids and modification times the way a real store would.
pub struct MemoryRemote {
    state: Mutex<MemoryState>,
}

struct MemoryState {
    files: HashMap<String, StoredFile>,
    next_id: u64,
    offline: bool,
    latency: Duration,
    refusals: Option<(String, usize)>,
}

#[derive(Clone)]
struct StoredFile {
    folder: String,
    name: String,
    content: Vec<u8>,
    modified_at: DateTime<Utc>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                files: HashMap::new(),
                next_id: 1,
                offline: false,
                latency: Duration::ZERO,
                refusals: None,
            }),
        }
    }

    /// Simulate a lost connection: every operation fails until cleared.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    /// Delay every operation, for tests that need to catch a transfer
    /// mid-flight.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().unwrap().latency = latency;
    }

    /// Fail the next `count` writes of the given mime type, for tests
    /// that need an upload to die between its blob and record writes.
    pub fn refuse_writes(&self, mime_type: &str, count: usize) {
        self.state.lock().unwrap().refusals = Some((mime_type.to_string(), count));
    }

    async fn pause(&self) {
        let latency = self.state.lock().unwrap().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    /// Insert a file with explicit metadata, as if another device had
    /// uploaded it.
    pub fn seed_file(
        &self,
        folder: &str,
        name: &str,
        content: &[u8],
        modified_at: DateTime<Utc>,
    ) -> String {
        let mut state = self.state.lock().unwrap();
        let id = format!("mem-{}", state.next_id);
        state.next_id += 1;
        state.files.insert(
            id.clone(),
            StoredFile {
                folder: folder.to_string(),
                name: name.to_string(),
                content: content.to_vec(),
                modified_at,
            },
        );
        id
    }

    pub fn file_count(&self) -> usize {
        self.state.lock().unwrap().files.len()
    }

    pub fn find_by_name(&self, folder: &str, name: &str) -> Option<RemoteFile> {
        let state = self.state.lock().unwrap();
        state
            .files
            .iter()
            .find(|(_, f)| f.folder == folder && f.name == name)
            .map(|(id, f)| RemoteFile {
                id: id.clone(),
                name: f.name.clone(),
                modified_at: f.modified_at,
            })
    }

    fn check_online(state: &MemoryState) -> Result<(), RemoteError> {
        if state.offline {
            return Err(RemoteError::Server {
                status: 503,
                message: "offline".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn list(&self, folder: &str) -> Result<Vec<RemoteFile>, RemoteError> {
        self.pause().await;
        let state = self.state.lock().unwrap();
        Self::check_online(&state)?;

        let mut files: Vec<RemoteFile> = state
            .files
            .iter()
            .filter(|(_, f)| f.folder == folder)
            .map(|(id, f)| RemoteFile {
                id: id.clone(),
                name: f.name.clone(),
                modified_at: f.modified_at,
            })
            .collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn read(&self, file_id: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        self.pause().await;
        let state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        Ok(state.files.get(file_id).map(|f| f.content.clone()))
    }

    async fn write(
        &self,
        folder: &str,
        name: &str,
        content: Vec<u8>,
        mime_type: &str,
        existing_file_id: Option<&str>,
    ) -> Result<RemoteFile, RemoteError> {
        self.pause().await;
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state)?;

        if let Some((mime, remaining)) = state.refusals.as_mut() {
            if mime == mime_type && *remaining > 0 {
                *remaining -= 1;
                return Err(RemoteError::Server {
                    status: 500,
                    message: "write refused".to_string(),
                });
            }
        }

        if let Some(file_id) = existing_file_id {
            if let Some(file) = state.files.get_mut(file_id) {
                file.content = content;
                file.modified_at = Utc::now();
                return Ok(RemoteFile {
                    id: file_id.to_string(),
                    name: file.name.clone(),
                    modified_at: file.modified_at,
                });
            }
            // Stale reference, fall through and create a new file
        }

        let id = format!("mem-{}", state.next_id);
        state.next_id += 1;
        let file = StoredFile {
            folder: folder.to_string(),
            name: name.to_string(),
            content,
            modified_at: Utc::now(),
        };
        let remote = RemoteFile {
            id: id.clone(),
            name: file.name.clone(),
            modified_at: file.modified_at,
        };
        state.files.insert(id, file);
        Ok(remote)
    }

    async fn delete(&self, file_id: &str) -> Result<(), RemoteError> {
        self.pause().await;
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        // Absent is fine, delete is idempotent
        state.files.remove(file_id);
        Ok(())
    }
}
