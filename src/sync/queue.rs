use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::catalog::CollectionKind;

/// Priority for ordinary user-triggered tasks.
pub const DEFAULT_PRIORITY: i32 = 0;
/// Priority for tasks that unblock other work, like fetching missing
/// parent lessons before re-running a clips reconciliation.
pub const HIGH_PRIORITY: i32 = 10;

/// Persistent queue of pending sync tasks
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncQueue {
    pub items: Vec<SyncTask>,
}

/// A single queued sync task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTask {
    /// Unique ID for this queue entry
    pub id: Uuid,
    /// What to do
    pub kind: TaskKind,
    pub status: TaskStatus,
    /// Higher runs first; equal priorities run in enqueue order
    pub priority: i32,
    /// When this task was queued
    pub created_at: DateTime<Utc>,
    /// Last error message if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Types of sync tasks that can be queued
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TaskKind {
    /// Reconcile one whole collection against the remote
    ReconcileCollection { collection: CollectionKind },
    /// Sync the shared config document of one collection
    SyncCollectionConfig { collection: CollectionKind },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Error,
}

impl SyncQueue {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Add a task to the queue. Returns false when an equivalent task is
    /// already pending or in progress. A failed twin does not suppress the
    /// fresh enqueue; it is replaced by it, so retrying also clears the
    /// stale error from the queue.
    pub fn enqueue(&mut self, kind: TaskKind, priority: i32) -> bool {
        let duplicate = self.items.iter().any(|task| {
            task.kind == kind
                && matches!(task.status, TaskStatus::Pending | TaskStatus::InProgress)
        });
        if duplicate {
            return false;
        }

        self.items
            .retain(|task| !(task.kind == kind && task.status == TaskStatus::Error));

        self.items.push(SyncTask {
            id: Uuid::new_v4(),
            kind,
            status: TaskStatus::Pending,
            priority,
            created_at: Utc::now(),
            last_error: None,
        });
        self.sort();
        true
    }

    fn sort(&mut self) {
        self.items
            .sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
    }

    /// Next task the worker should run, if any.
    pub fn next_pending(&self) -> Option<&SyncTask> {
        self.items.iter().find(|t| t.status == TaskStatus::Pending)
    }

    pub fn mark_in_progress(&mut self, task_id: Uuid) {
        if let Some(task) = self.items.iter_mut().find(|t| t.id == task_id) {
            task.status = TaskStatus::InProgress;
        }
    }

    /// Mark a task as completed (remove it)
    pub fn complete(&mut self, task_id: Uuid) {
        self.items.retain(|task| task.id != task_id);
    }

    /// Mark a task as failed with error
    pub fn fail(&mut self, task_id: Uuid, error: String) {
        if let Some(task) = self.items.iter_mut().find(|t| t.id == task_id) {
            task.status = TaskStatus::Error;
            task.last_error = Some(error);
        }
    }

    /// Put any in-progress task back to pending. Task bodies are written
    /// to be re-runnable, so an interrupted one simply runs again.
    pub fn demote_in_progress(&mut self) -> bool {
        let mut changed = false;
        for task in self.items.iter_mut() {
            if task.status == TaskStatus::InProgress {
                task.status = TaskStatus::Pending;
                changed = true;
            }
        }
        changed
    }

    pub fn is_active(&self) -> bool {
        self.items.iter().any(|t| t.status == TaskStatus::InProgress)
    }

    pub fn snapshot(&self) -> Vec<SyncTask> {
        self.items.clone()
    }

    /// Load queue from file
    pub fn load(path: &Path) -> Result<Self, std::io::Error> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let data = std::fs::read_to_string(path)?;
        let mut queue: Self = serde_json::from_str(&data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        // A task left in progress by a crash resumes from scratch
        queue.demote_in_progress();
        queue.sort();
        Ok(queue)
    }

    /// Save queue to file
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn reconcile(collection: CollectionKind) -> TaskKind {
        TaskKind::ReconcileCollection { collection }
    }

    #[test]
    fn test_queue_deduplication() {
        let mut queue = SyncQueue::new();

        assert!(queue.enqueue(reconcile(CollectionKind::Lessons), DEFAULT_PRIORITY));
        assert!(!queue.enqueue(reconcile(CollectionKind::Lessons), DEFAULT_PRIORITY));

        assert_eq!(queue.items.len(), 1);
    }

    #[test]
    fn test_queue_different_kinds_coexist() {
        let mut queue = SyncQueue::new();

        queue.enqueue(reconcile(CollectionKind::Lessons), DEFAULT_PRIORITY);
        queue.enqueue(reconcile(CollectionKind::Clips), DEFAULT_PRIORITY);
        queue.enqueue(
            TaskKind::SyncCollectionConfig {
                collection: CollectionKind::Lessons,
            },
            DEFAULT_PRIORITY,
        );

        assert_eq!(queue.items.len(), 3);
    }

    #[test]
    fn test_in_progress_still_suppresses_duplicates() {
        let mut queue = SyncQueue::new();

        queue.enqueue(reconcile(CollectionKind::Lessons), DEFAULT_PRIORITY);
        let id = queue.next_pending().unwrap().id;
        queue.mark_in_progress(id);

        assert!(!queue.enqueue(reconcile(CollectionKind::Lessons), DEFAULT_PRIORITY));
        assert_eq!(queue.items.len(), 1);
        assert!(queue.is_active());
    }

    #[test]
    fn test_reenqueue_replaces_failed_twin() {
        let mut queue = SyncQueue::new();

        queue.enqueue(reconcile(CollectionKind::Lessons), DEFAULT_PRIORITY);
        queue.enqueue(reconcile(CollectionKind::Clips), DEFAULT_PRIORITY);
        let failed_id = queue.next_pending().unwrap().id;
        queue.fail(failed_id, "remote unreachable".to_string());

        assert!(queue.enqueue(reconcile(CollectionKind::Lessons), DEFAULT_PRIORITY));

        // The stale failure is gone; the unrelated clips task is untouched
        assert_eq!(queue.items.len(), 2);
        let lessons: Vec<&SyncTask> = queue
            .items
            .iter()
            .filter(|t| t.kind == reconcile(CollectionKind::Lessons))
            .collect();
        assert_eq!(lessons.len(), 1);
        assert_ne!(lessons[0].id, failed_id);
        assert_eq!(lessons[0].status, TaskStatus::Pending);
        assert!(lessons[0].last_error.is_none());
    }

    #[test]
    fn test_failure_of_other_kind_is_kept_on_enqueue() {
        let mut queue = SyncQueue::new();

        queue.enqueue(reconcile(CollectionKind::Clips), DEFAULT_PRIORITY);
        let clips_id = queue.next_pending().unwrap().id;
        queue.fail(clips_id, "boom".to_string());

        queue.enqueue(reconcile(CollectionKind::Lessons), DEFAULT_PRIORITY);

        let clips = queue.items.iter().find(|t| t.id == clips_id).unwrap();
        assert_eq!(clips.status, TaskStatus::Error);
    }

    #[test]
    fn test_priority_orders_dispatch() {
        let mut queue = SyncQueue::new();

        queue.enqueue(reconcile(CollectionKind::Clips), DEFAULT_PRIORITY);
        queue.enqueue(reconcile(CollectionKind::Lessons), HIGH_PRIORITY);

        let next = queue.next_pending().unwrap();
        assert_eq!(
            next.kind,
            TaskKind::ReconcileCollection {
                collection: CollectionKind::Lessons
            }
        );
    }

    #[test]
    fn test_equal_priority_is_fifo() {
        let mut queue = SyncQueue::new();

        queue.enqueue(reconcile(CollectionKind::Clips), DEFAULT_PRIORITY);
        queue.enqueue(reconcile(CollectionKind::Lessons), DEFAULT_PRIORITY);

        let next = queue.next_pending().unwrap();
        assert_eq!(
            next.kind,
            TaskKind::ReconcileCollection {
                collection: CollectionKind::Clips
            }
        );
    }

    #[test]
    fn test_complete_removes_task() {
        let mut queue = SyncQueue::new();

        queue.enqueue(reconcile(CollectionKind::Lessons), DEFAULT_PRIORITY);
        let id = queue.next_pending().unwrap().id;
        queue.mark_in_progress(id);
        queue.complete(id);

        assert!(queue.items.is_empty());
        assert!(!queue.is_active());
    }

    #[test]
    fn test_load_demotes_in_progress() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync_queue.json");

        let mut queue = SyncQueue::new();
        queue.enqueue(reconcile(CollectionKind::Lessons), DEFAULT_PRIORITY);
        let id = queue.next_pending().unwrap().id;
        queue.mark_in_progress(id);
        queue.save(&path).unwrap();

        let loaded = SyncQueue::load(&path).unwrap();
        assert_eq!(loaded.items.len(), 1);
        assert_eq!(loaded.items[0].status, TaskStatus::Pending);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let queue = SyncQueue::load(&dir.path().join("sync_queue.json")).unwrap();
        assert!(queue.items.is_empty());
    }
}
