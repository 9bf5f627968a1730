//! Queue-driven sync worker. Owns the persistent task queue and a single
//! dedicated loop that runs one task at a time against the engine.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::catalog::{CatalogStorage, CollectionKind};
use crate::remote::RemoteStore;
use crate::sync::engine::{ReconcileSummary, SyncEngine, SyncError, TaskOutcome};
use crate::sync::queue::{SyncQueue, SyncTask, TaskKind, TaskStatus, DEFAULT_PRIORITY};

/// Fixed pause between finished tasks, keeps remote API pressure bounded.
const DEFAULT_THROTTLE_MS: u64 = 500;

const CONTROL_BUFFER: usize = 32;

/// Slow event subscribers lose old events rather than blocking the worker.
const EVENT_BUFFER: usize = 64;

/// Tunables for the worker loop.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Pause between finished tasks
    pub throttle: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            throttle: Duration::from_millis(DEFAULT_THROTTLE_MS),
        }
    }
}

/// Messages to control the sync worker
enum WorkerMessage {
    /// Queue contents changed, check for runnable work
    Wake,
    /// Remote handle available, begin dispatching
    Start(Arc<dyn RemoteStore>),
    /// Release the remote handle and stop dispatching
    Stop,
    /// Host shutting down
    Shutdown,
}

/// Broadcast on every queue mutation. Observability only; consumers that
/// lag simply miss events and re-read the snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum QueueEvent {
    Enqueued { task: SyncTask },
    TaskStarted { task_id: Uuid },
    TaskCompleted { task_id: Uuid, summary: ReconcileSummary },
    TaskFailed { task_id: Uuid, error: String },
    /// Dispatch began (sign-in)
    Started,
    /// Dispatch stopped, any in-flight task was demoted to pending
    Stopped,
}

/// Current sync state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// No remote handle, nothing dispatches
    Disabled,
    /// Ready, queue drained
    Idle,
    /// A task is running right now
    Syncing,
    /// The most recent news is a failed task
    Error,
}

/// Point-in-time sync health, derived from the queue
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub status: SyncState,
    /// Number of tasks waiting to run
    pub pending_changes: usize,
    /// Most recent task failure, if any task is still marked failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Last time a task completed successfully
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
}

/// Public face of the sync subsystem: enqueue work, observe the queue,
/// start and stop dispatch. Construct one per catalogue, from inside the
/// async runtime (construction spawns the worker task).
pub struct SyncService {
    queue: Arc<Mutex<SyncQueue>>,
    queue_path: PathBuf,
    control: mpsc::Sender<WorkerMessage>,
    events: broadcast::Sender<QueueEvent>,
    started: Arc<Mutex<bool>>,
    last_sync: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl SyncService {
    pub fn new(storage: Arc<CatalogStorage>) -> Self {
        Self::with_options(storage, SyncOptions::default())
    }

    pub fn with_options(storage: Arc<CatalogStorage>, options: SyncOptions) -> Self {
        let queue_path = storage.base_path().join("sync_queue.json");
        let queue = SyncQueue::load(&queue_path).unwrap_or_else(|e| {
            log::warn!("Sync: could not load queue, starting empty: {}", e);
            SyncQueue::new()
        });
        let queue = Arc::new(Mutex::new(queue));

        let (control, receiver) = mpsc::channel(CONTROL_BUFFER);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let started = Arc::new(Mutex::new(false));
        let last_sync = Arc::new(Mutex::new(None));

        let worker = SyncWorker {
            storage,
            queue: queue.clone(),
            queue_path: queue_path.clone(),
            events: events.clone(),
            started: started.clone(),
            last_sync: last_sync.clone(),
            throttle: options.throttle,
            remote: None,
        };
        tokio::spawn(worker.run(receiver));

        Self {
            queue,
            queue_path,
            control,
            events,
            started,
            last_sync,
        }
    }

    /// Hand the worker a remote handle and begin dispatching.
    pub fn start(&self, remote: Arc<dyn RemoteStore>) {
        let _ = self.control.try_send(WorkerMessage::Start(remote));
    }

    /// Stop dispatching and release the remote handle. An in-flight task
    /// is abandoned at its next await point and demoted back to pending.
    pub fn stop(&self) {
        let _ = self.control.try_send(WorkerMessage::Stop);
    }

    /// Shut the worker down for good.
    pub fn shutdown(&self) {
        let _ = self.control.try_send(WorkerMessage::Shutdown);
    }

    pub fn enqueue_reconcile(&self, collection: CollectionKind) -> bool {
        self.enqueue(TaskKind::ReconcileCollection { collection }, DEFAULT_PRIORITY)
    }

    pub fn enqueue_config_sync(&self, collection: CollectionKind) -> bool {
        self.enqueue(TaskKind::SyncCollectionConfig { collection }, DEFAULT_PRIORITY)
    }

    fn enqueue(&self, kind: TaskKind, priority: i32) -> bool {
        let task = {
            let mut queue = self.queue.lock().unwrap();
            if !queue.enqueue(kind.clone(), priority) {
                log::debug!("Sync: dropping duplicate task {:?}", kind);
                return false;
            }
            persist_queue(&queue, &self.queue_path);
            // Dedup guarantees exactly one live task of this kind
            queue
                .items
                .iter()
                .find(|t| t.kind == kind && t.status == TaskStatus::Pending)
                .cloned()
        }; // Lock released

        if let Some(task) = task {
            self.emit(QueueEvent::Enqueued { task });
        }
        let _ = self.control.try_send(WorkerMessage::Wake);
        true
    }

    pub fn snapshot(&self) -> Vec<SyncTask> {
        self.queue.lock().unwrap().snapshot()
    }

    pub fn is_active(&self) -> bool {
        self.queue.lock().unwrap().is_active()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> SyncStatus {
        let queue = self.queue.lock().unwrap();
        let started = *self.started.lock().unwrap();

        let error = queue
            .items
            .iter()
            .filter(|t| t.status == TaskStatus::Error)
            .max_by_key(|t| t.created_at)
            .and_then(|t| t.last_error.clone());

        let status = if !started {
            SyncState::Disabled
        } else if queue.is_active() {
            SyncState::Syncing
        } else if error.is_some() {
            SyncState::Error
        } else {
            SyncState::Idle
        };

        SyncStatus {
            status,
            pending_changes: queue
                .items
                .iter()
                .filter(|t| t.status == TaskStatus::Pending)
                .count(),
            error,
            last_sync: *self.last_sync.lock().unwrap(),
        }
    }

    fn emit(&self, event: QueueEvent) {
        let _ = self.events.send(event);
    }
}

fn persist_queue(queue: &SyncQueue, path: &Path) {
    if let Err(e) = queue.save(path) {
        log::warn!("Sync: failed to persist queue: {}", e);
    }
}

struct SyncWorker {
    storage: Arc<CatalogStorage>,
    queue: Arc<Mutex<SyncQueue>>,
    queue_path: PathBuf,
    events: broadcast::Sender<QueueEvent>,
    started: Arc<Mutex<bool>>,
    last_sync: Arc<Mutex<Option<DateTime<Utc>>>>,
    throttle: Duration,
    remote: Option<Arc<dyn RemoteStore>>,
}

impl SyncWorker {
    async fn run(mut self, mut receiver: mpsc::Receiver<WorkerMessage>) {
        log::info!("Sync worker started");

        loop {
            while let Some((task, remote)) = self.next_runnable() {
                if !self.run_task(task, remote, &mut receiver).await {
                    log::info!("Sync worker stopped");
                    return;
                }
                if !self.throttle_pause(&mut receiver).await {
                    log::info!("Sync worker stopped");
                    return;
                }
            }

            match receiver.recv().await {
                Some(WorkerMessage::Wake) => {}
                Some(WorkerMessage::Start(handle)) => self.begin_dispatch(handle),
                Some(WorkerMessage::Stop) => self.stop_dispatch(),
                Some(WorkerMessage::Shutdown) | None => break,
            }
        }

        log::info!("Sync worker stopped");
    }

    fn begin_dispatch(&mut self, handle: Arc<dyn RemoteStore>) {
        self.remote = Some(handle);
        *self.started.lock().unwrap() = true;
        self.emit(QueueEvent::Started);
        log::info!("Sync worker: dispatch started");
    }

    fn stop_dispatch(&mut self) {
        self.remote = None;
        *self.started.lock().unwrap() = false;
        {
            let mut queue = self.queue.lock().unwrap();
            if queue.demote_in_progress() {
                persist_queue(&queue, &self.queue_path);
            }
        } // Lock released
        self.emit(QueueEvent::Stopped);
        log::info!("Sync worker: dispatch stopped, remote handle released");
    }

    /// Claim the next pending task, if dispatch is on and one exists.
    fn next_runnable(&self) -> Option<(SyncTask, Arc<dyn RemoteStore>)> {
        let remote = self.remote.as_ref()?.clone();
        let task = {
            let mut queue = self.queue.lock().unwrap();
            let task = queue.next_pending()?.clone();
            queue.mark_in_progress(task.id);
            persist_queue(&queue, &self.queue_path);
            task
        }; // Lock released

        self.emit(QueueEvent::TaskStarted { task_id: task.id });
        log::info!("Sync worker: running {:?}", task.kind);
        Some((task, remote))
    }

    /// Run one task to completion while staying responsive to control
    /// messages. Returns false when the worker should exit.
    async fn run_task(
        &mut self,
        task: SyncTask,
        remote: Arc<dyn RemoteStore>,
        receiver: &mut mpsc::Receiver<WorkerMessage>,
    ) -> bool {
        let engine = SyncEngine::new(self.storage.clone(), remote);
        let run = engine.run(&task.kind);
        tokio::pin!(run);

        loop {
            tokio::select! {
                result = &mut run => {
                    match result {
                        Ok(outcome) => self.finish_task(&task, outcome),
                        Err(e) => self.fail_task(&task, &e),
                    }
                    return true;
                }
                msg = receiver.recv() => match msg {
                    Some(WorkerMessage::Wake) => {}
                    Some(WorkerMessage::Start(handle)) => self.begin_dispatch(handle),
                    Some(WorkerMessage::Stop) => {
                        // Dropping the pinned future abandons the task at
                        // its current await point; it re-runs from scratch
                        // after the next start
                        self.stop_dispatch();
                        return true;
                    }
                    Some(WorkerMessage::Shutdown) | None => {
                        let mut queue = self.queue.lock().unwrap();
                        queue.demote_in_progress();
                        persist_queue(&queue, &self.queue_path);
                        return false;
                    }
                }
            }
        }
    }

    fn finish_task(&self, task: &SyncTask, outcome: TaskOutcome) {
        let TaskOutcome { summary, followups } = outcome;
        let mut announced = Vec::new();
        {
            let mut queue = self.queue.lock().unwrap();
            queue.complete(task.id);
            // Follow-ups go in after the finished task is removed so
            // duplicate suppression cannot swallow them
            for (kind, priority) in followups {
                if queue.enqueue(kind.clone(), priority) {
                    let landed = queue
                        .items
                        .iter()
                        .find(|t| t.kind == kind && t.status == TaskStatus::Pending)
                        .cloned();
                    announced.extend(landed);
                }
            }
            persist_queue(&queue, &self.queue_path);
        } // Lock released

        *self.last_sync.lock().unwrap() = Some(Utc::now());
        self.emit(QueueEvent::TaskCompleted {
            task_id: task.id,
            summary,
        });
        for task in announced {
            self.emit(QueueEvent::Enqueued { task });
        }
    }

    fn fail_task(&self, task: &SyncTask, error: &SyncError) {
        log::error!("Sync worker: task {:?} failed: {}", task.kind, error);
        let message = error.to_string();
        {
            let mut queue = self.queue.lock().unwrap();
            queue.fail(task.id, message.clone());
            persist_queue(&queue, &self.queue_path);
        } // Lock released

        self.emit(QueueEvent::TaskFailed {
            task_id: task.id,
            error: message,
        });
    }

    /// Wait out the inter-task delay without going deaf to control
    /// messages. Returns false when the worker should exit.
    async fn throttle_pause(&mut self, receiver: &mut mpsc::Receiver<WorkerMessage>) -> bool {
        let deadline = tokio::time::Instant::now() + self.throttle;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return true,
                msg = receiver.recv() => match msg {
                    Some(WorkerMessage::Wake) => {}
                    Some(WorkerMessage::Start(handle)) => self.begin_dispatch(handle),
                    Some(WorkerMessage::Stop) => self.stop_dispatch(),
                    Some(WorkerMessage::Shutdown) | None => return false,
                }
            }
        }
    }

    fn emit(&self, event: QueueEvent) {
        let _ = self.events.send(event);
    }
}
