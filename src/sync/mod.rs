pub mod engine;
pub mod planner;
pub mod queue;

mod service;

pub use engine::{ReconcileSummary, SyncEngine, SyncError, TaskOutcome};
pub use planner::{ItemState, Resolution, SyncPlan, TIMESTAMP_TOLERANCE_MS};
pub use queue::{SyncQueue, SyncTask, TaskKind, TaskStatus, DEFAULT_PRIORITY, HIGH_PRIORITY};
pub use service::{QueueEvent, SyncOptions, SyncService, SyncState, SyncStatus};
