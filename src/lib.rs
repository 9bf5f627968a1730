//! Offline-first catalogue of video lessons and tagged clips, with
//! queue-driven synchronization against a remote file store.

pub mod catalog;
pub mod remote;
pub mod sync;

pub use catalog::{CatalogStorage, Clip, CollectionConfig, CollectionKind, Lesson};
pub use remote::{DriveClient, RemoteStore};
pub use sync::SyncService;
