mod models;
mod storage;

pub use models::{
    CatalogEntity, Clip, CollectionConfig, CollectionKind, ConfigGroup, Lesson, Tombstone,
};
pub use storage::{CatalogStorage, StorageError};
