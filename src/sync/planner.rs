//! Pure reconciliation planning: compares a local snapshot, a remote
//! listing, and the tombstone log, and decides what to upload, download,
//! and delete. No I/O happens here.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::remote::RemoteFile;

/// Clock skew allowed before two modification times count as different.
pub const TIMESTAMP_TOLERANCE_MS: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Upload,
    Download,
    InSync,
}

/// Compare local against remote modification time. Differences inside the
/// tolerance window resolve to `InSync`; ties within the window are left
/// alone rather than surfaced as conflicts.
pub fn resolve(local: DateTime<Utc>, remote: DateTime<Utc>) -> Resolution {
    let diff = local.signed_duration_since(remote).num_milliseconds();
    if diff > TIMESTAMP_TOLERANCE_MS {
        Resolution::Upload
    } else if diff < -TIMESTAMP_TOLERANCE_MS {
        Resolution::Download
    } else {
        Resolution::InSync
    }
}

/// The slice of one local record the planner compares against the listing.
/// Correlation is purely by derived name, so the record's stored remote id
/// plays no part here.
#[derive(Debug, Clone)]
pub struct ItemState {
    pub id: Uuid,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    pub uploads: Vec<Uuid>,
    pub downloads: Vec<RemoteFile>,
    pub remote_deletes: Vec<String>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.uploads.is_empty() && self.downloads.is_empty() && self.remote_deletes.is_empty()
    }
}

/// Build the plan for one collection. Records correlate by derived file
/// name (`<id>.json`), so no id mapping table is consulted. Identical
/// inputs always produce an identical plan.
pub fn plan(local: &[ItemState], remote: &[RemoteFile], tombstones: &HashSet<String>) -> SyncPlan {
    let mut plan = SyncPlan::default();

    // Every tombstoned id gets deleted, listed or not. Unlisted ones fall
    // through the idempotent remote delete and are then pruned; that also
    // covers blob tombstones, which never appear in a record listing.
    plan.remote_deletes = tombstones.iter().cloned().collect();
    plan.remote_deletes.sort();

    // Index live record files by name. Tombstoned files are excluded from
    // comparison entirely so a pending deletion can never be mistaken for
    // a fresh remote record. On duplicate names the newest write wins,
    // ties broken by greatest id.
    let mut by_name: HashMap<&str, &RemoteFile> = HashMap::new();
    for rf in remote {
        if tombstones.contains(&rf.id) {
            continue;
        }
        if !rf.name.ends_with(".json") {
            continue;
        }
        match by_name.get(rf.name.as_str()) {
            Some(current) if (rf.modified_at, &rf.id) <= (current.modified_at, &current.id) => {}
            _ => {
                by_name.insert(&rf.name, rf);
            }
        }
    }

    let mut matched: HashSet<&str> = HashSet::new();

    for item in local {
        let name = format!("{}.json", item.id);
        match by_name.get(name.as_str()) {
            Some(rf) => {
                matched.insert(rf.name.as_str());
                match resolve(item.modified_at, rf.modified_at) {
                    Resolution::Upload => plan.uploads.push(item.id),
                    Resolution::Download => plan.downloads.push((*rf).clone()),
                    Resolution::InSync => {}
                }
            }
            None => {
                // Never uploaded, or the remote copy vanished
                plan.uploads.push(item.id);
            }
        }
    }

    for (name, rf) in &by_name {
        if !matched.contains(name) {
            plan.downloads.push((*rf).clone());
        }
    }

    plan.uploads.sort();
    plan.downloads.sort_by(|a, b| a.name.cmp(&b.name));

    plan
}
