//! Whole-soup passes: pulling a page of server records into the caches and
//! pushing every locally dirty record to the server.

use crate::cache::RecordCache;
use crate::conflict::{sync_remote_object_detect_conflict, ConflictReport};
use crate::error::{Error, Result};
use crate::mode::{CacheMode, ConflictMergeMode, CrudMethod, WriteMergeMode};
use crate::query::QuerySpec;
use crate::record::{
    is_locally_created, is_locally_deleted, is_locally_updated, key_of, Record, LOCAL,
};
use crate::remote::ServerSync;
use tracing::{info, warn};

/// Save records fetched from the server into `cache`, and into
/// `cache_for_originals` as the new base copies.
///
/// Returns the records as stored in `cache`. With
/// [`WriteMergeMode::LeaveIfChanged`] records with unsynced local changes
/// are returned untouched.
pub async fn sync_down(
    records: Vec<Record>,
    cache: &RecordCache,
    cache_for_originals: Option<&RecordCache>,
    merge_mode: WriteMergeMode,
) -> Result<Vec<Record>> {
    let count = records.len();
    if let Some(originals) = cache_for_originals {
        originals
            .save_all(records.clone(), WriteMergeMode::Overwrite)
            .await?;
    }
    let stored = cache.save_all(records, merge_mode).await?;
    info!(soup = cache.soup_name(), count, %merge_mode, "synced down");
    Ok(stored)
}

/// Outcome of [`sync_up`].
#[derive(Debug, Default)]
pub struct SyncUpReport {
    /// Keys of records pushed to the server, as the server knows them.
    pub synced: Vec<String>,
    /// Keys of records created and deleted locally, removed without a server call.
    pub discarded: Vec<String>,
    /// Records rejected by the conflict check, by local key.
    pub conflicts: Vec<(String, ConflictReport)>,
    /// Records that failed for any other reason, by local key.
    pub failures: Vec<(String, Error)>,
}

impl SyncUpReport {
    /// Whether every dirty record was handled.
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty() && self.failures.is_empty()
    }
}

/// Push every record with unsynced local changes to the server.
///
/// Each record goes through the conflict check under
/// [`CacheMode::ServerFirst`]. A record that fails is reported and the pass
/// moves on; nothing is retried.
pub async fn sync_up(
    cache: &RecordCache,
    cache_for_originals: Option<&RecordCache>,
    fieldlist: Option<&[&str]>,
    merge_mode: Option<ConflictMergeMode>,
    server: &dyn ServerSync,
) -> Result<SyncUpReport> {
    let mut found = cache.find(QuerySpec::exact(LOCAL, true)).await?;
    while found.has_more() {
        found.get_more().await?;
    }
    found.close_cursor().await?;

    let mut report = SyncUpReport::default();
    for record in found.objects() {
        let Some(id) = key_of(&record, cache.key_field()) else {
            continue;
        };

        if is_locally_created(&record) && is_locally_deleted(&record) {
            cache.remove(&id).await?;
            report.discarded.push(id);
            continue;
        }
        let method = if is_locally_deleted(&record) {
            CrudMethod::Delete
        } else if is_locally_created(&record) {
            CrudMethod::Create
        } else if is_locally_updated(&record) {
            CrudMethod::Update
        } else {
            continue;
        };

        let result = sync_remote_object_detect_conflict(
            method,
            Some(&id),
            &record,
            fieldlist,
            Some(cache),
            CacheMode::ServerFirst,
            cache_for_originals,
            merge_mode,
            server,
        )
        .await;

        match result {
            Ok(outcome) => {
                let synced_id = outcome
                    .record
                    .as_ref()
                    .and_then(|r| key_of(r, cache.key_field()))
                    .unwrap_or(id);
                report.synced.push(synced_id);
            }
            Err(Error::Conflict(conflict)) => {
                warn!(id = %id, "record not synced: conflict");
                report.conflicts.push((id, *conflict));
            }
            Err(err) => {
                warn!(id = %id, error = %err, "record not synced");
                report.failures.push((id, err));
            }
        }
    }

    info!(
        soup = cache.soup_name(),
        synced = report.synced.len(),
        discarded = report.discarded.len(),
        conflicts = report.conflicts.len(),
        failures = report.failures.len(),
        "synced up"
    );
    Ok(report)
}
