//! Record helpers: dirty-flag bookkeeping, local ids and field paths.
//!
//! A record is a JSON object. Records that live in a synchronized cache
//! always carry three dirty flags plus the derived `local` flag.

use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};

/// A JSON-like record: field name to value.
pub type Record = Map<String, Value>;

/// Set when the record was created while offline.
pub const LOCALLY_CREATED: &str = "locallyCreated";
/// Set when the record was updated while offline.
pub const LOCALLY_UPDATED: &str = "locallyUpdated";
/// Set when the record was deleted while offline.
pub const LOCALLY_DELETED: &str = "locallyDeleted";
/// `locallyCreated || locallyUpdated || locallyDeleted`.
pub const LOCAL: &str = "local";
/// Surrogate id attached by the local store.
pub const SOUP_ENTRY_ID: &str = "_soupEntryId";
/// Key field used when a cache does not name one.
pub const DEFAULT_KEY_FIELD: &str = "Id";
/// Prefix of ids generated for records created offline.
pub const LOCAL_ID_PREFIX: &str = "local_";

/// Fields maintained by the engine rather than by the application.
pub const BOOKKEEPING_FIELDS: [&str; 5] = [
    LOCALLY_CREATED,
    LOCALLY_UPDATED,
    LOCALLY_DELETED,
    LOCAL,
    SOUP_ENTRY_ID,
];

static LOCAL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a fresh local id.
///
/// The counter is seeded from the wall clock so ids minted by a previous
/// run of the process are not reused, and never goes backwards.
pub fn make_local_id() -> String {
    let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let previous = LOCAL_ID_COUNTER
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
            Some(now.max(prev + 1))
        })
        .unwrap_or_else(|prev| prev);
    format!("{LOCAL_ID_PREFIX}{}", now.max(previous + 1))
}

/// Whether `id` was generated by [`make_local_id`].
pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

fn flag(record: &Record, name: &str) -> bool {
    record.get(name).and_then(Value::as_bool).unwrap_or(false)
}

/// Default missing dirty flags to `false` and recompute `local`.
pub fn add_local_fields(mut record: Record) -> Record {
    let created = flag(&record, LOCALLY_CREATED);
    let updated = flag(&record, LOCALLY_UPDATED);
    let deleted = flag(&record, LOCALLY_DELETED);
    record.insert(LOCALLY_CREATED.into(), Value::Bool(created));
    record.insert(LOCALLY_UPDATED.into(), Value::Bool(updated));
    record.insert(LOCALLY_DELETED.into(), Value::Bool(deleted));
    record.insert(LOCAL.into(), Value::Bool(created || updated || deleted));
    record
}

/// Whether the record carries unsynced local changes.
pub fn is_local(record: &Record) -> bool {
    flag(record, LOCAL)
}

pub fn is_locally_created(record: &Record) -> bool {
    flag(record, LOCALLY_CREATED)
}

pub fn is_locally_updated(record: &Record) -> bool {
    flag(record, LOCALLY_UPDATED)
}

pub fn is_locally_deleted(record: &Record) -> bool {
    flag(record, LOCALLY_DELETED)
}

/// Look up a dotted path (`Owner.Name`) inside a record.
pub fn value_at_path<'a>(record: &'a Record, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = record.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Whether every path in `fieldlist` is present in the record.
pub fn has_fields(record: &Record, fieldlist: &[&str]) -> bool {
    fieldlist
        .iter()
        .all(|path| value_at_path(record, path).is_some())
}

/// The record's key as a string, if present.
///
/// Numeric keys are rendered in their decimal form.
pub fn key_of(record: &Record, key_field: &str) -> Option<String> {
    match value_at_path(record, key_field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Keep only the top-level fields named in `fieldlist`; `None` keeps all.
pub fn project(record: &Record, fieldlist: Option<&[&str]>) -> Record {
    match fieldlist {
        None => record.clone(),
        Some(fields) => record
            .iter()
            .filter(|(name, _)| fields.contains(&name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect(),
    }
}

/// Drop the engine's bookkeeping fields and the given key field.
pub fn strip_bookkeeping(record: &Record, key_field: &str) -> Record {
    record
        .iter()
        .filter(|(name, _)| {
            name.as_str() != key_field && !BOOKKEEPING_FIELDS.contains(&name.as_str())
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}
