//! Conflict detection on top of the CRUD router.
//!
//! A second cache holds the last copy of each record known to match the
//! server (the *base*). Before an update or delete reaches the server, the
//! base is compared with the current server copy (*theirs*) and with the
//! caller's attributes (*yours*); the [`ConflictMergeMode`] decides whether
//! the call proceeds.
//!
//! Field values compare loosely: a missing field, `null` and `""` are equal,
//! and scalars compare by their text, so `1` equals `"1"` and `true` equals
//! `"true"`. Arrays and objects compare structurally.

use crate::cache::RecordCache;
use crate::error::{Error, Result};
use crate::mode::{CacheMode, ConflictMergeMode, CrudMethod, WriteMergeMode};
use crate::record::{is_local, is_local_id, key_of, Record, BOOKKEEPING_FIELDS};
use crate::remote::ServerSync;
use crate::router::{sync_remote_object, validate, SyncOutcome};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Why a sync was rejected: the three versions of the record and how they
/// differ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    pub base: Record,
    pub theirs: Record,
    pub yours: Record,
    /// Fields that differ between base and theirs.
    pub remote_changes: Vec<String>,
    /// Fields that differ between base and yours.
    pub local_changes: Vec<String>,
    /// Fields changed on both sides to different values.
    pub conflicting_changes: Vec<String>,
}

enum Loose<'a> {
    Text(std::borrow::Cow<'a, str>),
    Structured(&'a Value),
}

fn loose(value: Option<&Value>) -> Loose<'_> {
    match value {
        None | Some(Value::Null) => Loose::Text("".into()),
        Some(Value::String(s)) => Loose::Text(s.as_str().into()),
        Some(Value::Number(n)) => Loose::Text(n.to_string().into()),
        Some(Value::Bool(b)) => Loose::Text(b.to_string().into()),
        Some(other) => Loose::Structured(other),
    }
}

/// Whether two field values are equal under the loose comparison.
pub fn loosely_equal(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (loose(a), loose(b)) {
        (Loose::Text(x), Loose::Text(y)) => x == y,
        (Loose::Structured(x), Loose::Structured(y)) => x == y,
        _ => false,
    }
}

/// Fields among `fields` whose values differ between `a` and `b`.
pub fn diff(a: &Record, b: &Record, fields: &[String]) -> Vec<String> {
    fields
        .iter()
        .filter(|field| !loosely_equal(a.get(field.as_str()), b.get(field.as_str())))
        .cloned()
        .collect()
}

/// Fields to compare: `fieldlist` when given, otherwise every field of the
/// records except the key and bookkeeping fields.
fn fields_to_compare(
    fieldlist: Option<&[&str]>,
    key_field: &str,
    records: [&Record; 3],
) -> Vec<String> {
    match fieldlist {
        Some(fields) => fields.iter().map(|f| f.to_string()).collect(),
        None => records
            .iter()
            .flat_map(|r| r.keys())
            .filter(|f| f.as_str() != key_field && !BOOKKEEPING_FIELDS.contains(&f.as_str()))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
    }
}

fn should_fail(merge_mode: ConflictMergeMode, report: &ConflictReport) -> bool {
    match merge_mode {
        ConflictMergeMode::Overwrite | ConflictMergeMode::MergeAcceptYours => false,
        ConflictMergeMode::MergeFailIfConflict => !report.conflicting_changes.is_empty(),
        ConflictMergeMode::MergeFailIfChanged => !report.remote_changes.is_empty(),
    }
}

/// Like [`sync_remote_object`], with conflict detection against
/// `cache_for_originals`.
///
/// Without an originals cache this is exactly [`sync_remote_object`].
/// Otherwise updates and deletes are checked against the server first,
/// and every result that reflects the server is recorded as the new base.
/// A rejected call returns [`Error::Conflict`]. Combinations the router
/// refuses are rejected before the originals or the server are consulted.
#[allow(clippy::too_many_arguments)]
pub async fn sync_remote_object_detect_conflict(
    method: CrudMethod,
    id: Option<&str>,
    attributes: &Record,
    fieldlist: Option<&[&str]>,
    cache: Option<&RecordCache>,
    cache_mode: CacheMode,
    cache_for_originals: Option<&RecordCache>,
    merge_mode: Option<ConflictMergeMode>,
    server: &dyn ServerSync,
) -> Result<SyncOutcome> {
    validate(method, id, cache.is_some(), cache_mode)?;
    let Some(originals) = cache_for_originals else {
        return sync_remote_object(method, id, attributes, fieldlist, cache, cache_mode, server)
            .await;
    };

    let outcome = match method {
        CrudMethod::Create | CrudMethod::Read => {
            sync_remote_object(method, id, attributes, fieldlist, cache, cache_mode, server)
                .await?
        }
        CrudMethod::Update | CrudMethod::Delete => {
            check_conflict_and_sync(
                method,
                id,
                attributes,
                fieldlist,
                cache,
                cache_mode,
                originals,
                merge_mode,
                server,
            )
            .await?
        }
    };

    if cache_mode == CacheMode::CacheOnly || outcome.from_cache {
        return Ok(outcome);
    }

    match (method, &outcome.record) {
        (CrudMethod::Delete, _) => {
            if let Some(id) = id {
                originals.remove(id).await?;
            }
        }
        (_, Some(record)) if !is_local(record) => {
            let mut snapshot = record.clone();
            if key_of(&snapshot, originals.key_field()).is_none() {
                let Some(id) = id else {
                    return Ok(outcome);
                };
                snapshot.insert(originals.key_field().to_string(), Value::String(id.to_string()));
            }
            originals
                .save(snapshot, WriteMergeMode::MergeAcceptTheirs)
                .await?;
        }
        _ => {}
    }
    Ok(outcome)
}

#[allow(clippy::too_many_arguments)]
async fn check_conflict_and_sync(
    method: CrudMethod,
    id: Option<&str>,
    attributes: &Record,
    fieldlist: Option<&[&str]>,
    cache: Option<&RecordCache>,
    cache_mode: CacheMode,
    originals: &RecordCache,
    merge_mode: Option<ConflictMergeMode>,
    server: &dyn ServerSync,
) -> Result<SyncOutcome> {
    let delegate = || sync_remote_object(method, id, attributes, fieldlist, cache, cache_mode, server);

    let merge_mode = match merge_mode {
        None | Some(ConflictMergeMode::Overwrite) => return delegate().await,
        Some(mode) => mode,
    };
    let id = match id {
        Some(id) if cache_mode != CacheMode::CacheOnly && !is_local_id(id) => id,
        _ => return delegate().await,
    };

    let Some(base) = originals.retrieve(id, None).await? else {
        debug!(id, "no base copy, skipping conflict check");
        return delegate().await;
    };
    let Some(theirs) = server
        .sync(CrudMethod::Read, Some(id), &Record::new(), fieldlist)
        .await?
    else {
        debug!(id, "record not on server, skipping conflict check");
        return delegate().await;
    };

    let fields = fields_to_compare(fieldlist, originals.key_field(), [&base, &theirs, attributes]);
    let local_changes = diff(&base, attributes, &fields);
    let remote_vs_local = diff(attributes, &theirs, &fields);
    let remote_changes = diff(&base, &theirs, &fields);
    let conflicting_changes: Vec<String> = remote_changes
        .iter()
        .filter(|f| local_changes.contains(f) && remote_vs_local.contains(f))
        .cloned()
        .collect();

    let report = ConflictReport {
        base,
        theirs,
        yours: attributes.clone(),
        remote_changes,
        local_changes,
        conflicting_changes,
    };

    if should_fail(merge_mode, &report) {
        warn!(
            %method,
            id,
            %merge_mode,
            remote_changes = ?report.remote_changes,
            conflicting_changes = ?report.conflicting_changes,
            "sync rejected by conflict check"
        );
        return Err(Error::Conflict(Box::new(report)));
    }

    let mut merged = attributes.clone();
    for field in report
        .remote_changes
        .iter()
        .filter(|f| !report.conflicting_changes.contains(f))
    {
        let value = report.theirs.get(field).cloned().unwrap_or(Value::Null);
        merged.insert(field.clone(), value);
    }
    debug!(%method, id, merged = report.remote_changes.len(), "conflict check passed");

    sync_remote_object(method, Some(id), &merged, fieldlist, cache, cache_mode, server).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryRemote, RemoteObjectSync};
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn names(fields: &[String]) -> Vec<&str> {
        fields.iter().map(String::as_str).collect()
    }

    struct Fixture {
        remote: Arc<MemoryRemote>,
        server: RemoteObjectSync,
        cache: RecordCache,
        originals: RecordCache,
    }

    /// Server, cache and originals all hold `base` under `001A`; the server
    /// copy is then edited to `theirs`.
    async fn fixture(base: Value, theirs: Value) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let cache = RecordCache::with_defaults(store.clone(), "accounts");
        let originals = RecordCache::with_defaults(store, "accounts_originals");
        cache.init().await.unwrap();
        originals.init().await.unwrap();

        let remote = Arc::new(MemoryRemote::new());
        let server = RemoteObjectSync::new(remote.clone(), "Account");
        remote.seed("Account", "001A", record(base.clone()));

        let mut base = record(base);
        base.insert("Id".into(), json!("001A"));
        cache.save(base.clone(), WriteMergeMode::Overwrite).await.unwrap();
        originals.save(base, WriteMergeMode::Overwrite).await.unwrap();
        remote.edit("Account", "001A", record(theirs));

        Fixture {
            remote,
            server,
            cache,
            originals,
        }
    }

    async fn update(
        f: &Fixture,
        yours: Value,
        fieldlist: Option<&[&str]>,
        merge_mode: ConflictMergeMode,
    ) -> Result<SyncOutcome> {
        sync_remote_object_detect_conflict(
            CrudMethod::Update,
            Some("001A"),
            &record(yours),
            fieldlist,
            Some(&f.cache),
            CacheMode::ServerFirst,
            Some(&f.originals),
            Some(merge_mode),
            &f.server,
        )
        .await
    }

    #[test]
    fn loose_equality() {
        let eq = |a: Option<Value>, b: Option<Value>| loosely_equal(a.as_ref(), b.as_ref());
        assert!(eq(None, Some(json!(null))));
        assert!(eq(None, Some(json!(""))));
        assert!(eq(Some(json!(1)), Some(json!("1"))));
        assert!(eq(Some(json!(0)), Some(json!("0"))));
        assert!(eq(Some(json!(true)), Some(json!("true"))));
        assert!(eq(Some(json!({"a": 1})), Some(json!({"a": 1}))));
        assert!(!eq(Some(json!(0)), None));
        assert!(!eq(Some(json!([1])), Some(json!("[1]"))));
        assert!(!eq(Some(json!("A")), Some(json!("B"))));
    }

    #[test]
    fn field_set_without_fieldlist_skips_bookkeeping() {
        let a = record(json!({"Id": "1", "Name": "A", "local": true, "_soupEntryId": 3}));
        let b = record(json!({"Industry": "X", "locallyUpdated": true}));
        let fields = fields_to_compare(None, "Id", [&a, &b, &Record::new()]);
        assert_eq!(fields, vec!["Industry".to_string(), "Name".to_string()]);
    }

    #[tokio::test]
    async fn fail_if_changed_rejects_any_remote_change() {
        let f = fixture(json!({"Name": "A"}), json!({"Name": "B"})).await;
        let err = update(&f, json!({"Name": "A"}), Some(&["Name"]), ConflictMergeMode::MergeFailIfChanged)
            .await
            .unwrap_err();

        let report = err.conflict().unwrap();
        assert_eq!(names(&report.remote_changes), vec!["Name"]);
        assert!(report.conflicting_changes.is_empty());
        assert!(report.local_changes.is_empty());
        assert_eq!(report.yours, record(json!({"Name": "A"})));
        assert_eq!(f.remote.calls().update.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fail_if_conflict_merges_non_conflicting_changes() {
        let f = fixture(
            json!({"Name": "A", "Industry": "X"}),
            json!({"Name": "A", "Industry": "Y"}),
        )
        .await;
        let outcome = update(
            &f,
            json!({"Name": "A", "Industry": "X"}),
            Some(&["Name", "Industry"]),
            ConflictMergeMode::MergeFailIfConflict,
        )
        .await
        .unwrap();

        let synced = outcome.record.unwrap();
        assert_eq!(synced["Industry"], json!("Y"));
        assert_eq!(f.remote.get("Account", "001A").unwrap()["Industry"], json!("Y"));
        let base = f.originals.retrieve("001A", None).await.unwrap().unwrap();
        assert_eq!(base["Industry"], json!("Y"));
    }

    #[tokio::test]
    async fn fail_if_conflict_rejects_divergent_edits() {
        let f = fixture(json!({"Name": "A"}), json!({"Name": "B"})).await;
        let err = update(&f, json!({"Name": "C"}), None, ConflictMergeMode::MergeFailIfConflict)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        let report = err.conflict().unwrap();
        assert_eq!(names(&report.conflicting_changes), vec!["Name"]);
        assert_eq!(names(&report.local_changes), vec!["Name"]);
        assert_eq!(report.theirs["Name"], json!("B"));
    }

    #[tokio::test]
    async fn same_edit_on_both_sides_is_not_a_conflict() {
        let f = fixture(json!({"Name": "A"}), json!({"Name": "B"})).await;
        let outcome = update(&f, json!({"Name": "B"}), None, ConflictMergeMode::MergeFailIfConflict)
            .await
            .unwrap();
        assert_eq!(outcome.record.unwrap()["Name"], json!("B"));
    }

    #[tokio::test]
    async fn accept_yours_keeps_local_value_on_conflict() {
        let f = fixture(
            json!({"Name": "A", "Industry": "X"}),
            json!({"Name": "B", "Industry": "Y"}),
        )
        .await;
        let outcome = update(
            &f,
            json!({"Name": "C", "Industry": "X"}),
            None,
            ConflictMergeMode::MergeAcceptYours,
        )
        .await
        .unwrap();
        let synced = outcome.record.unwrap();
        assert_eq!(synced["Name"], json!("C"));
        assert_eq!(synced["Industry"], json!("Y"));
    }

    #[tokio::test]
    async fn overwrite_skips_the_server_read() {
        let f = fixture(json!({"Name": "A"}), json!({"Name": "B"})).await;
        update(&f, json!({"Name": "C"}), None, ConflictMergeMode::Overwrite)
            .await
            .unwrap();
        assert_eq!(f.remote.calls().retrieve.load(Ordering::SeqCst), 0);
        assert_eq!(f.remote.get("Account", "001A").unwrap()["Name"], json!("C"));
    }

    #[tokio::test]
    async fn missing_base_skips_the_check() {
        let f = fixture(json!({"Name": "A"}), json!({"Name": "B"})).await;
        f.originals.remove("001A").await.unwrap();
        update(&f, json!({"Name": "C"}), None, ConflictMergeMode::MergeFailIfChanged)
            .await
            .unwrap();
        assert_eq!(f.remote.calls().retrieve.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn delete_removes_the_base() {
        let f = fixture(json!({"Name": "A"}), json!({})).await;
        sync_remote_object_detect_conflict(
            CrudMethod::Delete,
            Some("001A"),
            &Record::new(),
            None,
            Some(&f.cache),
            CacheMode::ServerFirst,
            Some(&f.originals),
            Some(ConflictMergeMode::MergeFailIfChanged),
            &f.server,
        )
        .await
        .unwrap();
        assert!(f.remote.is_empty());
        assert_eq!(f.originals.retrieve("001A", None).await.unwrap(), None);
        assert_eq!(f.cache.retrieve("001A", None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn reads_record_base_but_cache_hits_and_dirty_records_do_not() {
        let f = fixture(json!({"Name": "A"}), json!({"Name": "B"})).await;
        let empty = Record::new();
        let read = |mode: CacheMode| {
            sync_remote_object_detect_conflict(
                CrudMethod::Read,
                Some("001A"),
                &empty,
                None,
                Some(&f.cache),
                mode,
                Some(&f.originals),
                None,
                &f.server,
            )
        };

        let hit = read(CacheMode::CacheFirst).await.unwrap();
        assert!(hit.from_cache);
        let base = f.originals.retrieve("001A", None).await.unwrap().unwrap();
        assert_eq!(base["Name"], json!("A"));

        read(CacheMode::ServerFirst).await.unwrap();
        let base = f.originals.retrieve("001A", None).await.unwrap().unwrap();
        assert_eq!(base["Name"], json!("B"));

        let created = sync_remote_object_detect_conflict(
            CrudMethod::Create,
            None,
            &record(json!({"Name": "Draft"})),
            None,
            Some(&f.cache),
            CacheMode::CacheOnly,
            Some(&f.originals),
            None,
            &f.server,
        )
        .await
        .unwrap()
        .record
        .unwrap();
        let local_id = created["Id"].as_str().unwrap();
        assert_eq!(f.originals.retrieve(local_id, None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn rejected_modes_touch_nothing() {
        let f = fixture(json!({"Name": "A"}), json!({"Name": "B"})).await;
        let before = f.remote.calls().total();

        for method in [CrudMethod::Create, CrudMethod::Update, CrudMethod::Delete] {
            let err = sync_remote_object_detect_conflict(
                method,
                Some("001A"),
                &record(json!({"Name": "C"})),
                None,
                Some(&f.cache),
                CacheMode::CacheFirst,
                Some(&f.originals),
                Some(ConflictMergeMode::MergeFailIfChanged),
                &f.server,
            )
            .await
            .unwrap_err();
            assert!(matches!(err, Error::UnsupportedMode { .. }), "{err:?}");
            assert!(err.is_unsupported_mode());
        }

        let local_id = f.cache.make_local_id();
        f.originals
            .save(
                record(json!({"Id": local_id, "Name": "Draft"})),
                WriteMergeMode::Overwrite,
            )
            .await
            .unwrap();
        for method in [CrudMethod::Read, CrudMethod::Delete] {
            let err = sync_remote_object_detect_conflict(
                method,
                Some(&local_id),
                &Record::new(),
                None,
                Some(&f.cache),
                CacheMode::ServerFirst,
                Some(&f.originals),
                Some(ConflictMergeMode::MergeFailIfChanged),
                &f.server,
            )
            .await
            .unwrap_err();
            assert!(matches!(err, Error::UnsupportedLocalId { .. }), "{err:?}");
            assert!(err.is_unsupported_mode());
        }

        assert_eq!(f.remote.calls().total(), before);
        assert!(f.originals.retrieve(&local_id, None).await.unwrap().is_some());
        let cached = f.cache.retrieve("001A", None).await.unwrap().unwrap();
        assert_eq!(cached["Name"], json!("A"));
    }

    #[tokio::test]
    async fn without_originals_behaves_like_router() {
        let f = fixture(json!({"Name": "A"}), json!({"Name": "B"})).await;
        let outcome = sync_remote_object_detect_conflict(
            CrudMethod::Update,
            Some("001A"),
            &record(json!({"Name": "C"})),
            None,
            Some(&f.cache),
            CacheMode::ServerFirst,
            None,
            Some(ConflictMergeMode::MergeFailIfChanged),
            &f.server,
        )
        .await
        .unwrap();
        assert_eq!(outcome.record.unwrap()["Name"], json!("C"));
        assert_eq!(f.remote.calls().retrieve.load(Ordering::SeqCst), 0);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_value() -> impl Strategy<Value = Value> {
            prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::Bool),
                (-5i64..5).prop_map(Value::from),
                "[a-c]{0,2}".prop_map(Value::String),
            ]
        }

        fn arb_record() -> impl Strategy<Value = Record> {
            prop::collection::btree_map("[A-D]", arb_value(), 0..4)
                .prop_map(|m| m.into_iter().collect())
        }

        proptest! {
            #[test]
            fn prop_diff_with_self_is_empty(a in arb_record()) {
                let fields = fields_to_compare(None, "Id", [&a, &a, &a]);
                prop_assert!(diff(&a, &a, &fields).is_empty());
            }

            #[test]
            fn prop_diff_is_symmetric(a in arb_record(), b in arb_record()) {
                let fields = fields_to_compare(None, "Id", [&a, &b, &Record::new()]);
                prop_assert_eq!(diff(&a, &b, &fields), diff(&b, &a, &fields));
            }

            #[test]
            fn prop_conflicts_are_local_and_remote_changes(
                base in arb_record(),
                theirs in arb_record(),
                yours in arb_record(),
            ) {
                let fields = fields_to_compare(None, "Id", [&base, &theirs, &yours]);
                let local = diff(&base, &yours, &fields);
                let remote = diff(&base, &theirs, &fields);
                let remote_vs_local = diff(&yours, &theirs, &fields);
                for field in remote.iter().filter(|f| local.contains(f) && remote_vs_local.contains(f)) {
                    prop_assert!(!loosely_equal(yours.get(field), theirs.get(field)));
                    prop_assert!(!loosely_equal(base.get(field), yours.get(field)));
                }
            }
        }
    }
}
