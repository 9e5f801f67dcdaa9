//! CRUD routing between the record cache and the server.
//!
//! A sync call names a method, a record and a [`CacheMode`]. The router
//! decides whether the cache, the server or both are consulted, and writes
//! server results back into the cache so later cache reads see them.

use crate::cache::RecordCache;
use crate::error::{Error, Result};
use crate::mode::{CacheMode, CrudMethod, WriteMergeMode};
use crate::record::{
    is_local_id, key_of, make_local_id, project, Record, LOCALLY_CREATED, LOCALLY_DELETED,
    LOCALLY_UPDATED,
};
use crate::remote::ServerSync;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Result of a routed sync call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    /// The record after the call; `None` after a delete or a miss.
    pub record: Option<Record>,
    /// Whether the record was served by the cache without reaching the server.
    pub from_cache: bool,
}

impl SyncOutcome {
    fn from_server(record: Option<Record>) -> Self {
        Self {
            record,
            from_cache: false,
        }
    }

    fn from_cache(record: Option<Record>) -> Self {
        Self {
            record,
            from_cache: true,
        }
    }
}

fn flags(created: bool, updated: bool, deleted: bool) -> [(&'static str, Value); 3] {
    [
        (LOCALLY_CREATED, Value::Bool(created)),
        (LOCALLY_UPDATED, Value::Bool(updated)),
        (LOCALLY_DELETED, Value::Bool(deleted)),
    ]
}

fn require_id(method: CrudMethod, id: Option<&str>, cache: &RecordCache) -> Result<String> {
    id.map(str::to_string).ok_or_else(|| {
        debug!(%method, "sync call without an id");
        Error::MissingKey {
            key_field: cache.key_field().to_string(),
        }
    })
}

/// Perform `method` against the cache only.
///
/// `local_action` marks the change as made by the user while offline, which
/// sets the matching dirty flag. Write-backs of server results pass `false`.
pub async fn sync_remote_object_with_cache(
    method: CrudMethod,
    id: Option<&str>,
    attributes: &Record,
    fieldlist: Option<&[&str]>,
    cache: &RecordCache,
    local_action: bool,
) -> Result<Option<Record>> {
    debug!(%method, ?id, local_action, soup = cache.soup_name(), "sync with cache");
    let key_field = cache.key_field();

    match method {
        CrudMethod::Create => {
            let mut record = project(attributes, fieldlist);
            record.extend(flags(local_action, false, false).map(|(k, v)| (k.to_string(), v)));

            let key = id
                .map(str::to_string)
                .or_else(|| key_of(attributes, key_field))
                .or_else(|| local_action.then(make_local_id));
            let merge_mode = match key {
                Some(key) => {
                    record.insert(key_field.to_string(), Value::String(key));
                    WriteMergeMode::MergeAcceptTheirs
                }
                None => WriteMergeMode::Overwrite,
            };
            Ok(Some(cache.save(record, merge_mode).await?))
        }
        CrudMethod::Read => {
            let id = require_id(method, id, cache)?;
            cache.retrieve(&id, fieldlist).await
        }
        CrudMethod::Update => {
            let id = require_id(method, id, cache)?;
            let mut record = project(attributes, fieldlist);
            record.extend(
                flags(is_local_id(&id), local_action, false).map(|(k, v)| (k.to_string(), v)),
            );
            record.insert(key_field.to_string(), Value::String(id));
            Ok(Some(cache.save(record, WriteMergeMode::MergeAcceptTheirs).await?))
        }
        CrudMethod::Delete => {
            let id = require_id(method, id, cache)?;
            if !local_action || is_local_id(&id) {
                cache.remove(&id).await?;
            } else {
                let mut record = Record::new();
                record.insert(key_field.to_string(), Value::String(id));
                record.insert(LOCALLY_DELETED.to_string(), Value::Bool(true));
                cache.save(record, WriteMergeMode::MergeAcceptTheirs).await?;
            }
            Ok(None)
        }
    }
}

/// Perform `method` against the server only.
pub async fn sync_remote_object_with_server(
    method: CrudMethod,
    id: Option<&str>,
    attributes: &Record,
    fieldlist: Option<&[&str]>,
    server: &dyn ServerSync,
) -> Result<Option<Record>> {
    debug!(%method, ?id, "sync with server");
    server.sync(method, id, attributes, fieldlist).await
}

/// Reject method and mode combinations the router never performs.
///
/// Runs before any store or server access. Without a cache, or under
/// [`CacheMode::ServerOnly`], every combination is allowed.
pub(crate) fn validate(
    method: CrudMethod,
    id: Option<&str>,
    has_cache: bool,
    cache_mode: CacheMode,
) -> Result<()> {
    if !has_cache {
        return Ok(());
    }
    match cache_mode {
        CacheMode::CacheFirst if method != CrudMethod::Read => Err(Error::UnsupportedMode {
            method,
            mode: cache_mode,
        }),
        CacheMode::ServerFirst if matches!(method, CrudMethod::Read | CrudMethod::Delete) => {
            match id.filter(|id| is_local_id(id)) {
                Some(id) => Err(Error::UnsupportedLocalId {
                    method,
                    id: id.to_string(),
                }),
                None => Ok(()),
            }
        }
        _ => Ok(()),
    }
}

/// Route `method` to the cache, the server or both according to `cache_mode`.
///
/// Invalid combinations are rejected before any I/O: writes under
/// [`CacheMode::CacheFirst`], and reads or deletes of locally created
/// records under [`CacheMode::ServerFirst`].
pub async fn sync_remote_object(
    method: CrudMethod,
    id: Option<&str>,
    attributes: &Record,
    fieldlist: Option<&[&str]>,
    cache: Option<&RecordCache>,
    cache_mode: CacheMode,
    server: &dyn ServerSync,
) -> Result<SyncOutcome> {
    validate(method, id, cache.is_some(), cache_mode)?;
    let cache = match (cache, cache_mode) {
        (None, _) | (_, CacheMode::ServerOnly) => {
            let record =
                sync_remote_object_with_server(method, id, attributes, fieldlist, server).await?;
            return Ok(SyncOutcome::from_server(record));
        }
        (Some(cache), _) => cache,
    };

    let promote = cache_mode == CacheMode::ServerFirst && id.is_some_and(is_local_id);
    match cache_mode {
        CacheMode::CacheOnly => {
            let fieldlist = if method == CrudMethod::Read { None } else { fieldlist };
            let record =
                sync_remote_object_with_cache(method, id, attributes, fieldlist, cache, true)
                    .await?;
            return Ok(SyncOutcome::from_cache(record));
        }
        CacheMode::CacheFirst => {
            let cached =
                sync_remote_object_with_cache(method, id, attributes, fieldlist, cache, false)
                    .await?;
            if cached.is_some() {
                debug!(?id, "read served from cache");
                return Ok(SyncOutcome::from_cache(cached));
            }
        }
        _ => {}
    }

    let (server_method, server_id) = if promote {
        (CrudMethod::Create, None)
    } else {
        (method, id)
    };
    let result =
        sync_remote_object_with_server(server_method, server_id, attributes, fieldlist, server)
            .await?;

    if promote {
        if let Some(local_id) = id {
            debug!(local_id, "local record promoted to server");
            cache.remove(local_id).await?;
        }
    }

    let target_method = match server_method {
        CrudMethod::Create | CrudMethod::Read => CrudMethod::Update,
        other => other,
    };
    let target_id = match target_method {
        CrudMethod::Update => result
            .as_ref()
            .and_then(|r| key_of(r, cache.key_field()))
            .or_else(|| server_id.map(str::to_string)),
        _ => server_id.map(str::to_string),
    };

    let record = match (&result, target_method) {
        (None, CrudMethod::Update) => None,
        (result, _) => {
            let attributes = result.clone().unwrap_or_default();
            sync_remote_object_with_cache(
                target_method,
                target_id.as_deref(),
                &attributes,
                fieldlist,
                cache,
                false,
            )
            .await?
        }
    };
    Ok(SyncOutcome::from_server(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{is_local, LOCAL};
    use crate::remote::{MemoryRemote, RemoteObjectSync};
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    struct Fixture {
        remote: Arc<MemoryRemote>,
        server: RemoteObjectSync,
        cache: RecordCache,
    }

    async fn fixture() -> Fixture {
        let remote = Arc::new(MemoryRemote::new());
        let server = RemoteObjectSync::new(remote.clone(), "Account");
        let cache = RecordCache::with_defaults(Arc::new(MemoryStore::new()), "accounts");
        cache.init().await.unwrap();
        Fixture {
            remote,
            server,
            cache,
        }
    }

    #[tokio::test]
    async fn cache_only_create_generates_local_id() {
        let f = fixture().await;
        let outcome = sync_remote_object(
            CrudMethod::Create,
            None,
            &record(json!({"Name": "Bond", "Phone": "007"})),
            Some(&["Name"]),
            Some(&f.cache),
            CacheMode::CacheOnly,
            &f.server,
        )
        .await
        .unwrap();

        let created = outcome.record.unwrap();
        let id = created["Id"].as_str().unwrap().to_string();
        assert!(is_local_id(&id));
        assert_eq!(created["locallyCreated"], json!(true));
        assert_eq!(created[LOCAL], json!(true));
        assert!(!created.contains_key("Phone"));
        assert_eq!(f.cache.retrieve(&id, None).await.unwrap(), Some(created));
        assert_eq!(f.remote.calls().total(), 0);
    }

    #[tokio::test]
    async fn cache_only_read_ignores_fieldlist_and_server() {
        let f = fixture().await;
        f.remote.seed("Account", "001A", record(json!({"Name": "Server"})));
        f.cache
            .save(record(json!({"Id": "001B", "Name": "Cached"})), WriteMergeMode::Overwrite)
            .await
            .unwrap();

        let miss = sync_remote_object(
            CrudMethod::Read,
            Some("001A"),
            &Record::new(),
            None,
            Some(&f.cache),
            CacheMode::CacheOnly,
            &f.server,
        )
        .await
        .unwrap();
        assert_eq!(miss.record, None);

        let hit = sync_remote_object(
            CrudMethod::Read,
            Some("001B"),
            &Record::new(),
            Some(&["Name", "Industry"]),
            Some(&f.cache),
            CacheMode::CacheOnly,
            &f.server,
        )
        .await
        .unwrap();
        assert_eq!(hit.record.unwrap()["Name"], json!("Cached"));
        assert_eq!(f.remote.calls().total(), 0);
    }

    #[tokio::test]
    async fn cache_only_update_and_delete_set_flags() {
        let f = fixture().await;
        f.cache
            .save(record(json!({"Id": "001A", "Name": "Acme"})), WriteMergeMode::Overwrite)
            .await
            .unwrap();

        let updated = sync_remote_object(
            CrudMethod::Update,
            Some("001A"),
            &record(json!({"Name": "Acme Corp"})),
            None,
            Some(&f.cache),
            CacheMode::CacheOnly,
            &f.server,
        )
        .await
        .unwrap()
        .record
        .unwrap();
        assert_eq!(updated["locallyUpdated"], json!(true));
        assert_eq!(updated["locallyCreated"], json!(false));

        let deleted = sync_remote_object(
            CrudMethod::Delete,
            Some("001A"),
            &Record::new(),
            None,
            Some(&f.cache),
            CacheMode::CacheOnly,
            &f.server,
        )
        .await
        .unwrap();
        assert_eq!(deleted.record, None);

        let stored = f.cache.retrieve("001A", None).await.unwrap().unwrap();
        assert_eq!(stored["locallyDeleted"], json!(true));
        assert_eq!(stored["locallyUpdated"], json!(true));
        assert!(is_local(&stored));
    }

    #[tokio::test]
    async fn cache_only_delete_of_local_record_removes_it() {
        let f = fixture().await;
        let created = sync_remote_object_with_cache(
            CrudMethod::Create,
            None,
            &record(json!({"Name": "Draft"})),
            None,
            &f.cache,
            true,
        )
        .await
        .unwrap()
        .unwrap();
        let id = created["Id"].as_str().unwrap();

        sync_remote_object_with_cache(CrudMethod::Delete, Some(id), &Record::new(), None, &f.cache, true)
            .await
            .unwrap();
        assert_eq!(f.cache.retrieve(id, None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn cache_first_rejects_writes_before_io() {
        let f = fixture().await;
        for method in [CrudMethod::Create, CrudMethod::Update, CrudMethod::Delete] {
            let err = sync_remote_object(
                method,
                Some("001A"),
                &record(json!({"Name": "x"})),
                None,
                Some(&f.cache),
                CacheMode::CacheFirst,
                &f.server,
            )
            .await
            .unwrap_err();
            assert_eq!(
                err,
                Error::UnsupportedMode {
                    method,
                    mode: CacheMode::CacheFirst
                }
            );
        }
        assert_eq!(f.remote.calls().total(), 0);
    }

    #[tokio::test]
    async fn cache_first_read_falls_back_and_writes_back() {
        let f = fixture().await;
        f.remote.seed("Account", "001A", record(json!({"Name": "Acme", "Industry": "Tech"})));

        let first = sync_remote_object(
            CrudMethod::Read,
            Some("001A"),
            &Record::new(),
            Some(&["Name"]),
            Some(&f.cache),
            CacheMode::CacheFirst,
            &f.server,
        )
        .await
        .unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.record.as_ref().unwrap()["Name"], json!("Acme"));

        let second = sync_remote_object(
            CrudMethod::Read,
            Some("001A"),
            &Record::new(),
            Some(&["Name"]),
            Some(&f.cache),
            CacheMode::CacheFirst,
            &f.server,
        )
        .await
        .unwrap();
        assert!(second.from_cache);
        assert_eq!(f.remote.calls().retrieve.load(Ordering::SeqCst), 1);

        // A field never fetched is a miss, so the server is asked again.
        let third = sync_remote_object(
            CrudMethod::Read,
            Some("001A"),
            &Record::new(),
            Some(&["Name", "Industry"]),
            Some(&f.cache),
            CacheMode::CacheFirst,
            &f.server,
        )
        .await
        .unwrap();
        assert!(!third.from_cache);
        assert_eq!(f.remote.calls().retrieve.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn server_read_miss_is_not_written_back() {
        let f = fixture().await;
        let outcome = sync_remote_object(
            CrudMethod::Read,
            Some("001X"),
            &Record::new(),
            None,
            Some(&f.cache),
            CacheMode::ServerFirst,
            &f.server,
        )
        .await
        .unwrap();
        assert_eq!(outcome, SyncOutcome::default());
        assert_eq!(f.cache.retrieve("001X", None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn server_first_rejects_local_id_read_and_delete() {
        let f = fixture().await;
        let local_id = make_local_id();
        for method in [CrudMethod::Read, CrudMethod::Delete] {
            let err = sync_remote_object(
                method,
                Some(&local_id),
                &Record::new(),
                None,
                Some(&f.cache),
                CacheMode::ServerFirst,
                &f.server,
            )
            .await
            .unwrap_err();
            assert!(matches!(err, Error::UnsupportedLocalId { .. }));
        }
        assert_eq!(f.remote.calls().total(), 0);
    }

    #[tokio::test]
    async fn server_first_promotes_local_record() {
        let f = fixture().await;
        let created = sync_remote_object(
            CrudMethod::Create,
            None,
            &record(json!({"Name": "Bond"})),
            None,
            Some(&f.cache),
            CacheMode::CacheOnly,
            &f.server,
        )
        .await
        .unwrap()
        .record
        .unwrap();
        let local_id = created["Id"].as_str().unwrap().to_string();

        let synced = sync_remote_object(
            CrudMethod::Update,
            Some(&local_id),
            &record(json!({"Name": "James Bond"})),
            None,
            Some(&f.cache),
            CacheMode::ServerFirst,
            &f.server,
        )
        .await
        .unwrap()
        .record
        .unwrap();

        let server_id = synced["Id"].as_str().unwrap().to_string();
        assert!(!is_local_id(&server_id));
        assert!(!is_local(&synced));
        assert_eq!(f.remote.calls().create.load(Ordering::SeqCst), 1);
        assert_eq!(f.remote.calls().update.load(Ordering::SeqCst), 0);
        assert_eq!(f.cache.retrieve(&local_id, None).await.unwrap(), None);
        assert_eq!(
            f.cache.retrieve(&server_id, None).await.unwrap().unwrap()["Name"],
            json!("James Bond")
        );
        assert_eq!(f.remote.get("Account", &server_id).unwrap()["Name"], json!("James Bond"));
    }

    #[tokio::test]
    async fn server_first_update_and_delete_write_back() {
        let f = fixture().await;
        f.remote.seed("Account", "001A", record(json!({"Name": "Acme"})));
        f.cache
            .save(
                record(json!({"Id": "001A", "Name": "Acme", "locallyUpdated": true})),
                WriteMergeMode::Overwrite,
            )
            .await
            .unwrap();

        let updated = sync_remote_object(
            CrudMethod::Update,
            Some("001A"),
            &record(json!({"Name": "Acme Corp"})),
            None,
            Some(&f.cache),
            CacheMode::ServerFirst,
            &f.server,
        )
        .await
        .unwrap()
        .record
        .unwrap();
        assert_eq!(updated["Name"], json!("Acme Corp"));
        assert!(!is_local(&updated));

        sync_remote_object(
            CrudMethod::Delete,
            Some("001A"),
            &Record::new(),
            None,
            Some(&f.cache),
            CacheMode::ServerFirst,
            &f.server,
        )
        .await
        .unwrap();
        assert!(f.remote.is_empty());
        assert_eq!(f.cache.retrieve("001A", None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn server_only_leaves_cache_alone() {
        let f = fixture().await;
        let outcome = sync_remote_object(
            CrudMethod::Create,
            None,
            &record(json!({"Name": "Acme"})),
            None,
            Some(&f.cache),
            CacheMode::ServerOnly,
            &f.server,
        )
        .await
        .unwrap();
        let id = outcome.record.unwrap()["Id"].as_str().unwrap().to_string();
        assert!(f.remote.get("Account", &id).is_some());
        assert_eq!(f.cache.retrieve(&id, None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn no_cache_goes_to_server() {
        let f = fixture().await;
        f.remote.seed("Account", "001A", record(json!({"Name": "Acme"})));
        let outcome = sync_remote_object(
            CrudMethod::Read,
            Some("001A"),
            &Record::new(),
            None,
            None,
            CacheMode::CacheOnly,
            &f.server,
        )
        .await
        .unwrap();
        assert_eq!(outcome.record.unwrap()["Name"], json!("Acme"));
    }

    #[tokio::test]
    async fn server_errors_propagate() {
        let f = fixture().await;
        let err = sync_remote_object(
            CrudMethod::Delete,
            Some("001X"),
            &Record::new(),
            None,
            Some(&f.cache),
            CacheMode::ServerFirst,
            &f.server,
        )
        .await
        .unwrap_err();
        match err {
            Error::Remote(e) => assert_eq!(e.status_code(), Some(404)),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
