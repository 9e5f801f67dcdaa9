//! Record cache over a [`LocalStore`] soup.
//!
//! The cache owns one soup, keys records by a configurable key field and
//! maintains the dirty flags on every write. Writes resolve against the
//! stored copy according to a [`WriteMergeMode`].

use crate::config::CacheConfig;
use crate::error::{Error, Result, StoreError};
use crate::mode::WriteMergeMode;
use crate::query::{IndexSpec, QueryPage, QuerySpec};
use crate::record::{self, has_fields, is_local, key_of, Record, LOCAL, SOUP_ENTRY_ID};
use crate::store::LocalStore;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// A keyed, dirty-flag aware view over one soup.
#[derive(Clone)]
pub struct RecordCache {
    store: Arc<dyn LocalStore>,
    config: CacheConfig,
}

impl std::fmt::Debug for RecordCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RecordCache {
    pub fn new(store: Arc<dyn LocalStore>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    /// A cache keyed by `Id` with no extra indexes.
    pub fn with_defaults(store: Arc<dyn LocalStore>, soup_name: impl Into<String>) -> Self {
        Self::new(store, CacheConfig::new(soup_name))
    }

    pub fn soup_name(&self) -> &str {
        &self.config.soup_name
    }

    pub fn key_field(&self) -> &str {
        &self.config.key_field
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Register the soup if it does not exist yet. Existing data is kept.
    pub async fn init(&self) -> Result<()> {
        let soup = self.soup_name();
        if self.store.soup_exists(soup).await? {
            debug!(soup, "soup already registered");
            return Ok(());
        }

        let mut indexes = vec![IndexSpec::string(self.key_field()), IndexSpec::string(LOCAL)];
        indexes.extend(self.config.additional_indexes.iter().cloned());
        self.store.register_soup(soup, &indexes).await?;

        info!(soup, key_field = self.key_field(), indexes = indexes.len(), "soup registered");
        Ok(())
    }

    /// Look up a record by key.
    ///
    /// When `fieldlist` is given and the stored record lacks any of those
    /// fields, this is a miss: the caller gets `None` rather than a partial
    /// record.
    pub async fn retrieve(&self, key: &str, fieldlist: Option<&[&str]>) -> Result<Option<Record>> {
        let found = self
            .store
            .get(self.soup_name(), self.key_field(), key)
            .await?;

        Ok(match (found, fieldlist) {
            (Some(record), Some(fields)) if !has_fields(&record, fields) => {
                debug!(soup = self.soup_name(), key, "cached record is incomplete");
                None
            }
            (found, _) => found,
        })
    }

    /// Save one record and return it as stored.
    pub async fn save(&self, record: Record, merge_mode: WriteMergeMode) -> Result<Record> {
        let record = without_entry_id(record);
        let existing = match merge_mode {
            WriteMergeMode::Overwrite => None,
            _ => {
                let key = self.require_key(&record)?;
                self.store
                    .get(self.soup_name(), self.key_field(), &key)
                    .await?
            }
        };

        let resolved = match resolve(record, existing, merge_mode) {
            Resolved::Keep(stored) => return Ok(stored),
            Resolved::Write(record) => record,
        };

        let mut stored = self
            .store
            .upsert(self.soup_name(), vec![resolved], self.key_field())
            .await?;
        stored
            .pop()
            .ok_or_else(|| StoreError::Backend("upsert returned no record".into()).into())
    }

    /// Save a batch of records and return them as stored, in input order.
    ///
    /// Merging modes look up every existing record with one key-set query.
    pub async fn save_all(&self, records: Vec<Record>, merge_mode: WriteMergeMode) -> Result<Vec<Record>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let records: Vec<Record> = records.into_iter().map(without_entry_id).collect();

        let existing = match merge_mode {
            WriteMergeMode::Overwrite => HashMap::new(),
            _ => {
                let keys = records
                    .iter()
                    .map(|r| self.require_key(r))
                    .collect::<Result<Vec<_>>>()?;
                self.existing_by_key(keys).await?
            }
        };

        let mut kept: Vec<(usize, Record)> = Vec::new();
        let mut to_write = Vec::with_capacity(records.len());
        for (position, record) in records.into_iter().enumerate() {
            let current = key_of(&record, self.key_field()).and_then(|k| existing.get(&k).cloned());
            match resolve(record, current, merge_mode) {
                Resolved::Keep(stored) => kept.push((position, stored)),
                Resolved::Write(record) => to_write.push((position, record)),
            }
        }

        let positions: Vec<usize> = to_write.iter().map(|(p, _)| *p).collect();
        let written = self
            .store
            .upsert(
                self.soup_name(),
                to_write.into_iter().map(|(_, r)| r).collect(),
                self.key_field(),
            )
            .await?;

        let mut all: Vec<(usize, Record)> = positions.into_iter().zip(written).collect();
        all.extend(kept);
        all.sort_by_key(|(position, _)| *position);
        debug!(soup = self.soup_name(), count = all.len(), %merge_mode, "batch saved");
        Ok(all.into_iter().map(|(_, r)| r).collect())
    }

    /// Run a query and return a result that pages lazily.
    pub async fn find(&self, spec: QuerySpec) -> Result<CacheQueryResult> {
        let smart = spec.kind.is_smart();
        let page = self.store.query(self.soup_name(), &spec).await?;
        let mut result = CacheQueryResult {
            store: self.store.clone(),
            smart,
            records: Vec::new(),
            cursor_id: page.cursor_id,
            current_page_index: 0,
            total_pages: 0,
            exhausted: false,
        };
        result.absorb(page);
        Ok(result)
    }

    /// Remove a record. Missing keys are ignored.
    pub async fn remove(&self, key: &str) -> Result<()> {
        self.store
            .remove(self.soup_name(), self.key_field(), key)
            .await?;
        debug!(soup = self.soup_name(), key, "record removed");
        Ok(())
    }

    pub fn make_local_id(&self) -> String {
        record::make_local_id()
    }

    pub fn is_local_id(&self, id: &str) -> bool {
        record::is_local_id(id)
    }

    pub fn add_local_fields(&self, record: Record) -> Record {
        record::add_local_fields(record)
    }

    fn require_key(&self, record: &Record) -> Result<String> {
        key_of(record, self.key_field()).ok_or_else(|| Error::MissingKey {
            key_field: self.key_field().to_string(),
        })
    }

    async fn existing_by_key(&self, keys: Vec<String>) -> Result<HashMap<String, Record>> {
        let spec = QuerySpec::keys(self.key_field(), keys.into_iter().map(Value::String).collect())
            .page_size(self.config.page_size);
        let mut found = self.find(spec).await?;
        while found.has_more() {
            found.get_more().await?;
        }
        found.close_cursor().await?;

        Ok(found
            .records
            .into_iter()
            .filter_map(|entry| match entry {
                Value::Object(record) => {
                    key_of(&record, self.key_field()).map(|key| (key, record))
                }
                _ => None,
            })
            .collect())
    }
}

enum Resolved {
    /// The stored copy stays as it is.
    Keep(Record),
    Write(Record),
}

fn without_entry_id(mut record: Record) -> Record {
    record.remove(SOUP_ENTRY_ID);
    record
}

fn resolve(record: Record, existing: Option<Record>, merge_mode: WriteMergeMode) -> Resolved {
    let merged = match (merge_mode, existing) {
        (WriteMergeMode::LeaveIfChanged, Some(stored)) if is_local(&stored) => {
            return Resolved::Keep(stored);
        }
        (WriteMergeMode::MergeAcceptTheirs, Some(stored)) => {
            let mut merged = without_entry_id(stored);
            merged.extend(record);
            merged
        }
        _ => record,
    };
    Resolved::Write(record::add_local_fields(merged))
}

/// Result of [`RecordCache::find`].
///
/// `records` accumulates every page fetched so far. Once the last page has
/// been read or the cursor closed, `has_more` stays false.
pub struct CacheQueryResult {
    store: Arc<dyn LocalStore>,
    smart: bool,
    records: Vec<Value>,
    cursor_id: Option<u64>,
    current_page_index: usize,
    total_pages: usize,
    exhausted: bool,
}

impl std::fmt::Debug for CacheQueryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheQueryResult")
            .field("records", &self.records.len())
            .field("cursor_id", &self.cursor_id)
            .field("current_page_index", &self.current_page_index)
            .field("total_pages", &self.total_pages)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

impl CacheQueryResult {
    /// Every entry fetched so far.
    ///
    /// Plain queries yield record objects. Smart queries yield their rows,
    /// with single-column rows flattened to the column value.
    pub fn records(&self) -> &[Value] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Value> {
        self.records
    }

    /// Entries that are JSON objects, as records.
    pub fn objects(&self) -> Vec<Record> {
        self.records
            .iter()
            .filter_map(|v| v.as_object().cloned())
            .collect()
    }

    pub fn has_more(&self) -> bool {
        !self.exhausted && self.current_page_index + 1 < self.total_pages
    }

    /// Fetch the next page and append it. Returns whether a page was fetched.
    pub async fn get_more(&mut self) -> Result<bool> {
        if !self.has_more() {
            return Ok(false);
        }
        let Some(cursor_id) = self.cursor_id else {
            self.exhausted = true;
            return Ok(false);
        };
        let page = self
            .store
            .move_cursor_to_page(cursor_id, self.current_page_index + 1)
            .await?;
        self.absorb(page);
        Ok(true)
    }

    /// Release the store cursor. Further pages cannot be fetched.
    pub async fn close_cursor(&mut self) -> Result<()> {
        self.exhausted = true;
        if let Some(cursor_id) = self.cursor_id.take() {
            self.store.close_cursor(cursor_id).await?;
        }
        Ok(())
    }

    fn absorb(&mut self, page: QueryPage) {
        self.current_page_index = page.current_page_index;
        self.total_pages = page.total_pages;
        let smart = self.smart;
        self.records.extend(page.entries.into_iter().map(|entry| match entry {
            Value::Array(mut row) if smart && row.len() == 1 => row.remove(0),
            other => other,
        }));
        if self.current_page_index + 1 >= self.total_pages {
            self.exhausted = true;
        }
    }
}
