//! Local store - the indexed document store a cache persists into.
//!
//! [`LocalStore`] is the narrow interface the engine consumes. Soups are
//! named collections of JSON records; each stored record gets a surrogate
//! `_soupEntryId`. [`MemoryStore`] is an in-memory implementation used by
//! tests, benchmarks and apps that do not need persistence.

use crate::error::StoreError;
use crate::query::{IndexSpec, Order, QueryKind, QueryPage, QuerySpec};
use crate::record::{key_of, value_at_path, Record, SOUP_ENTRY_ID};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Result type for local store calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Indexed document store consumed by [`RecordCache`](crate::RecordCache).
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Whether a soup with this name has been registered.
    async fn soup_exists(&self, soup: &str) -> StoreResult<bool>;

    /// Register a soup with its indexes. Registering an existing soup is a no-op.
    async fn register_soup(&self, soup: &str, indexes: &[IndexSpec]) -> StoreResult<()>;

    /// Fetch the record whose `key_path` equals `key`.
    async fn get(&self, soup: &str, key_path: &str, key: &str) -> StoreResult<Option<Record>>;

    /// Insert or replace records, matching existing entries on `external_id_path`.
    ///
    /// Returns the stored records with `_soupEntryId` attached.
    async fn upsert(
        &self,
        soup: &str,
        records: Vec<Record>,
        external_id_path: &str,
    ) -> StoreResult<Vec<Record>>;

    /// Run a query and return its first page.
    async fn query(&self, soup: &str, spec: &QuerySpec) -> StoreResult<QueryPage>;

    /// Move an open cursor to another page.
    async fn move_cursor_to_page(&self, cursor_id: u64, page_index: usize)
        -> StoreResult<QueryPage>;

    /// Release an open cursor. Unknown cursors are ignored.
    async fn close_cursor(&self, cursor_id: u64) -> StoreResult<()>;

    /// Remove the record whose `key_path` equals `key`, if any.
    async fn remove(&self, soup: &str, key_path: &str, key: &str) -> StoreResult<()>;
}

/// A registered soup.
#[derive(Debug, Clone, Default)]
struct Soup {
    indexes: Vec<IndexSpec>,
    entries: BTreeMap<u64, Record>,
    next_entry_id: u64,
}

impl Soup {
    fn new(indexes: &[IndexSpec]) -> Self {
        Self {
            indexes: indexes.to_vec(),
            entries: BTreeMap::new(),
            next_entry_id: 1,
        }
    }

    fn require_index(&self, soup: &str, path: &str) -> StoreResult<()> {
        if path == SOUP_ENTRY_ID || self.indexes.iter().any(|index| index.path == path) {
            Ok(())
        } else {
            Err(StoreError::UnindexedPath {
                soup: soup.to_string(),
                path: path.to_string(),
            })
        }
    }

    fn entry_id_for(&self, key_path: &str, key: &str) -> Option<u64> {
        self.entries
            .iter()
            .find(|(_, record)| key_of(record, key_path).as_deref() == Some(key))
            .map(|(id, _)| *id)
    }
}

/// A cursor over a snapshot of query results.
#[derive(Debug)]
struct Cursor {
    entries: Vec<Value>,
    page_size: usize,
}

impl Cursor {
    fn page(&self, cursor_id: Option<u64>, page_index: usize) -> QueryPage {
        let total_entries = self.entries.len();
        let total_pages = total_entries.div_ceil(self.page_size);
        let entries = self
            .entries
            .iter()
            .skip(page_index * self.page_size)
            .take(self.page_size)
            .cloned()
            .collect();
        QueryPage {
            cursor_id,
            current_page_index: page_index,
            total_pages,
            total_entries,
            entries,
        }
    }
}

/// In-memory [`LocalStore`].
///
/// Enforces the same rules a real indexed store does: soup names must be
/// valid, and lookups, queries and upserts may only use indexed paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    soups: DashMap<String, Soup>,
    cursors: DashMap<u64, Cursor>,
    next_cursor_id: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in a soup (0 when the soup does not exist).
    pub fn entry_count(&self, soup: &str) -> usize {
        self.soups.get(soup).map(|s| s.entries.len()).unwrap_or(0)
    }

    /// Number of cursors currently open.
    pub fn open_cursors(&self) -> usize {
        self.cursors.len()
    }

    fn validate_soup_name(soup: &str) -> StoreResult<()> {
        if soup.is_empty() || soup.chars().any(char::is_whitespace) {
            return Err(StoreError::InvalidSoupName(soup.to_string()));
        }
        Ok(())
    }

    fn select(soup: &Soup, kind: &QueryKind) -> StoreResult<Vec<Record>> {
        let matches = |record: &Record| -> StoreResult<bool> {
            Ok(match kind {
                QueryKind::All => true,
                QueryKind::Exact { path, match_key } => value_at_path(record, path)
                    .map(|v| compare_values(v, match_key) == Ordering::Equal)
                    .unwrap_or(false),
                QueryKind::Range {
                    path,
                    begin_key,
                    end_key,
                } => match value_at_path(record, path) {
                    Some(Value::Null) | None => false,
                    Some(v) => {
                        begin_key
                            .as_ref()
                            .map_or(true, |b| compare_values(v, b) != Ordering::Less)
                            && end_key
                                .as_ref()
                                .map_or(true, |e| compare_values(v, e) != Ordering::Greater)
                    }
                },
                QueryKind::Like { path, like_key } => value_at_path(record, path)
                    .and_then(text_of)
                    .map(|text| like_matches(&text, like_key))
                    .unwrap_or(false),
                QueryKind::Match { path, match_key } => value_at_path(record, path)
                    .and_then(text_of)
                    .map(|text| full_text_matches(&text, match_key))
                    .unwrap_or(false),
                QueryKind::In { path, keys } => value_at_path(record, path)
                    .map(|v| keys.iter().any(|k| same_key(v, k)))
                    .unwrap_or(false),
                QueryKind::Smart { .. } => {
                    return Err(StoreError::InvalidQuery(
                        "smart query used as a filter".into(),
                    ))
                }
            })
        };

        let mut selected = Vec::new();
        for record in soup.entries.values() {
            if matches(record)? {
                selected.push(record.clone());
            }
        }
        Ok(selected)
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn soup_exists(&self, soup: &str) -> StoreResult<bool> {
        Ok(self.soups.contains_key(soup))
    }

    async fn register_soup(&self, soup: &str, indexes: &[IndexSpec]) -> StoreResult<()> {
        Self::validate_soup_name(soup)?;
        self.soups
            .entry(soup.to_string())
            .or_insert_with(|| Soup::new(indexes));
        Ok(())
    }

    async fn get(&self, soup: &str, key_path: &str, key: &str) -> StoreResult<Option<Record>> {
        let entry = self
            .soups
            .get(soup)
            .ok_or_else(|| StoreError::UnknownSoup(soup.to_string()))?;
        entry.require_index(soup, key_path)?;
        Ok(entry
            .entry_id_for(key_path, key)
            .and_then(|id| entry.entries.get(&id).cloned()))
    }

    async fn upsert(
        &self,
        soup: &str,
        records: Vec<Record>,
        external_id_path: &str,
    ) -> StoreResult<Vec<Record>> {
        let mut entry = self
            .soups
            .get_mut(soup)
            .ok_or_else(|| StoreError::UnknownSoup(soup.to_string()))?;
        entry.require_index(soup, external_id_path)?;

        let mut stored = Vec::with_capacity(records.len());
        for mut record in records {
            record.remove(SOUP_ENTRY_ID);
            let existing = key_of(&record, external_id_path)
                .and_then(|key| entry.entry_id_for(external_id_path, &key));
            let entry_id = match existing {
                Some(id) => id,
                None => {
                    let id = entry.next_entry_id;
                    entry.next_entry_id += 1;
                    id
                }
            };
            record.insert(SOUP_ENTRY_ID.into(), Value::from(entry_id));
            entry.entries.insert(entry_id, record.clone());
            stored.push(record);
        }
        Ok(stored)
    }

    async fn query(&self, soup: &str, spec: &QuerySpec) -> StoreResult<QueryPage> {
        let entry = self
            .soups
            .get(soup)
            .ok_or_else(|| StoreError::UnknownSoup(soup.to_string()))?;

        let (filter, select_paths) = match &spec.kind {
            QueryKind::Smart {
                select_paths,
                filter,
            } => (
                filter.as_deref().cloned().unwrap_or(QueryKind::All),
                Some(select_paths),
            ),
            other => (other.clone(), None),
        };
        if let Some(path) = filter.path() {
            entry.require_index(soup, path)?;
        }
        if let Some(path) = &spec.order_path {
            entry.require_index(soup, path)?;
        }

        let mut records = Self::select(&entry, &filter)?;
        drop(entry);

        let order_path = spec.order_path.as_deref().unwrap_or(SOUP_ENTRY_ID);
        records.sort_by(|a, b| {
            let ordering = match (value_at_path(a, order_path), value_at_path(b, order_path)) {
                (Some(x), Some(y)) => compare_values(x, y),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            match spec.order {
                Order::Ascending => ordering,
                Order::Descending => ordering.reverse(),
            }
        });

        let entries: Vec<Value> = match select_paths {
            Some(paths) => records
                .iter()
                .map(|record| {
                    Value::Array(
                        paths
                            .iter()
                            .map(|path| value_at_path(record, path).cloned().unwrap_or(Value::Null))
                            .collect(),
                    )
                })
                .collect(),
            None => records.into_iter().map(Value::Object).collect(),
        };

        let cursor = Cursor {
            entries,
            page_size: spec.page_size.max(1),
        };
        if cursor.entries.len() > cursor.page_size {
            let cursor_id = self.next_cursor_id.fetch_add(1, AtomicOrdering::SeqCst) + 1;
            let page = cursor.page(Some(cursor_id), 0);
            self.cursors.insert(cursor_id, cursor);
            Ok(page)
        } else {
            Ok(cursor.page(None, 0))
        }
    }

    async fn move_cursor_to_page(
        &self,
        cursor_id: u64,
        page_index: usize,
    ) -> StoreResult<QueryPage> {
        let cursor = self
            .cursors
            .get(&cursor_id)
            .ok_or(StoreError::UnknownCursor(cursor_id))?;
        let page = cursor.page(Some(cursor_id), page_index);
        if page_index >= page.total_pages {
            return Err(StoreError::InvalidQuery(format!(
                "page {page_index} out of range ({} pages)",
                page.total_pages
            )));
        }
        Ok(page)
    }

    async fn close_cursor(&self, cursor_id: u64) -> StoreResult<()> {
        self.cursors.remove(&cursor_id);
        Ok(())
    }

    async fn remove(&self, soup: &str, key_path: &str, key: &str) -> StoreResult<()> {
        let mut entry = self
            .soups
            .get_mut(soup)
            .ok_or_else(|| StoreError::UnknownSoup(soup.to_string()))?;
        entry.require_index(soup, key_path)?;
        if let Some(id) = entry.entry_id_for(key_path, key) {
            entry.entries.remove(&id);
        }
        Ok(())
    }
}

/// Total order over JSON values: null < bool < number < string < array < object.
/// Key equality: a numeric key also matches its text form.
fn same_key(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            n.to_string() == *s
        }
        _ => compare_values(a, b) == Ordering::Equal,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            a.to_string().cmp(&b.to_string())
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// SQL `LIKE`, ASCII case-insensitive.
fn like_matches(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.to_lowercase().chars().collect();
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();

    // matched[j]: pattern[..j] matches the text consumed so far
    let mut matched = vec![false; pattern.len() + 1];
    matched[0] = true;
    for j in 1..=pattern.len() {
        matched[j] = matched[j - 1] && pattern[j - 1] == '%';
    }
    for c in text {
        let mut next = vec![false; pattern.len() + 1];
        for j in 1..=pattern.len() {
            next[j] = match pattern[j - 1] {
                '%' => next[j - 1] || matched[j],
                '_' => matched[j - 1],
                p => matched[j - 1] && p == c,
            };
        }
        matched = next;
    }
    matched[pattern.len()]
}

fn full_text_matches(text: &str, query: &str) -> bool {
    let text = text.to_lowercase();
    let mut terms = query.split_whitespace().peekable();
    terms.peek().is_some() && terms.all(|term| text.contains(&term.to_lowercase()))
}
