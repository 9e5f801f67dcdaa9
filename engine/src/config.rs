//! Configuration for record caches.

use crate::query::{IndexSpec, DEFAULT_PAGE_SIZE};
use crate::record::DEFAULT_KEY_FIELD;

/// Configuration for a [`RecordCache`](crate::RecordCache).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Soup the cache persists into.
    pub soup_name: String,
    /// Field that uniquely identifies a record.
    pub key_field: String,
    /// Indexes registered on top of the key field and `local`.
    pub additional_indexes: Vec<IndexSpec>,
    /// Page size for bulk key lookups made by `save_all`.
    pub page_size: usize,
}

impl CacheConfig {
    /// Creates a configuration for the given soup with default settings.
    pub fn new(soup_name: impl Into<String>) -> Self {
        Self {
            soup_name: soup_name.into(),
            key_field: DEFAULT_KEY_FIELD.to_string(),
            additional_indexes: Vec::new(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Sets the key field.
    pub fn with_key_field(mut self, key_field: impl Into<String>) -> Self {
        self.key_field = key_field.into();
        self
    }

    /// Adds an index registered when the cache is initialized.
    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.additional_indexes.push(index);
        self
    }

    /// Sets the page size for bulk lookups.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}
