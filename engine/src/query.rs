//! Query specs for indexed local-store lookups and the pages they return.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Page size used when a query does not set one.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    #[default]
    Ascending,
    Descending,
}

/// Type of an index declared on a soup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    String,
    Integer,
    Floating,
    #[serde(rename = "full_text")]
    FullText,
}

/// An indexed path on a soup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSpec {
    pub path: String,
    #[serde(rename = "type")]
    pub index_type: IndexType,
}

impl IndexSpec {
    pub fn new(path: impl Into<String>, index_type: IndexType) -> Self {
        Self {
            path: path.into(),
            index_type,
        }
    }

    pub fn string(path: impl Into<String>) -> Self {
        Self::new(path, IndexType::String)
    }
}

/// What a query selects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "queryType", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum QueryKind {
    /// Every entry.
    All,
    /// Entries whose `path` equals `match_key`.
    Exact { path: String, match_key: Value },
    /// Entries whose `path` lies between the bounds, inclusive. A missing
    /// bound is open.
    Range {
        path: String,
        begin_key: Option<Value>,
        end_key: Option<Value>,
    },
    /// SQL `LIKE` on `path` (`%` and `_` wildcards).
    Like { path: String, like_key: String },
    /// Full-text match on `path`.
    Match { path: String, match_key: String },
    /// Entries whose `path` is one of `keys`.
    In { path: String, keys: Vec<Value> },
    /// Projection of `select_paths`; each result row is an array.
    Smart {
        select_paths: Vec<String>,
        filter: Option<Box<QueryKind>>,
    },
}

impl QueryKind {
    /// The indexed path the query filters on, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            QueryKind::All | QueryKind::Smart { .. } => None,
            QueryKind::Exact { path, .. }
            | QueryKind::Range { path, .. }
            | QueryKind::Like { path, .. }
            | QueryKind::Match { path, .. }
            | QueryKind::In { path, .. } => Some(path),
        }
    }

    pub fn is_smart(&self) -> bool {
        matches!(self, QueryKind::Smart { .. })
    }
}

/// A query against one soup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySpec {
    pub kind: QueryKind,
    pub order_path: Option<String>,
    pub order: Order,
    pub page_size: usize,
}

impl QuerySpec {
    fn with_kind(kind: QueryKind) -> Self {
        Self {
            kind,
            order_path: None,
            order: Order::Ascending,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn all() -> Self {
        Self::with_kind(QueryKind::All)
    }

    pub fn exact(path: impl Into<String>, match_key: impl Into<Value>) -> Self {
        Self::with_kind(QueryKind::Exact {
            path: path.into(),
            match_key: match_key.into(),
        })
    }

    pub fn range(path: impl Into<String>, begin_key: Option<Value>, end_key: Option<Value>) -> Self {
        Self::with_kind(QueryKind::Range {
            path: path.into(),
            begin_key,
            end_key,
        })
    }

    pub fn like(path: impl Into<String>, like_key: impl Into<String>) -> Self {
        Self::with_kind(QueryKind::Like {
            path: path.into(),
            like_key: like_key.into(),
        })
    }

    pub fn full_text(path: impl Into<String>, match_key: impl Into<String>) -> Self {
        Self::with_kind(QueryKind::Match {
            path: path.into(),
            match_key: match_key.into(),
        })
    }

    pub fn keys(path: impl Into<String>, keys: Vec<Value>) -> Self {
        Self::with_kind(QueryKind::In {
            path: path.into(),
            keys,
        })
    }

    pub fn smart(select_paths: Vec<String>, filter: Option<QueryKind>) -> Self {
        Self::with_kind(QueryKind::Smart {
            select_paths,
            filter: filter.map(Box::new),
        })
    }

    pub fn order_by(mut self, path: impl Into<String>, order: Order) -> Self {
        self.order_path = Some(path.into());
        self.order = order;
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPage {
    /// Open cursor, if the result spans more than this page.
    pub cursor_id: Option<u64>,
    pub current_page_index: usize,
    pub total_pages: usize,
    pub total_entries: usize,
    /// Records, or row arrays for smart queries.
    pub entries: Vec<Value>,
}

impl QueryPage {
    pub fn has_next_page(&self) -> bool {
        self.current_page_index + 1 < self.total_pages
    }
}
