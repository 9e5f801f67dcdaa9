//! Per-call routing and merge policies.
//!
//! Every enum here round-trips through the literal strings used on the wire
//! and in debug output (`"cache-first"`, `"MERGE_ACCEPT_THEIRS"`, ...).

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The four CRUD methods a sync call can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrudMethod {
    Create,
    Read,
    Update,
    Delete,
}

impl CrudMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrudMethod::Create => "create",
            CrudMethod::Read => "read",
            CrudMethod::Update => "update",
            CrudMethod::Delete => "delete",
        }
    }
}

/// Which of cache and server a call consults, and in what order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CacheMode {
    #[serde(rename = "cache-only")]
    CacheOnly,
    #[serde(rename = "cache-first")]
    CacheFirst,
    #[serde(rename = "server-only")]
    ServerOnly,
    /// Used when the caller does not pick a mode.
    #[default]
    #[serde(rename = "server-first")]
    ServerFirst,
}

impl CacheMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheMode::CacheOnly => "cache-only",
            CacheMode::CacheFirst => "cache-first",
            CacheMode::ServerOnly => "server-only",
            CacheMode::ServerFirst => "server-first",
        }
    }
}

/// How a record being written to a cache is reconciled with the stored copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteMergeMode {
    /// Replace the stored record outright.
    Overwrite,
    /// Overlay the new fields on the stored record.
    #[default]
    MergeAcceptTheirs,
    /// Keep the stored record if it has unsynced local changes.
    LeaveIfChanged,
}

impl WriteMergeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMergeMode::Overwrite => "OVERWRITE",
            WriteMergeMode::MergeAcceptTheirs => "MERGE_ACCEPT_THEIRS",
            WriteMergeMode::LeaveIfChanged => "LEAVE_IF_CHANGED",
        }
    }
}

/// How local edits are reconciled with concurrent remote edits on update
/// and delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictMergeMode {
    /// No conflict detection at all.
    Overwrite,
    /// Never fail; non-conflicting remote changes are still merged in.
    MergeAcceptYours,
    /// Fail when a field was changed both locally and remotely to different values.
    MergeFailIfConflict,
    /// Fail when anything changed remotely.
    MergeFailIfChanged,
}

impl ConflictMergeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictMergeMode::Overwrite => "overwrite",
            ConflictMergeMode::MergeAcceptYours => "merge-accept-yours",
            ConflictMergeMode::MergeFailIfConflict => "merge-fail-if-conflict",
            ConflictMergeMode::MergeFailIfChanged => "merge-fail-if-changed",
        }
    }
}

macro_rules! literal_enum {
    ($ty:ty, [$($variant:expr),+ $(,)?]) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                [$($variant),+]
                    .into_iter()
                    .find(|v: &$ty| v.as_str() == s)
                    .ok_or_else(|| Error::InvalidMode(s.to_string()))
            }
        }
    };
}

literal_enum!(
    CrudMethod,
    [
        CrudMethod::Create,
        CrudMethod::Read,
        CrudMethod::Update,
        CrudMethod::Delete,
    ]
);
literal_enum!(
    CacheMode,
    [
        CacheMode::CacheOnly,
        CacheMode::CacheFirst,
        CacheMode::ServerOnly,
        CacheMode::ServerFirst,
    ]
);
literal_enum!(
    WriteMergeMode,
    [
        WriteMergeMode::Overwrite,
        WriteMergeMode::MergeAcceptTheirs,
        WriteMergeMode::LeaveIfChanged,
    ]
);
literal_enum!(
    ConflictMergeMode,
    [
        ConflictMergeMode::Overwrite,
        ConflictMergeMode::MergeAcceptYours,
        ConflictMergeMode::MergeFailIfConflict,
        ConflictMergeMode::MergeFailIfChanged,
    ]
);
