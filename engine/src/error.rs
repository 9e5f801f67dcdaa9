//! Error types for the Ferry engine.

use crate::conflict::ConflictReport;
use crate::mode::{CacheMode, CrudMethod};
use thiserror::Error;

/// Errors raised by a [`LocalStore`](crate::store::LocalStore).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("invalid soup name: {0:?}")]
    InvalidSoupName(String),

    #[error("soup not found: {0}")]
    UnknownSoup(String),

    #[error("path '{path}' is not indexed in soup {soup}")]
    UnindexedPath { soup: String, path: String },

    #[error("cursor not found: {0}")]
    UnknownCursor(u64),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Errors raised by a [`RemoteClient`](crate::remote::RemoteClient).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RemoteError {
    /// The server answered with a non-success status.
    #[error("server responded with status {status}: {body}")]
    Status {
        status: u16,
        body: serde_json::Value,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed server response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Build a status error with a plain message body.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        RemoteError::Status {
            status,
            body: serde_json::Value::String(message.into()),
        }
    }

    /// HTTP-style status code, if the server produced one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RemoteError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// All possible errors from the Ferry engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error("local store error: {0}")]
    Store(#[from] StoreError),

    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    // Rejected before any I/O
    #[error("{mode} not supported for method {method}")]
    UnsupportedMode { method: CrudMethod, mode: CacheMode },

    #[error("cannot {method} on server a locally created record: {id}")]
    UnsupportedLocalId { method: CrudMethod, id: String },

    #[error("record is missing key field '{key_field}'")]
    MissingKey { key_field: String },

    #[error("invalid mode: {0}")]
    InvalidMode(String),

    /// The operation was aborted because the record changed on the server.
    /// Not a failure of the store or of the transport.
    #[error("conflict on fields {:?}", .0.conflicting_changes)]
    Conflict(Box<ConflictReport>),
}

impl Error {
    /// Whether this error is a conflict rejection rather than an I/O failure.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Whether the method and mode combination was refused before any I/O.
    /// Covers both [`Error::UnsupportedMode`] and [`Error::UnsupportedLocalId`].
    pub fn is_unsupported_mode(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedMode { .. } | Error::UnsupportedLocalId { .. }
        )
    }

    /// The conflict payload, when this error is a conflict rejection.
    pub fn conflict(&self) -> Option<&ConflictReport> {
        match self {
            Error::Conflict(report) => Some(report),
            _ => None,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
