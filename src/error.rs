use std::path::PathBuf;
use thiserror::Error;

use crate::model::EntityKind;

/// Errors that can occur when talking to the remote catalog
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Request to {url} failed: {source}")]
    RequestFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Failed to decode response from {url}: {source}")]
    DecodeFailed {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid change list from {url}: {source}")]
    InvalidChangeList {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid remote URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Failed to read fixture file {path}: {source}")]
    FixtureReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse fixture file {path}: {source}")]
    FixtureParseFailed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors that can occur when reading or writing the preferences record
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to read preferences file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write preferences file {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse preferences JSON in {path}: {source}")]
    JsonParseFailed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize preferences: {0}")]
    JsonSerializeFailed(#[from] serde_json::Error),
}

/// Errors that can occur when persisting the local cache
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Failed to read cache snapshot {path}: {source}")]
    SnapshotReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write cache snapshot {path}: {source}")]
    SnapshotWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse cache snapshot {path}: {source}")]
    SnapshotParseFailed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize cache snapshot: {0}")]
    SnapshotSerializeFailed(#[from] serde_json::Error),
}

/// Top-level errors for sync operations
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync was cancelled")]
    Cancelled,

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Preferences error: {0}")]
    Store(#[from] StoreError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Malformed {kind} change list entry '{id}' at version {version}: {reason}")]
    MalformedChangeList {
        kind: EntityKind,
        id: String,
        version: i64,
        reason: String,
    },
}

impl SyncError {
    /// Cancellation must always reach the caller
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Contract violations have no safe recovery and are never retried
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::MalformedChangeList { .. } | Self::Remote(RemoteError::InvalidChangeList { .. })
        )
    }

    /// Failures that are swallowed at the sync boundary and may be retried
    pub fn is_transient(&self) -> bool {
        !self.is_cancellation() && !self.is_contract_violation()
    }
}
