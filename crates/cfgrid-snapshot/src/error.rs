//! Error types for snapshots and version sources.

use thiserror::Error;

pub type SnapshotResult<T> = Result<T, SnapshotError>;

pub type SourceResult<T> = Result<T, SourceError>;

/// Errors on the read path.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("no configuration loaded yet")]
    NotLoaded,
}

/// Errors while obtaining a new snapshot.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("clone failed: {0}")]
    Clone(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("checkout failed: {0}")]
    Checkout(String),

    #[error("invalid bundle: {0}")]
    Bundle(String),

    #[error("no repository configured")]
    NotConfigured,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
