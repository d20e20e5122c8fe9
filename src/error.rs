//! Error types for the storage layer.
//!
//! Storage and IO failures are fatal to the calling operation and are never
//! retried here.

use thiserror::Error;

/// Error type for archive operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to acquire connection: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid filter: {0}")]
    InvalidFilter(#[from] FilterError),

    #[error("Migration to version {version} failed: {source}")]
    Migration {
        version: u32,
        #[source]
        source: Box<StoreError>,
    },

    #[error("Store is at schema version {found}, newer than supported version {latest}")]
    UnsupportedVersion { found: u32, latest: u32 },

    #[error("Table {table} has {count} row(s) violating its new foreign keys")]
    OrphanedRows { table: &'static str, count: usize },

    #[error("Rebuilding {table} copied {copied} of {original} row(s)")]
    RebuildMismatch {
        table: &'static str,
        original: usize,
        copied: usize,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Storage worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl StoreError {
    /// Whether this error is the result of cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StoreError::Cancelled)
    }
}

/// A filter that cannot be compiled into a predicate.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("time range is empty: after {after} is later than before {before}")]
    EmptyTimeRange { after: i64, before: i64 },

    #[error("table alias {0:?} is not a plain identifier")]
    InvalidAlias(String),
}

/// Turn an interrupted statement into [`StoreError::Cancelled`].
pub(crate) fn map_interrupt(err: rusqlite::Error) -> StoreError {
    match err {
        rusqlite::Error::SqliteFailure(ref e, _)
            if e.code == rusqlite::ErrorCode::OperationInterrupted =>
        {
            StoreError::Cancelled
        }
        other => StoreError::Database(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_maps_to_cancelled() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_INTERRUPT),
            None,
        );
        assert!(map_interrupt(err).is_cancelled());
    }

    #[test]
    fn test_other_errors_stay_database_errors() {
        let err = map_interrupt(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(err, StoreError::Database(_)));
    }
}
