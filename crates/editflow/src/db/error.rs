//! Database error types.

use std::path::PathBuf;

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors from database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,
}

impl DatabaseError {
    /// Busy/locked errors clear up on their own; everything else does not.
    pub fn is_transient(&self) -> bool {
        match self {
            DatabaseError::Sqlite(e) => matches!(
                e.sqlite_error_code(),
                Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
            ),
            DatabaseError::Io { .. } => true,
            DatabaseError::Migration { .. } | DatabaseError::LockPoisoned => false,
        }
    }

    /// A UNIQUE or PRIMARY KEY constraint rejected the write.
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            DatabaseError::Sqlite(e) => {
                matches!(e.sqlite_error_code(), Some(ErrorCode::ConstraintViolation))
            }
            _ => false,
        }
    }
}
