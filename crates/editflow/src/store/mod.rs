//! Durable edit state with a write-through status cache.

use thiserror::Error;

use crate::db::DatabaseError;
use crate::edit::{EditStatus, ProcessingStage};

pub mod cache;
mod edit_store;
mod rows;

pub use cache::{CacheError, MokaStatusCache, NoopStatusCache, StatusCache};
pub use edit_store::{EditStore, StageUpdate};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database unavailable: {0}")]
    Database(#[from] DatabaseError),

    #[error("Edit not found: {0}")]
    NotFound(String),

    #[error("Edit '{0}' already exists")]
    AlreadyExists(String),

    #[error("Edit '{id}' cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: ProcessingStage,
        to: ProcessingStage,
    },

    #[error("Edit '{id}' is already {status} and can no longer change")]
    Terminal { id: String, status: EditStatus },

    #[error("Edit '{id}' has an unreadable {field}: '{value}'")]
    Corrupt {
        id: String,
        field: &'static str,
        value: String,
    },
}

impl StoreError {
    /// The store itself is unreachable, as opposed to rejecting the request.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, StoreError::Database(_))
    }

    /// Worth retrying at the infrastructure level.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(e) => e.is_transient(),
            _ => false,
        }
    }
}
