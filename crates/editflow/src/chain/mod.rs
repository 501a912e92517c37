//! Follow-up edits: chain positions at submission and root-first histories.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use thiserror::Error;

use crate::edit::{ChainEntry, Edit};
use crate::error::ValidationError;
use crate::store::{EditStore, StoreError};

const HISTORY_CACHE_CAPACITY: u64 = 1_000;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Edit not found: {0}")]
    NotFound(String),

    #[error("Corrupt chain ending at '{leaf}': {reason}")]
    Corrupt { leaf: String, reason: String },

    #[error("State store error: {0}")]
    Store(#[from] StoreError),
}

pub struct ChainManager {
    store: EditStore,
    max_length: u32,
    history_cache: Option<Cache<String, Arc<Vec<ChainEntry>>>>,
}

impl ChainManager {
    /// `history_ttl` of zero disables the history cache.
    pub fn new(store: EditStore, max_length: u32, history_ttl: Duration) -> Self {
        let history_cache = (!history_ttl.is_zero()).then(|| {
            Cache::builder()
                .max_capacity(HISTORY_CACHE_CAPACITY)
                .time_to_live(history_ttl)
                .build()
        });
        Self {
            store,
            max_length,
            history_cache,
        }
    }

    /// Places `edit` in the chain of `parent_id` and returns the parent.
    ///
    /// Without a parent the edit becomes a chain root at position 1. Nothing
    /// is written; a rejected edit leaves no trace.
    pub fn attach(&self, edit: &mut Edit, parent_id: Option<&str>) -> Result<Option<Edit>, ChainError> {
        let Some(parent_id) = parent_id else {
            edit.parent_id = None;
            edit.chain_position = 1;
            return Ok(None);
        };

        let parent = self
            .store
            .find(parent_id)?
            .ok_or_else(|| ValidationError::ParentNotFound(parent_id.to_string()))?;

        let position = parent.chain_position.saturating_add(1);
        if position > self.max_length {
            log::info!(
                "Rejected follow-up of {}: position {} exceeds chain limit {}",
                parent_id,
                position,
                self.max_length
            );
            return Err(ValidationError::ChainTooLong {
                position,
                max: self.max_length,
            }
            .into());
        }

        edit.parent_id = Some(parent.id.clone());
        edit.chain_position = position;
        Ok(Some(parent))
    }

    /// The chain ending at `leaf_id`, root first.
    pub fn history(&self, leaf_id: &str) -> Result<Vec<ChainEntry>, ChainError> {
        if let Some(cache) = &self.history_cache {
            if let Some(history) = cache.get(leaf_id) {
                return Ok(history.as_ref().clone());
            }
        }

        let history = self.walk(leaf_id)?;
        if let Some(cache) = &self.history_cache {
            cache.insert(leaf_id.to_string(), Arc::new(history.clone()));
        }
        Ok(history)
    }

    fn walk(&self, leaf_id: &str) -> Result<Vec<ChainEntry>, ChainError> {
        let corrupt = |reason: String| ChainError::Corrupt {
            leaf: leaf_id.to_string(),
            reason,
        };

        let mut chain = Vec::new();
        let mut next = Some(leaf_id.to_string());
        while let Some(id) = next {
            if chain.len() >= self.max_length as usize {
                return Err(corrupt(format!("longer than {} links", self.max_length)));
            }
            let edit = self
                .store
                .find(&id)?
                .ok_or_else(|| ChainError::NotFound(id.clone()))?;

            next = match &edit.parent_id {
                None => None,
                Some(parent_id) => match self.store.parent_link(&edit.id)? {
                    Some(linked) if linked == *parent_id => Some(linked),
                    Some(linked) => {
                        return Err(corrupt(format!(
                            "edit {} names parent {} but is linked to {}",
                            edit.id, parent_id, linked
                        )))
                    }
                    None => {
                        return Err(ChainError::NotFound(format!("chain link of {}", edit.id)))
                    }
                },
            };
            chain.push(ChainEntry::from(&edit));
        }

        chain.reverse();
        for (idx, entry) in chain.iter().enumerate() {
            if entry.chain_position as usize != idx + 1 {
                return Err(corrupt(format!(
                    "edit {} sits at position {} but is link {}",
                    entry.id,
                    entry.chain_position,
                    idx + 1
                )));
            }
        }
        Ok(chain)
    }
}
