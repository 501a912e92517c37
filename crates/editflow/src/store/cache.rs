//! Short-TTL status snapshot cache in front of the durable store.

use std::time::{Duration, Instant};

use moka::ops::compute::{CompResult, Op};
use moka::sync::Cache;
use moka::Expiry;
use thiserror::Error;

use crate::edit::StatusSnapshot;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Status cache unavailable: {0}")]
    Unavailable(String),
}

/// Best-effort snapshot cache. Callers treat every error as a miss.
pub trait StatusCache: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<StatusSnapshot>, CacheError>;

    /// Stores `snapshot` unless the cached entry is newer. A poller filling
    /// the cache from a read that raced a worker's write must not roll the
    /// entry back.
    fn put(&self, id: &str, snapshot: StatusSnapshot, ttl: Duration) -> Result<(), CacheError>;
    fn invalidate(&self, id: &str) -> Result<(), CacheError>;
}

#[derive(Clone)]
struct Entry {
    snapshot: StatusSnapshot,
    ttl: Duration,
}

/// Expires each entry after the TTL it was written with.
struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process cache backed by `moka`.
#[derive(Clone)]
pub struct MokaStatusCache {
    inner: Cache<String, Entry>,
}

impl MokaStatusCache {
    pub fn new(max_entries: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_entries)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }
}

impl StatusCache for MokaStatusCache {
    fn get(&self, id: &str) -> Result<Option<StatusSnapshot>, CacheError> {
        Ok(self.inner.get(id).map(|entry| entry.snapshot))
    }

    fn put(&self, id: &str, snapshot: StatusSnapshot, ttl: Duration) -> Result<(), CacheError> {
        let result = self
            .inner
            .entry(id.to_string())
            .and_compute_with(|current| match current {
                Some(cached) if cached.value().snapshot.is_newer_than(&snapshot) => Op::Nop,
                _ => Op::Put(Entry { snapshot, ttl }),
            });
        if let CompResult::Unchanged(_) = result {
            log::trace!("Kept newer cached snapshot for {}", id);
        }
        Ok(())
    }

    fn invalidate(&self, id: &str) -> Result<(), CacheError> {
        self.inner.invalidate(id);
        Ok(())
    }
}

/// Cache that never holds anything. Every poll reads the store.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStatusCache;

impl StatusCache for NoopStatusCache {
    fn get(&self, _id: &str) -> Result<Option<StatusSnapshot>, CacheError> {
        Ok(None)
    }

    fn put(&self, _id: &str, _snapshot: StatusSnapshot, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }

    fn invalidate(&self, _id: &str) -> Result<(), CacheError> {
        Ok(())
    }
}
