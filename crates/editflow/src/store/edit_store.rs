//! The source of truth for edit records.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;

use crate::db::chain_repo::{self, ChainLinkRow};
use crate::db::{edit_repo, Database};
use crate::edit::{Edit, EditStatus, FailureReason, ProcessingStage, StatusSnapshot};
use crate::retry::RetryPolicy;

use super::cache::StatusCache;
use super::rows::{format_timestamp, from_row, to_row};
use super::StoreError;

/// A stage write, optionally carrying the durable outputs of the stage that
/// just finished.
#[derive(Debug, Clone)]
pub struct StageUpdate {
    pub stage: ProcessingStage,
    pub message: String,
    pub enhanced_prompt: Option<String>,
    pub result_image_ref: Option<String>,
}

impl StageUpdate {
    pub fn new(stage: ProcessingStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            enhanced_prompt: None,
            result_image_ref: None,
        }
    }

    pub fn with_enhanced_prompt(mut self, prompt: Option<String>) -> Self {
        self.enhanced_prompt = prompt;
        self
    }

    pub fn with_result_image_ref(mut self, reference: Option<String>) -> Self {
        self.result_image_ref = reference;
        self
    }
}

/// Durable edit records plus the status cache kept in step with them.
///
/// Every write is an atomic read-check-update of one row. Stage regressions
/// and writes to terminal records are rejected. After each successful write
/// the matching snapshot is pushed into the cache.
#[derive(Clone)]
pub struct EditStore {
    db: Database,
    cache: Arc<dyn StatusCache>,
    status_ttl: Duration,
    infra_retry: RetryPolicy,
}

impl EditStore {
    pub fn new(db: Database, cache: Arc<dyn StatusCache>, status_ttl: Duration) -> Self {
        Self {
            db,
            cache,
            status_ttl,
            infra_retry: RetryPolicy::default(),
        }
    }

    /// Overrides the retry policy for busy/locked database errors.
    pub fn with_infra_retry(mut self, policy: RetryPolicy) -> Self {
        self.infra_retry = policy;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Persists a new edit and, when it has a parent, its chain link.
    pub fn create(&self, edit: &Edit) -> Result<(), StoreError> {
        self.retry_infra("create", || {
            let row = to_row(edit);
            let result = self.db.transaction(|tx| {
                edit_repo::insert(tx, &row)?;
                if let Some(parent_id) = &edit.parent_id {
                    chain_repo::insert(
                        tx,
                        &ChainLinkRow {
                            edit_id: edit.id.clone(),
                            parent_id: parent_id.clone(),
                            chain_position: edit.chain_position,
                            created_at: row.created_at.clone(),
                        },
                    )?;
                }
                Ok(())
            });
            match result {
                Ok(()) => Ok(()),
                Err(e) if e.is_constraint_violation() => {
                    Err(StoreError::AlreadyExists(edit.id.clone()))
                }
                Err(e) => Err(e.into()),
            }
        })?;

        log::debug!("Created edit {} at chain position {}", edit.id, edit.chain_position);
        self.refresh_cache(edit);
        Ok(())
    }

    pub fn find(&self, id: &str) -> Result<Option<Edit>, StoreError> {
        let row = self.retry_infra("find", || {
            self.db
                .with_conn(|conn| edit_repo::find_by_id(conn, id))
                .map_err(StoreError::from)
        })?;
        row.map(from_row).transpose()
    }

    pub fn get(&self, id: &str) -> Result<Edit, StoreError> {
        self.find(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Parent id recorded in the chain link of `id`, if it has one.
    pub fn parent_link(&self, id: &str) -> Result<Option<String>, StoreError> {
        let link = self.retry_infra("parent_link", || {
            self.db
                .with_conn(|conn| chain_repo::find_by_edit_id(conn, id))
                .map_err(StoreError::from)
        })?;
        Ok(link.map(|l| l.parent_id))
    }

    /// Poll path: cache hit, or read through the store and repopulate.
    pub fn snapshot(&self, id: &str) -> Result<StatusSnapshot, StoreError> {
        match self.cache.get(id) {
            Ok(Some(snapshot)) => return Ok(snapshot),
            Ok(None) => {}
            Err(e) => log::warn!("Status cache read failed for {}: {}", id, e),
        }

        let edit = self.get(id)?;
        let snapshot = StatusSnapshot::from_edit(&edit);
        if let Err(e) = self.cache.put(id, snapshot.clone(), self.status_ttl) {
            log::warn!("Status cache write failed for {}: {}", id, e);
        }
        Ok(snapshot)
    }

    /// Moves an edit to `update.stage`, recording any stage outputs.
    ///
    /// Re-entering the current stage is allowed (retries). Moving to
    /// `Completed` also completes the edit. `Failed` is only reachable through
    /// [`EditStore::update_status`].
    pub fn update_stage(&self, id: &str, update: StageUpdate) -> Result<Edit, StoreError> {
        let stage = update.stage;
        self.mutate(id, |edit| {
            if stage == ProcessingStage::Failed || !edit.processing_stage.can_advance_to(stage) {
                return Err(StoreError::InvalidTransition {
                    id: edit.id.clone(),
                    from: edit.processing_stage,
                    to: stage,
                });
            }

            edit.processing_stage = stage;
            edit.status = match stage {
                ProcessingStage::Pending => EditStatus::Pending,
                ProcessingStage::Completed => EditStatus::Completed,
                _ => EditStatus::Processing,
            };
            if let Some(prompt) = update.enhanced_prompt.clone() {
                edit.enhanced_prompt = Some(prompt);
            }
            if let Some(reference) = update.result_image_ref.clone() {
                edit.result_image_ref = Some(reference);
            }
            edit.message = Some(update.message.clone());
            Ok(())
        })
    }

    /// Sets the lifecycle status. `Failed` records `reason` and moves the
    /// stage to `failed`; `Completed` moves the stage to `completed`.
    pub fn update_status(
        &self,
        id: &str,
        status: EditStatus,
        reason: Option<&FailureReason>,
        message: &str,
    ) -> Result<Edit, StoreError> {
        self.mutate(id, |edit| {
            let target = match status {
                EditStatus::Pending => ProcessingStage::Pending,
                EditStatus::Processing => edit.processing_stage,
                EditStatus::Completed => ProcessingStage::Completed,
                EditStatus::Failed => ProcessingStage::Failed,
            };
            if !edit.processing_stage.can_advance_to(target) {
                return Err(StoreError::InvalidTransition {
                    id: edit.id.clone(),
                    from: edit.processing_stage,
                    to: target,
                });
            }

            edit.status = status;
            edit.processing_stage = target;
            if status == EditStatus::Failed {
                edit.failure_reason = reason.cloned();
            }
            edit.message = Some(message.to_string());
            Ok(())
        })
    }

    /// Counts edits in the given status.
    pub fn count(&self, status: EditStatus) -> Result<u64, StoreError> {
        self.retry_infra("count", || {
            self.db
                .with_conn(|conn| edit_repo::count_by_status(conn, status.as_str()))
                .map_err(StoreError::from)
        })
    }

    /// Atomic read-check-update of one edit followed by a cache refresh.
    fn mutate<F>(&self, id: &str, apply: F) -> Result<Edit, StoreError>
    where
        F: Fn(&mut Edit) -> Result<(), StoreError>,
    {
        let edit = self.retry_infra("update", || {
            let mut rejection = None;
            let outcome = self.db.transaction(|tx| {
                let Some(row) = edit_repo::find_by_id(tx, id)? else {
                    rejection = Some(StoreError::NotFound(id.to_string()));
                    return Ok(None);
                };
                let mut edit = match from_row(row) {
                    Ok(edit) => edit,
                    Err(e) => {
                        rejection = Some(e);
                        return Ok(None);
                    }
                };
                if edit.is_terminal() {
                    rejection = Some(StoreError::Terminal {
                        id: edit.id.clone(),
                        status: edit.status,
                    });
                    return Ok(None);
                }
                if let Err(e) = apply(&mut edit) {
                    rejection = Some(e);
                    return Ok(None);
                }
                edit.updated_at = Utc::now();
                edit_repo::update(tx, &to_row(&edit))?;
                Ok(Some(edit))
            })?;
            match (outcome, rejection) {
                (Some(edit), _) => Ok(edit),
                (None, Some(rejection)) => Err(rejection),
                (None, None) => Err(StoreError::NotFound(id.to_string())),
            }
        })?;

        log::debug!(
            "Edit {} now {} at {} (updated {})",
            edit.id,
            edit.status,
            edit.processing_stage,
            format_timestamp(edit.updated_at)
        );
        self.refresh_cache(&edit);
        Ok(edit)
    }

    fn refresh_cache(&self, edit: &Edit) {
        let snapshot = StatusSnapshot::from_edit(edit);
        if let Err(e) = self.cache.put(&edit.id, snapshot, self.status_ttl) {
            log::warn!("Status cache write failed for {}: {}", edit.id, e);
            if let Err(e) = self.cache.invalidate(&edit.id) {
                log::warn!("Status cache invalidate failed for {}: {}", edit.id, e);
            }
        }
    }

    fn retry_infra<T, F>(&self, operation: &str, mut f: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Result<T, StoreError>,
    {
        let mut retry = 0;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && retry < self.infra_retry.max_retries => {
                    retry += 1;
                    let delay = self.infra_retry.delay_for(retry);
                    log::warn!(
                        "Store {} failed ({}), retry {}/{} in {:?}",
                        operation,
                        e,
                        retry,
                        self.infra_retry.max_retries,
                        delay
                    );
                    thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use crate::db::DatabaseError;
    use crate::error::ErrorKind;
    use crate::store::cache::{CacheError, MokaStatusCache};

    fn test_store() -> EditStore {
        let db = Database::open_in_memory().expect("Failed to create test database");
        EditStore::new(
            db,
            Arc::new(MokaStatusCache::new(100)),
            Duration::from_secs(30),
        )
    }

    fn created(store: &EditStore) -> Edit {
        let edit = Edit::new("add a rainbow", "mem://originals/x.png");
        store.create(&edit).unwrap();
        edit
    }

    #[test]
    fn test_create_and_get() {
        let store = test_store();
        let edit = created(&store);
        assert_eq!(store.get(&edit.id).unwrap(), edit);
    }

    #[test]
    fn test_create_duplicate_id_fails() {
        let store = test_store();
        let edit = created(&store);
        assert!(matches!(
            store.create(&edit),
            Err(StoreError::AlreadyExists(id)) if id == edit.id
        ));
    }

    #[test]
    fn test_get_unknown_is_not_found() {
        let store = test_store();
        assert!(matches!(store.get("nope"), Err(StoreError::NotFound(_))));
        assert!(matches!(store.snapshot("nope"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_create_writes_chain_link() {
        let store = test_store();
        let parent = created(&store);
        let mut child = Edit::new("now add birds", "mem://originals/y.png");
        child.parent_id = Some(parent.id.clone());
        child.chain_position = 2;
        store.create(&child).unwrap();

        assert_eq!(store.parent_link(&child.id).unwrap(), Some(parent.id.clone()));
        assert_eq!(store.parent_link(&parent.id).unwrap(), None);
    }

    #[test]
    fn test_stage_advances_and_records_outputs() {
        let store = test_store();
        let edit = created(&store);

        let updated = store
            .update_stage(
                &edit.id,
                StageUpdate::new(ProcessingStage::FetchingImage, "Prompt enhanced")
                    .with_enhanced_prompt(Some("Add a vivid double rainbow".to_string())),
            )
            .unwrap();
        assert_eq!(updated.status, EditStatus::Processing);
        assert_eq!(updated.processing_stage, ProcessingStage::FetchingImage);
        assert_eq!(
            updated.enhanced_prompt.as_deref(),
            Some("Add a vivid double rainbow")
        );
        assert_eq!(updated.message.as_deref(), Some("Prompt enhanced"));
        assert!(updated.updated_at >= edit.updated_at);
    }

    #[test]
    fn test_same_stage_rewrite_is_allowed() {
        let store = test_store();
        let edit = created(&store);
        store
            .update_stage(&edit.id, StageUpdate::new(ProcessingStage::FetchingImage, "attempt 1"))
            .unwrap();
        let again = store
            .update_stage(&edit.id, StageUpdate::new(ProcessingStage::FetchingImage, "attempt 2"))
            .unwrap();
        assert_eq!(again.message.as_deref(), Some("attempt 2"));
    }

    #[test]
    fn test_stage_regression_is_rejected() {
        let store = test_store();
        let edit = created(&store);
        store
            .update_stage(&edit.id, StageUpdate::new(ProcessingStage::AiProcessing, "generating"))
            .unwrap();

        let err = store
            .update_stage(&edit.id, StageUpdate::new(ProcessingStage::FetchingImage, "back"))
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                from: ProcessingStage::AiProcessing,
                to: ProcessingStage::FetchingImage,
                ..
            }
        ));
        assert_eq!(
            store.get(&edit.id).unwrap().processing_stage,
            ProcessingStage::AiProcessing
        );
    }

    #[test]
    fn test_failed_stage_requires_update_status() {
        let store = test_store();
        let edit = created(&store);
        assert!(store
            .update_stage(&edit.id, StageUpdate::new(ProcessingStage::Failed, "x"))
            .is_err());
    }

    #[test]
    fn test_terminal_records_are_immutable() {
        let store = test_store();
        let edit = created(&store);
        let reason = FailureReason::new(ProcessingStage::AiProcessing, ErrorKind::Permanent, "nope");
        let failed = store
            .update_status(&edit.id, EditStatus::Failed, Some(&reason), "failed")
            .unwrap();
        assert_eq!(failed.processing_stage, ProcessingStage::Failed);
        assert_eq!(failed.failure_reason, Some(reason));

        assert!(matches!(
            store.update_stage(&edit.id, StageUpdate::new(ProcessingStage::Completed, "done")),
            Err(StoreError::Terminal { status: EditStatus::Failed, .. })
        ));
        assert!(matches!(
            store.update_status(&edit.id, EditStatus::Completed, None, "done"),
            Err(StoreError::Terminal { .. })
        ));
        assert_eq!(store.get(&edit.id).unwrap(), failed);
    }

    #[test]
    fn test_completing_through_stage_write() {
        let store = test_store();
        let edit = created(&store);
        let done = store
            .update_stage(
                &edit.id,
                StageUpdate::new(ProcessingStage::Completed, "done")
                    .with_result_image_ref(Some("mem://results/edited-1.png".to_string())),
            )
            .unwrap();
        assert_eq!(done.status, EditStatus::Completed);
        assert_eq!(done.result_image_ref.as_deref(), Some("mem://results/edited-1.png"));
    }

    #[test]
    fn test_writes_refresh_cached_snapshot() {
        let store = test_store();
        let edit = created(&store);
        assert_eq!(store.snapshot(&edit.id).unwrap().progress_percent, 10);

        store
            .update_stage(&edit.id, StageUpdate::new(ProcessingStage::AiProcessing, "generating"))
            .unwrap();
        let snap = store.snapshot(&edit.id).unwrap();
        assert_eq!(snap.processing_stage, ProcessingStage::AiProcessing);
        assert_eq!(snap.progress_percent, 60);
    }

    #[test]
    fn test_count_by_status() {
        let store = test_store();
        created(&store);
        let second = created(&store);
        store
            .update_stage(&second.id, StageUpdate::new(ProcessingStage::EnhancingPrompt, "go"))
            .unwrap();
        assert_eq!(store.count(EditStatus::Pending).unwrap(), 1);
        assert_eq!(store.count(EditStatus::Processing).unwrap(), 1);
    }

    fn busy() -> StoreError {
        StoreError::Database(DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        )))
    }

    #[test]
    fn test_busy_database_is_retried() {
        let store = test_store().with_infra_retry(RetryPolicy::fixed(3, Duration::from_millis(1)));
        let calls = Cell::new(0);

        let value = store
            .retry_infra("test", || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(busy())
                } else {
                    Ok(7)
                }
            })
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_busy_database_gives_up_after_retries() {
        let store = test_store().with_infra_retry(RetryPolicy::fixed(2, Duration::from_millis(1)));
        let calls = Cell::new(0);

        let result: Result<(), StoreError> = store.retry_infra("test", || {
            calls.set(calls.get() + 1);
            Err(busy())
        });

        assert!(result.unwrap_err().is_infrastructure());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_rejections_are_not_retried() {
        let store = test_store().with_infra_retry(RetryPolicy::fixed(5, Duration::from_millis(1)));
        let calls = Cell::new(0);

        let result: Result<(), StoreError> = store.retry_infra("test", || {
            calls.set(calls.get() + 1);
            Err(StoreError::NotFound("x".to_string()))
        });

        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_locked_database_file_is_waited_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edits.db");
        let store = EditStore::new(
            Database::open(&path).unwrap(),
            Arc::new(MokaStatusCache::new(100)),
            Duration::from_secs(30),
        );
        let edit = created(&store);

        // Another process holds the write lock for a moment.
        let other = rusqlite::Connection::open(&path).unwrap();
        other.execute_batch("BEGIN IMMEDIATE").unwrap();
        let holder = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            other.execute_batch("COMMIT").unwrap();
        });

        let updated = store
            .update_stage(&edit.id, StageUpdate::new(ProcessingStage::EnhancingPrompt, "go"))
            .unwrap();
        holder.join().unwrap();
        assert_eq!(updated.processing_stage, ProcessingStage::EnhancingPrompt);
    }

    /// A cache that is always down.
    struct UnavailableCache;

    impl StatusCache for UnavailableCache {
        fn get(&self, _id: &str) -> Result<Option<StatusSnapshot>, CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }

        fn put(&self, _id: &str, _snapshot: StatusSnapshot, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }

        fn invalidate(&self, _id: &str) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }
    }

    #[test]
    fn test_cache_outage_falls_back_to_store() {
        let store = EditStore::new(
            Database::open_in_memory().unwrap(),
            Arc::new(UnavailableCache),
            Duration::from_secs(30),
        );
        let edit = created(&store);
        store
            .update_stage(&edit.id, StageUpdate::new(ProcessingStage::FetchingImage, "go"))
            .unwrap();

        let snapshot = store.snapshot(&edit.id).unwrap();
        assert_eq!(snapshot.processing_stage, ProcessingStage::FetchingImage);
        assert_eq!(snapshot, StatusSnapshot::from_edit(&store.get(&edit.id).unwrap()));
    }
}
