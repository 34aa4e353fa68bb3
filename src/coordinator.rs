//! Collection Coordinator (component C7): wraps every collection
//! mutation in a lock-acquire → load → apply → save → token-rotate →
//! release cycle, per spec §4.7.
//!
//! There is no teacher equivalent of this exact protocol (the teacher
//! persists directly to its own WAL/mmap storage without an external
//! coordination store); this module is grounded on the teacher's
//! `CollectionCore`/`DatabaseCore` split for the "one coordinator owns
//! one collection's critical section" shape, and on
//! `storage/traits.rs`'s retry-on-transient-failure comments for the
//! bounded file-IO retry loop.

use crate::collection_blob::CollectionBlob;
use crate::config::Config;
use crate::coordination_store::CoordinationStore;
use crate::document_engine::{DeletionResult, DocumentEngine, InsertManyResult, MutationResult};
use crate::error::{Result, StoreError};
use crate::file_service::FileService;
use crate::master_index::MasterIndex;
use crate::value::Value;
use crate::{log_debug, log_warn};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Coordinator state machine, spec §4.7. `Failed` surfaces the error to
/// the caller; `Releasing` is still reached from a failed `Locking` step
/// downstream so the lock is never leaked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Locking,
    Loaded,
    Applying,
    Saving,
    Releasing,
    Failed,
}

struct Cache {
    blob: CollectionBlob,
    snapshot_token: String,
}

/// One instance per collection. Owns the in-memory document map
/// exclusively between `load` and `save`; nothing outside a critical
/// section may observe a half-applied mutation.
pub struct CollectionCoordinator<F: FileService, C: CoordinationStore> {
    name: String,
    file_id: String,
    file_service: Arc<F>,
    master_index: Arc<MasterIndex<C>>,
    config: Config,
    state: Mutex<State>,
    cache: Mutex<Option<Cache>>,
}

impl<F: FileService, C: CoordinationStore> CollectionCoordinator<F, C> {
    pub fn new(
        name: String,
        file_id: String,
        file_service: Arc<F>,
        master_index: Arc<MasterIndex<C>>,
        config: Config,
    ) -> Self {
        CollectionCoordinator {
            name,
            file_id,
            file_service,
            master_index,
            config,
            state: Mutex::new(State::Idle),
            cache: Mutex::new(None),
        }
    }

    fn set_state(&self, s: State) {
        *self.state.lock() = s;
    }

    fn read_blob_with_retry(&self) -> Result<CollectionBlob> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.file_service.read(&self.file_id) {
                Ok(bytes) => {
                    let text = String::from_utf8(bytes)
                        .map_err(|e| StoreError::InvalidFileFormat(format!("blob is not UTF-8: {e}")))?;
                    let value = crate::value::deserialise(&text)?;
                    return CollectionBlob::from_value(value);
                }
                Err(e) if attempt < self.config.file_io_max_attempts => {
                    log_warn!("file read attempt {attempt} for {} failed: {e}", self.name);
                    std::thread::sleep(std::time::Duration::from_millis(
                        self.config.file_io_backoff_ms * attempt as u64,
                    ));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn write_blob_with_retry(&self, blob: &CollectionBlob) -> Result<()> {
        let text = crate::value::serialise(&blob.to_value())?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.file_service.write(&self.file_id, text.as_bytes()) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.config.file_io_max_attempts => {
                    log_warn!("file write attempt {attempt} for {} failed: {e}", self.name);
                    std::thread::sleep(std::time::Duration::from_millis(
                        self.config.file_io_backoff_ms * attempt as u64,
                    ));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Load the current blob, reusing the cache unless the Master
    /// Index's token has moved past the cached snapshot (spec §4.7 step
    /// 3: stale-cache detection).
    fn load_current(&self) -> Result<CollectionBlob> {
        let entry = self
            .master_index
            .get_collection(&self.name)?
            .ok_or_else(|| StoreError::MasterIndexError(format!("unknown collection: {}", self.name)))?;

        let mut cache = self.cache.lock();
        if let Some(existing) = cache.as_ref() {
            if existing.snapshot_token == entry.modification_token {
                return Ok(existing.blob.clone());
            }
        }
        let blob = self.read_blob_with_retry()?;
        *cache = Some(Cache { blob: blob.clone(), snapshot_token: entry.modification_token });
        Ok(blob)
    }

    /// Bounded attempts at steps 3-6 before a stale snapshot is treated as
    /// a genuine conflict rather than a retryable race. Spec §4.7 step 3
    /// plus §8 scenario S6: a mismatch first means "reload and reapply";
    /// only a mismatch that persists through a full reload is the "rare"
    /// case §7 calls `ConflictError`.
    const MAX_APPLY_ATTEMPTS: u32 = 2;

    /// Executes the full write protocol for one mutation. `apply` runs
    /// against a `DocumentEngine` built from the freshly loaded blob and
    /// returns the mutation's result alongside the engine to persist. It
    /// takes `&self` rather than `FnOnce` because a stale snapshot (spec
    /// §4.7 step 3) is reapplied against a fresh reload, not failed
    /// outright.
    fn run_write<R>(
        &self,
        apply: impl Fn(&mut DocumentEngine) -> Result<R>,
    ) -> Result<R> {
        let operation_id = Uuid::new_v4().to_string();

        self.set_state(State::Locking);
        let mut acquired = false;
        let deadline = std::time::Instant::now()
            + std::time::Duration::from_millis(self.config.process_mutex_timeout_ms);
        loop {
            if self.master_index.acquire_lock(&self.name, &operation_id)? {
                acquired = true;
                break;
            }
            if std::time::Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        if !acquired {
            self.set_state(State::Failed);
            return Err(StoreError::LockTimeout(format!("could not lock collection {}", self.name)));
        }

        let outcome = (|| {
            let mut conflict = None;
            for attempt in 1..=Self::MAX_APPLY_ATTEMPTS {
                if attempt > 1 {
                    // Discard the cache unconditionally: the whole point of
                    // retrying is that our cached snapshot is known stale.
                    *self.cache.lock() = None;
                }

                self.set_state(State::Loaded);
                let mut blob = self.load_current()?;
                let loaded_token = self
                    .cache
                    .lock()
                    .as_ref()
                    .map(|c| c.snapshot_token.clone())
                    .unwrap_or_default();

                self.set_state(State::Applying);
                let mut engine = DocumentEngine::from_documents(std::mem::take(&mut blob.documents));
                let result = apply(&mut engine)?;
                blob.documents = engine.into_documents();
                blob.metadata.document_count = blob.documents.len() as u64;

                self.set_state(State::Saving);
                // The virtual lock rules out another Coordinator racing
                // us, but a caller invoking `MasterIndex::resolve_conflict`
                // directly (bypassing the virtual lock) can still have
                // rotated the token between our load and here.
                let current_entry = self
                    .master_index
                    .get_collection(&self.name)?
                    .ok_or_else(|| StoreError::MasterIndexError(format!("unknown collection: {}", self.name)))?;
                if current_entry.modification_token != loaded_token {
                    log_warn!(
                        "stale snapshot for {} on attempt {attempt}: expected {loaded_token}, found {}",
                        self.name,
                        current_entry.modification_token
                    );
                    conflict = Some((loaded_token, current_entry.modification_token));
                    continue;
                }

                self.write_blob_with_retry(&blob)?;
                let new_token = self.master_index.generate_token();
                self.master_index.update_collection_metadata(
                    &self.name,
                    blob.metadata.document_count,
                    new_token.clone(),
                )?;
                self.master_index.record_history(&self.name, "write", Value::String(operation_id.clone()))?;

                blob.metadata.last_updated = chrono::Utc::now();
                *self.cache.lock() = Some(Cache { blob, snapshot_token: new_token });

                return Ok(result);
            }

            let (expected, actual) = conflict.expect("loop runs at least once");
            Err(StoreError::ConflictError { expected, actual })
        })();

        self.set_state(State::Releasing);
        let released = self.master_index.release_lock(&self.name, &operation_id);
        self.set_state(if outcome.is_ok() && released.is_ok() { State::Idle } else { State::Failed });
        released?;
        log_debug!("write protocol for {} completed: {}", self.name, outcome.is_ok());
        outcome
    }

    pub fn read_all(&self) -> Result<Vec<crate::document::Document>> {
        let blob = self.load_current()?;
        Ok(blob.documents)
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<crate::document::Document>> {
        let blob = self.load_current()?;
        Ok(blob.documents.into_iter().find(|d| d.id == id))
    }

    pub fn find_by_query(&self, filter: &Value, supported: &HashSet<&'static str>) -> Result<Option<crate::document::Document>> {
        let blob = self.load_current()?;
        let engine = DocumentEngine::from_documents(blob.documents);
        engine.find_by_query(filter, supported)
    }

    pub fn find_many(&self, filter: &Value, supported: &HashSet<&'static str>) -> Result<Vec<crate::document::Document>> {
        let blob = self.load_current()?;
        let engine = DocumentEngine::from_documents(blob.documents);
        engine.find_many(filter, supported)
    }

    pub fn count_by_query(&self, filter: &Value, supported: &HashSet<&'static str>) -> Result<u64> {
        let blob = self.load_current()?;
        let engine = DocumentEngine::from_documents(blob.documents);
        engine.count_by_query(filter, supported)
    }

    pub fn insert(&self, doc: crate::document::Document) -> Result<String> {
        self.run_write(move |engine| engine.insert(doc.clone()))
    }

    pub fn insert_many(&self, docs: Vec<crate::document::Document>) -> Result<InsertManyResult> {
        self.run_write(move |engine| engine.insert_many(docs.clone()))
    }

    pub fn update_by_id(
        &self,
        id: &str,
        upd: &Value,
        supported: &HashSet<&'static str>,
    ) -> Result<MutationResult> {
        self.run_write(|engine| engine.update_by_id(id, upd, supported))
    }

    pub fn update_by_query(
        &self,
        filter: &Value,
        upd: &Value,
        query_ops: &HashSet<&'static str>,
        update_ops: &HashSet<&'static str>,
    ) -> Result<MutationResult> {
        self.run_write(|engine| engine.update_by_query(filter, upd, query_ops, update_ops))
    }

    pub fn update_many(
        &self,
        filter: &Value,
        upd: &Value,
        query_ops: &HashSet<&'static str>,
        update_ops: &HashSet<&'static str>,
    ) -> Result<MutationResult> {
        self.run_write(|engine| engine.update_many(filter, upd, query_ops, update_ops))
    }

    pub fn replace_by_id(&self, id: &str, replacement: Value) -> Result<MutationResult> {
        self.run_write(move |engine| engine.replace_by_id(id, replacement.clone()))
    }

    pub fn replace_by_query(
        &self,
        filter: &Value,
        replacement: Value,
        supported: &HashSet<&'static str>,
    ) -> Result<MutationResult> {
        self.run_write(move |engine| engine.replace_by_query(filter, replacement.clone(), supported))
    }

    pub fn delete_by_id(&self, id: &str) -> Result<DeletionResult> {
        self.run_write(|engine| engine.delete_by_id(id))
    }

    pub fn delete_by_query(&self, filter: &Value, supported: &HashSet<&'static str>) -> Result<DeletionResult> {
        self.run_write(|engine| engine.delete_by_query(filter, supported))
    }

    pub fn delete_many(&self, filter: &Value, supported: &HashSet<&'static str>) -> Result<DeletionResult> {
        self.run_write(|engine| engine.delete_many(filter, supported))
    }
}
