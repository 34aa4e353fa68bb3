//! File service (spec §6, consumed external interface): create/read/write/
//! delete/exists/metadata on a named blob in a shared object store.
//!
//! Grounded on the teacher's `storage::traits::Storage` trait — same
//! abstraction shape (a trait boundary in front of a storage backend with
//! an in-memory test double alongside the real thing), narrowed to the
//! spec's strictly simpler blob contract since persistence itself is an
//! external collaborator here, not this crate's concern.

use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub id: String,
    pub name: String,
    pub modified_time: DateTime<Utc>,
}

/// Consumed interface: a shared blob store. Implementations may fail any
/// operation with `StoreError::FileIo` for QuotaExceeded/PermissionDenied/
/// FileNotFound/transient errors; the Coordinator is responsible for
/// bounded retry with backoff on transient failures.
pub trait FileService: Send + Sync {
    fn create(&self, name: &str, payload: &[u8], parent_id: Option<&str>) -> Result<String>;
    fn read(&self, file_id: &str) -> Result<Vec<u8>>;
    fn write(&self, file_id: &str, payload: &[u8]) -> Result<()>;
    fn delete(&self, file_id: &str) -> Result<()>;
    fn exists(&self, file_id: &str) -> Result<bool>;
    fn metadata(&self, file_id: &str) -> Result<FileMetadata>;
}

struct StoredFile {
    name: String,
    payload: Vec<u8>,
    modified_time: DateTime<Utc>,
}

/// In-memory `FileService` for tests and for embedding without a real
/// blob store wired up. Grounded on the teacher's `MemoryStorage`.
pub struct InMemoryFileService {
    files: Mutex<HashMap<String, StoredFile>>,
    next_id: Mutex<u64>,
}

impl InMemoryFileService {
    pub fn new() -> Self {
        InMemoryFileService { files: Mutex::new(HashMap::new()), next_id: Mutex::new(1) }
    }
}

impl Default for InMemoryFileService {
    fn default() -> Self {
        Self::new()
    }
}

impl FileService for InMemoryFileService {
    fn create(&self, name: &str, payload: &[u8], _parent_id: Option<&str>) -> Result<String> {
        let mut next_id = self.next_id.lock();
        let id = format!("file-{}", *next_id);
        *next_id += 1;
        self.files.lock().insert(
            id.clone(),
            StoredFile { name: name.to_string(), payload: payload.to_vec(), modified_time: Utc::now() },
        );
        Ok(id)
    }

    fn read(&self, file_id: &str) -> Result<Vec<u8>> {
        self.files
            .lock()
            .get(file_id)
            .map(|f| f.payload.clone())
            .ok_or_else(|| StoreError::FileIo(format!("file not found: {file_id}")))
    }

    fn write(&self, file_id: &str, payload: &[u8]) -> Result<()> {
        let mut files = self.files.lock();
        let entry = files
            .get_mut(file_id)
            .ok_or_else(|| StoreError::FileIo(format!("file not found: {file_id}")))?;
        entry.payload = payload.to_vec();
        entry.modified_time = Utc::now();
        Ok(())
    }

    fn delete(&self, file_id: &str) -> Result<()> {
        self.files
            .lock()
            .remove(file_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::FileIo(format!("file not found: {file_id}")))
    }

    fn exists(&self, file_id: &str) -> Result<bool> {
        Ok(self.files.lock().contains_key(file_id))
    }

    fn metadata(&self, file_id: &str) -> Result<FileMetadata> {
        self.files
            .lock()
            .get(file_id)
            .map(|f| FileMetadata { id: file_id.to_string(), name: f.name.clone(), modified_time: f.modified_time })
            .ok_or_else(|| StoreError::FileIo(format!("file not found: {file_id}")))
    }
}
