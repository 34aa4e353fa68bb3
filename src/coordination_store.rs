//! Coordination store (spec §6, consumed external interface): a shared
//! key-value property store with an atomic process-wide mutex. The Master
//! Index is a typed view over a single property in this store.

use crate::error::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Opaque handle returned by `try_acquire_process_mutex`; callers pass it
/// back unchanged to `release_process_mutex`.
pub struct MutexHandle(());

pub trait CoordinationStore: Send + Sync {
    fn get_property(&self, key: &str) -> Result<Option<String>>;
    fn set_property(&self, key: &str, value: &str) -> Result<()>;
    fn delete_property(&self, key: &str) -> Result<()>;
    fn try_acquire_process_mutex(&self, timeout_ms: u64) -> Result<Option<MutexHandle>>;
    fn release_process_mutex(&self, handle: MutexHandle) -> Result<()>;
}

/// In-memory `CoordinationStore` for tests and single-process embedding.
/// The process-wide mutex is a real `parking_lot::Mutex<()>` guard whose
/// ownership is represented by the opaque `MutexHandle`.
pub struct InMemoryCoordinationStore {
    properties: Mutex<HashMap<String, String>>,
    locked: AtomicBool,
}

impl InMemoryCoordinationStore {
    pub fn new() -> Self {
        InMemoryCoordinationStore { properties: Mutex::new(HashMap::new()), locked: AtomicBool::new(false) }
    }
}

impl Default for InMemoryCoordinationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordinationStore for InMemoryCoordinationStore {
    fn get_property(&self, key: &str) -> Result<Option<String>> {
        Ok(self.properties.lock().get(key).cloned())
    }

    fn set_property(&self, key: &str, value: &str) -> Result<()> {
        self.properties.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete_property(&self, key: &str) -> Result<()> {
        self.properties.lock().remove(key);
        Ok(())
    }

    fn try_acquire_process_mutex(&self, timeout_ms: u64) -> Result<Option<MutexHandle>> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if self
                .locked
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(Some(MutexHandle(())));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::yield_now();
        }
    }

    fn release_process_mutex(&self, handle: MutexHandle) -> Result<()> {
        let MutexHandle(()) = handle;
        self.locked.store(false, Ordering::Release);
        Ok(())
    }
}
