//! Master Index (component C6): a typed view over a single property in
//! the coordination store — collection registry, virtual locks,
//! modification tokens, bounded modification history.
//!
//! Every operation takes the process-wide mutex (the "script-level
//! lock") around the coordination-store property per spec §5; mutating
//! operations reload-mutate-store, read-only operations reload-and-
//! inspect without writing back.

use crate::config::Config;
use crate::coordination_store::CoordinationStore;
use crate::error::{Result, StoreError};
use crate::token;
use crate::value::Value;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct LockInfo {
    pub locked_by: String,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CollectionEntry {
    pub name: String,
    pub file_id: String,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub document_count: u64,
    pub modification_token: String,
    pub lock_status: Option<LockInfo>,
}

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub operation: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

#[derive(Debug, Clone)]
pub struct MasterIndexData {
    pub version: u32,
    pub last_updated: DateTime<Utc>,
    pub collections: HashMap<String, CollectionEntry>,
    pub locks: HashMap<String, LockInfo>,
    pub modification_history: HashMap<String, Vec<HistoryEntry>>,
}

impl MasterIndexData {
    fn new(version: u32, now: DateTime<Utc>) -> Self {
        MasterIndexData {
            version,
            last_updated: now,
            collections: HashMap::new(),
            locks: HashMap::new(),
            modification_history: HashMap::new(),
        }
    }

    fn to_value(&self) -> Value {
        let mut root = HashMap::new();
        root.insert("version".to_string(), Value::Number(self.version as f64));
        root.insert("lastUpdated".to_string(), Value::Date(self.last_updated));

        let mut collections = HashMap::new();
        for (name, entry) in &self.collections {
            let mut c = HashMap::new();
            c.insert("name".to_string(), Value::String(entry.name.clone()));
            c.insert("fileId".to_string(), Value::String(entry.file_id.clone()));
            c.insert("created".to_string(), Value::Date(entry.created));
            c.insert("lastUpdated".to_string(), Value::Date(entry.last_updated));
            c.insert("documentCount".to_string(), Value::Number(entry.document_count as f64));
            c.insert("modificationToken".to_string(), Value::String(entry.modification_token.clone()));
            c.insert(
                "lockStatus".to_string(),
                entry.lock_status.as_ref().map(lock_to_value).unwrap_or(Value::Null),
            );
            collections.insert(name.clone(), Value::Object(c));
        }
        root.insert("collections".to_string(), Value::Object(collections));

        let mut locks = HashMap::new();
        for (name, lock) in &self.locks {
            locks.insert(name.clone(), lock_to_value(lock));
        }
        root.insert("locks".to_string(), Value::Object(locks));

        let mut history = HashMap::new();
        for (name, entries) in &self.modification_history {
            let arr = entries
                .iter()
                .map(|e| {
                    let mut m = HashMap::new();
                    m.insert("operation".to_string(), Value::String(e.operation.clone()));
                    m.insert("timestamp".to_string(), Value::Date(e.timestamp));
                    m.insert("data".to_string(), e.data.clone());
                    Value::Object(m)
                })
                .collect();
            history.insert(name.clone(), Value::Array(arr));
        }
        root.insert("modificationHistory".to_string(), Value::Object(history));

        Value::Object(root)
    }

    fn from_value(value: &Value) -> Result<Self> {
        let root = value
            .as_object()
            .ok_or_else(|| StoreError::MasterIndexError("master index property is not an object".into()))?;
        let version = root
            .get("version")
            .and_then(Value::as_f64)
            .ok_or_else(|| StoreError::MasterIndexError("master index missing version".into()))?
            as u32;
        let last_updated = match root.get("lastUpdated") {
            Some(Value::Date(d)) => *d,
            _ => return Err(StoreError::MasterIndexError("master index missing lastUpdated".into())),
        };

        let mut collections = HashMap::new();
        if let Some(map) = root.get("collections").and_then(Value::as_object) {
            for (name, v) in map {
                collections.insert(name.clone(), collection_from_value(v)?);
            }
        }

        let mut locks = HashMap::new();
        if let Some(map) = root.get("locks").and_then(Value::as_object) {
            for (name, v) in map {
                if let Some(lock) = lock_from_value(v)? {
                    locks.insert(name.clone(), lock);
                }
            }
        }

        let mut modification_history = HashMap::new();
        if let Some(map) = root.get("modificationHistory").and_then(Value::as_object) {
            for (name, v) in map {
                let entries = v
                    .as_array()
                    .ok_or_else(|| StoreError::MasterIndexError("modificationHistory entry must be an array".into()))?
                    .iter()
                    .map(history_entry_from_value)
                    .collect::<Result<Vec<_>>>()?;
                modification_history.insert(name.clone(), entries);
            }
        }

        Ok(MasterIndexData { version, last_updated, collections, locks, modification_history })
    }
}

fn lock_to_value(lock: &LockInfo) -> Value {
    let mut m = HashMap::new();
    m.insert("lockedBy".to_string(), Value::String(lock.locked_by.clone()));
    m.insert("lockedAt".to_string(), Value::Date(lock.locked_at));
    m.insert("expiresAt".to_string(), Value::Date(lock.expires_at));
    Value::Object(m)
}

fn lock_from_value(value: &Value) -> Result<Option<LockInfo>> {
    if matches!(value, Value::Null) {
        return Ok(None);
    }
    let m = value
        .as_object()
        .ok_or_else(|| StoreError::MasterIndexError("lock entry must be an object".into()))?;
    let locked_by = m
        .get("lockedBy")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::MasterIndexError("lock entry missing lockedBy".into()))?
        .to_string();
    let locked_at = match m.get("lockedAt") {
        Some(Value::Date(d)) => *d,
        _ => return Err(StoreError::MasterIndexError("lock entry missing lockedAt".into())),
    };
    let expires_at = match m.get("expiresAt") {
        Some(Value::Date(d)) => *d,
        _ => return Err(StoreError::MasterIndexError("lock entry missing expiresAt".into())),
    };
    Ok(Some(LockInfo { locked_by, locked_at, expires_at }))
}

fn collection_from_value(value: &Value) -> Result<CollectionEntry> {
    let m = value
        .as_object()
        .ok_or_else(|| StoreError::MasterIndexError("collection entry must be an object".into()))?;
    let name = m
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::MasterIndexError("collection entry missing name".into()))?
        .to_string();
    let file_id = m
        .get("fileId")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::MasterIndexError("collection entry missing fileId".into()))?
        .to_string();
    let created = match m.get("created") {
        Some(Value::Date(d)) => *d,
        _ => return Err(StoreError::MasterIndexError("collection entry missing created".into())),
    };
    let last_updated = match m.get("lastUpdated") {
        Some(Value::Date(d)) => *d,
        _ => return Err(StoreError::MasterIndexError("collection entry missing lastUpdated".into())),
    };
    let document_count = m
        .get("documentCount")
        .and_then(Value::as_f64)
        .ok_or_else(|| StoreError::MasterIndexError("collection entry missing documentCount".into()))?
        as u64;
    let modification_token = m
        .get("modificationToken")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::MasterIndexError("collection entry missing modificationToken".into()))?
        .to_string();
    let lock_status = m.get("lockStatus").map(lock_from_value).transpose()?.flatten();
    Ok(CollectionEntry { name, file_id, created, last_updated, document_count, modification_token, lock_status })
}

fn history_entry_from_value(value: &Value) -> Result<HistoryEntry> {
    let m = value
        .as_object()
        .ok_or_else(|| StoreError::MasterIndexError("history entry must be an object".into()))?;
    let operation = m
        .get("operation")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::MasterIndexError("history entry missing operation".into()))?
        .to_string();
    let timestamp = match m.get("timestamp") {
        Some(Value::Date(d)) => *d,
        _ => return Err(StoreError::MasterIndexError("history entry missing timestamp".into())),
    };
    let data = m.get("data").cloned().unwrap_or(Value::Null);
    Ok(HistoryEntry { operation, timestamp, data })
}

/// Non-LAST_WRITE_WINS strategies are rejected per spec §4.6: they are
/// future work, not silently accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictStrategy {
    LastWriteWins,
}

impl ConflictStrategy {
    /// Parses the externally-facing config value for `conflictStrategy`
    /// (spec §6). The enum itself only has one variant today, so the type
    /// system already rules out constructing an invalid one in Rust code;
    /// this is the actual boundary where a caller-supplied name can be
    /// wrong, so it's where `ConfigurationError` gets raised.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "LAST_WRITE_WINS" => Ok(ConflictStrategy::LastWriteWins),
            other => Err(StoreError::ConfigurationError(format!(
                "unknown conflict strategy: {other}"
            ))),
        }
    }
}

pub struct MasterIndex<C: CoordinationStore> {
    store: Arc<C>,
    config: Config,
}

impl<C: CoordinationStore> MasterIndex<C> {
    pub fn new(store: Arc<C>, config: Config) -> Self {
        MasterIndex { store, config }
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn load(&self) -> Result<MasterIndexData> {
        match self.store.get_property(&self.config.master_index_key)? {
            Some(raw) => {
                let value = crate::value::deserialise(&raw)?;
                MasterIndexData::from_value(&value)
            }
            None => Ok(MasterIndexData::new(self.config.version, self.now())),
        }
    }

    fn store_back(&self, data: &MasterIndexData) -> Result<()> {
        let raw = crate::value::serialise(&data.to_value())?;
        self.store.set_property(&self.config.master_index_key, &raw)
    }

    /// Run `f` against the current index under the process-wide mutex. If
    /// `mutate` is true, the result is written back (with `lastUpdated`
    /// bumped) after `f` returns successfully.
    fn with_index<F, R>(&self, mutate: bool, f: F) -> Result<R>
    where
        F: FnOnce(&mut MasterIndexData) -> Result<R>,
    {
        let handle = self
            .store
            .try_acquire_process_mutex(self.config.process_mutex_timeout_ms)?
            .ok_or_else(|| StoreError::LockTimeout("could not acquire process-wide mutex".into()))?;

        let outcome = (|| {
            let mut data = self.load()?;
            let result = f(&mut data)?;
            if mutate {
                data.last_updated = self.now();
                self.store_back(&data)?;
            }
            Ok(result)
        })();

        self.store.release_process_mutex(handle)?;
        outcome
    }

    pub fn add_collection(&self, name: &str, file_id: &str) -> Result<()> {
        if name.is_empty() {
            return Err(StoreError::InvalidArgument("collection name must not be empty".into()));
        }
        let now = self.now();
        let token = token::generate(now.timestamp_millis() as u64);
        self.with_index(true, move |data| {
            data.collections.insert(
                name.to_string(),
                CollectionEntry {
                    name: name.to_string(),
                    file_id: file_id.to_string(),
                    created: now,
                    last_updated: now,
                    document_count: 0,
                    modification_token: token,
                    lock_status: None,
                },
            );
            Ok(())
        })
    }

    pub fn get_collection(&self, name: &str) -> Result<Option<CollectionEntry>> {
        self.with_index(false, |data| Ok(data.collections.get(name).cloned()))
    }

    pub fn get_collections(&self) -> Result<Vec<CollectionEntry>> {
        self.with_index(false, |data| Ok(data.collections.values().cloned().collect()))
    }

    pub fn update_collection_metadata(
        &self,
        name: &str,
        document_count: u64,
        modification_token: String,
    ) -> Result<()> {
        let now = self.now();
        self.with_index(true, move |data| {
            let entry = data
                .collections
                .get_mut(name)
                .ok_or_else(|| StoreError::MasterIndexError(format!("unknown collection: {name}")))?;
            entry.document_count = document_count;
            entry.modification_token = modification_token;
            entry.last_updated = now;
            Ok(())
        })
    }

    pub fn remove_collection(&self, name: &str) -> Result<()> {
        self.with_index(true, |data| {
            data.collections.remove(name);
            data.locks.remove(name);
            data.modification_history.remove(name);
            Ok(())
        })
    }

    /// Drops any lock entry past its `expiresAt`, mirroring the removal
    /// into the owning collection's `lockStatus`. Returns whether any
    /// lock was removed.
    fn cleanup_expired_locks_locked(data: &mut MasterIndexData, now: DateTime<Utc>) -> bool {
        let expired: Vec<String> = data
            .locks
            .iter()
            .filter(|(_, lock)| now >= lock.expires_at)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &expired {
            data.locks.remove(name);
            if let Some(entry) = data.collections.get_mut(name) {
                entry.lock_status = None;
            }
        }
        !expired.is_empty()
    }

    pub fn cleanup_expired_locks(&self) -> Result<bool> {
        let now = self.now();
        self.with_index(true, move |data| Ok(Self::cleanup_expired_locks_locked(data, now)))
    }

    pub fn acquire_lock(&self, name: &str, op_id: &str) -> Result<bool> {
        if name.is_empty() || op_id.is_empty() {
            return Err(StoreError::InvalidArgument("collection name and operation id must not be empty".into()));
        }
        let now = self.now();
        let lock_timeout = self.config.lock_timeout_ms;
        self.with_index(true, move |data| {
            Self::cleanup_expired_locks_locked(data, now);
            if data.locks.contains_key(name) {
                return Ok(false);
            }
            let lock = LockInfo {
                locked_by: op_id.to_string(),
                locked_at: now,
                expires_at: now + chrono::Duration::milliseconds(lock_timeout as i64),
            };
            data.locks.insert(name.to_string(), lock.clone());
            if let Some(entry) = data.collections.get_mut(name) {
                entry.lock_status = Some(lock);
            }
            Ok(true)
        })
    }

    pub fn release_lock(&self, name: &str, op_id: &str) -> Result<bool> {
        self.with_index(true, |data| match data.locks.get(name) {
            Some(lock) if lock.locked_by == op_id => {
                data.locks.remove(name);
                if let Some(entry) = data.collections.get_mut(name) {
                    entry.lock_status = None;
                }
                Ok(true)
            }
            _ => Ok(false),
        })
    }

    pub fn is_locked(&self, name: &str) -> Result<bool> {
        let now = self.now();
        self.with_index(true, move |data| {
            Self::cleanup_expired_locks_locked(data, now);
            Ok(data.locks.contains_key(name))
        })
    }

    pub fn generate_token(&self) -> String {
        token::generate(self.now().timestamp_millis() as u64)
    }

    pub fn validate_token(&self, candidate: &str) -> bool {
        token::is_valid(candidate)
    }

    pub fn has_conflict(&self, name: &str, expected_token: &str) -> Result<bool> {
        self.with_index(false, |data| match data.collections.get(name) {
            None => Ok(false),
            Some(entry) => Ok(entry.modification_token != expected_token),
        })
    }

    /// Only `LastWriteWins` is implemented; any other strategy is
    /// rejected rather than silently accepted (spec §4.6).
    pub fn resolve_conflict(
        &self,
        name: &str,
        new_document_count: u64,
        strategy: ConflictStrategy,
        operation: &str,
    ) -> Result<String> {
        let ConflictStrategy::LastWriteWins = strategy;
        let now = self.now();
        let new_token = token::generate(now.timestamp_millis() as u64);
        let new_token_for_entry = new_token.clone();
        let max_entries = self.config.max_history_entries;
        self.with_index(true, move |data| {
            let entry = data
                .collections
                .get_mut(name)
                .ok_or_else(|| StoreError::MasterIndexError(format!("unknown collection: {name}")))?;
            entry.document_count = new_document_count;
            entry.modification_token = new_token_for_entry.clone();
            entry.last_updated = now;
            let history = data.modification_history.entry(name.to_string()).or_default();
            history.push(HistoryEntry {
                operation: operation.to_string(),
                timestamp: now,
                data: Value::String(new_token_for_entry.clone()),
            });
            truncate_history(history, max_entries);
            Ok(())
        })?;
        Ok(new_token)
    }

    pub fn record_history(&self, name: &str, operation: &str, data_value: Value) -> Result<()> {
        let now = self.now();
        let max_entries = self.config.max_history_entries;
        self.with_index(true, move |data| {
            let history = data.modification_history.entry(name.to_string()).or_default();
            history.push(HistoryEntry { operation: operation.to_string(), timestamp: now, data: data_value });
            truncate_history(history, max_entries);
            Ok(())
        })
    }

    pub fn get_modification_history(&self, name: &str) -> Result<Vec<HistoryEntry>> {
        self.with_index(false, |data| Ok(data.modification_history.get(name).cloned().unwrap_or_default()))
    }
}

fn truncate_history(history: &mut Vec<HistoryEntry>, max_entries: usize) {
    if history.len() > max_entries {
        let excess = history.len() - max_entries;
        history.drain(0..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination_store::InMemoryCoordinationStore;

    fn index() -> MasterIndex<InMemoryCoordinationStore> {
        MasterIndex::new(Arc::new(InMemoryCoordinationStore::new()), Config::default())
    }

    #[test]
    fn conflict_strategy_parses_known_name_and_rejects_unknown() {
        assert_eq!(ConflictStrategy::parse("LAST_WRITE_WINS").unwrap(), ConflictStrategy::LastWriteWins);
        assert!(matches!(
            ConflictStrategy::parse("FIRST_WRITE_WINS").unwrap_err(),
            StoreError::ConfigurationError(_)
        ));
    }

    #[test]
    fn add_and_get_collection_round_trips() {
        let idx = index();
        idx.add_collection("users", "file-1").unwrap();
        let entry = idx.get_collection("users").unwrap().unwrap();
        assert_eq!(entry.file_id, "file-1");
        assert_eq!(entry.document_count, 0);
        assert!(token::is_valid(&entry.modification_token));
    }

    #[test]
    fn lock_discipline_across_two_operations() {
        let idx = index();
        idx.add_collection("c", "f").unwrap();
        assert!(idx.acquire_lock("c", "op1").unwrap());
        assert!(!idx.acquire_lock("c", "op2").unwrap());
        assert!(idx.is_locked("c").unwrap());
        assert!(!idx.release_lock("c", "op2").unwrap());
        assert!(idx.release_lock("c", "op1").unwrap());
        assert!(idx.acquire_lock("c", "op2").unwrap());
    }

    #[test]
    fn lock_expires_naturally() {
        let mut cfg = Config::default();
        cfg.lock_timeout_ms = 0;
        let idx = MasterIndex::new(Arc::new(InMemoryCoordinationStore::new()), cfg);
        idx.add_collection("c", "f").unwrap();
        assert!(idx.acquire_lock("c", "op1").unwrap());
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(!idx.is_locked("c").unwrap());
        assert!(idx.acquire_lock("c", "op2").unwrap());
    }

    #[test]
    fn has_conflict_detects_stale_snapshot_token() {
        let idx = index();
        idx.add_collection("c", "f").unwrap();
        let t0 = idx.get_collection("c").unwrap().unwrap().modification_token;
        assert!(!idx.has_conflict("c", &t0).unwrap());
        idx.update_collection_metadata("c", 1, idx.generate_token()).unwrap();
        assert!(idx.has_conflict("c", &t0).unwrap());
    }

    #[test]
    fn modification_history_is_bounded() {
        let mut cfg = Config::default();
        cfg.max_history_entries = 2;
        let idx = MasterIndex::new(Arc::new(InMemoryCoordinationStore::new()), cfg);
        idx.add_collection("c", "f").unwrap();
        for i in 0..5 {
            idx.record_history("c", "update", Value::Number(i as f64)).unwrap();
        }
        let history = idx.get_modification_history("c").unwrap();
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn empty_args_to_acquire_lock_are_rejected() {
        let idx = index();
        idx.add_collection("c", "f").unwrap();
        assert!(matches!(idx.acquire_lock("", "op1").unwrap_err(), StoreError::InvalidArgument(_)));
        assert!(matches!(idx.acquire_lock("c", "").unwrap_err(), StoreError::InvalidArgument(_)));
    }
}
