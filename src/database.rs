//! Database (spec §6 Facade API surface): `createCollection`,
//! `listCollections`, `collection`, `dropCollection`. Grounded on the
//! teacher's `DatabaseCore` — a thin registry in front of per-collection
//! handles — narrowed to this crate's scope: collection lifecycle lives
//! entirely in the Master Index (spec §3 "Lifecycles"), not in a local
//! catalog file.

use crate::collection_blob::CollectionBlob;
use crate::config::Config;
use crate::coordination_store::CoordinationStore;
use crate::coordinator::CollectionCoordinator;
use crate::error::{Result, StoreError};
use crate::facade::Collection;
use crate::file_service::FileService;
use crate::master_index::MasterIndex;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub struct Database<F: FileService, C: CoordinationStore> {
    file_service: Arc<F>,
    master_index: Arc<MasterIndex<C>>,
    config: Config,
    collections: Mutex<HashMap<String, Arc<Collection<F, C>>>>,
}

impl<F: FileService, C: CoordinationStore> Database<F, C> {
    pub fn open(file_service: Arc<F>, coordination_store: Arc<C>, config: Config) -> Result<Self> {
        config.validate()?;
        let master_index = Arc::new(MasterIndex::new(coordination_store, config.clone()));
        Ok(Database { file_service, master_index, config, collections: Mutex::new(HashMap::new()) })
    }

    pub fn with_default_config(file_service: Arc<F>, coordination_store: Arc<C>) -> Result<Self> {
        Self::open(file_service, coordination_store, Config::default())
    }

    fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(StoreError::InvalidArgument("collection name must not be empty".into()));
        }
        Ok(())
    }

    fn build_handle(&self, name: &str, file_id: String) -> Arc<Collection<F, C>> {
        let coordinator = Arc::new(CollectionCoordinator::new(
            name.to_string(),
            file_id,
            Arc::clone(&self.file_service),
            Arc::clone(&self.master_index),
            self.config.clone(),
        ));
        Arc::new(Collection::new(name.to_string(), coordinator, &self.config))
    }

    /// Explicitly creates `name`. Fails `InvalidArgument` if it already
    /// exists — callers who want "create if absent, else use" should call
    /// `collection` instead, which is the get-or-create entry point.
    pub fn create_collection(&self, name: &str) -> Result<Arc<Collection<F, C>>> {
        Self::validate_name(name)?;
        let mut collections = self.collections.lock();
        if self.master_index.get_collection(name)?.is_some() {
            return Err(StoreError::InvalidArgument(format!("collection already exists: {name}")));
        }
        let handle = self.create_blob_and_register(name)?;
        collections.insert(name.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    fn create_blob_and_register(&self, name: &str) -> Result<Arc<Collection<F, C>>> {
        let blob = CollectionBlob::new(name.to_string(), chrono::Utc::now());
        let text = crate::value::serialise(&blob.to_value())?;
        let file_id = self.file_service.create(&format!("{name}.json"), text.as_bytes(), None)?;
        self.master_index.add_collection(name, &file_id)?;
        Ok(self.build_handle(name, file_id))
    }

    pub fn list_collections(&self) -> Result<Vec<String>> {
        Ok(self.master_index.get_collections()?.into_iter().map(|c| c.name).collect())
    }

    /// Get-or-create entry point: returns the cached handle if this
    /// process has already resolved `name`, otherwise resolves the
    /// existing Master Index entry or creates a fresh one. Per-process
    /// creation races are serialised by `collections`'s lock; cross-process
    /// races are serialised by the Master Index's script-level mutex
    /// around `add_collection`.
    pub fn collection(&self, name: &str) -> Result<Arc<Collection<F, C>>> {
        Self::validate_name(name)?;
        let mut collections = self.collections.lock();
        if let Some(existing) = collections.get(name) {
            return Ok(Arc::clone(existing));
        }
        let handle = match self.master_index.get_collection(name)? {
            Some(entry) => self.build_handle(name, entry.file_id),
            None => self.create_blob_and_register(name)?,
        };
        collections.insert(name.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    pub fn drop_collection(&self, name: &str) -> Result<()> {
        Self::validate_name(name)?;
        let mut collections = self.collections.lock();
        let entry = self.master_index.get_collection(name)?;
        if let Some(entry) = entry {
            self.file_service.delete(&entry.file_id)?;
        }
        self.master_index.remove_collection(name)?;
        collections.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination_store::InMemoryCoordinationStore;
    use crate::file_service::InMemoryFileService;
    use crate::value::Value;

    fn database() -> Database<InMemoryFileService, InMemoryCoordinationStore> {
        Database::with_default_config(
            Arc::new(InMemoryFileService::new()),
            Arc::new(InMemoryCoordinationStore::new()),
        )
        .unwrap()
    }

    #[test]
    fn create_collection_then_list() {
        let db = database();
        db.create_collection("users").unwrap();
        assert_eq!(db.list_collections().unwrap(), vec!["users".to_string()]);
    }

    #[test]
    fn create_collection_twice_fails() {
        let db = database();
        db.create_collection("users").unwrap();
        assert!(matches!(db.create_collection("users").unwrap_err(), StoreError::InvalidArgument(_)));
    }

    #[test]
    fn collection_is_get_or_create_and_cached() {
        let db = database();
        let a = db.collection("users").unwrap();
        let b = db.collection("users").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(db.list_collections().unwrap(), vec!["users".to_string()]);
    }

    #[test]
    fn drop_collection_removes_it_and_its_blob() {
        let db = database();
        let handle = db.create_collection("users").unwrap();
        handle.insert_one(Value::Object(vec![("_id".to_string(), Value::String("u1".into()))].into_iter().collect())).unwrap();
        db.drop_collection("users").unwrap();
        assert!(db.list_collections().unwrap().is_empty());
        // Re-creating after drop starts from an empty blob again.
        let recreated = db.create_collection("users").unwrap();
        assert_eq!(recreated.count_documents(&Value::Object(Default::default())).unwrap(), 0);
    }

    #[test]
    fn empty_name_is_rejected() {
        let db = database();
        assert!(matches!(db.create_collection("").unwrap_err(), StoreError::InvalidArgument(_)));
        assert!(matches!(db.collection("").unwrap_err(), StoreError::InvalidArgument(_)));
        assert!(matches!(db.drop_collection("").unwrap_err(), StoreError::InvalidArgument(_)));
    }

    #[test]
    fn open_rejects_invalid_config() {
        let mut config = crate::config::Config::default();
        config.lock_timeout_ms = 0;
        let result = Database::open(
            Arc::new(InMemoryFileService::new()),
            Arc::new(InMemoryCoordinationStore::new()),
            config,
        );
        assert!(matches!(result.unwrap_err(), StoreError::ConfigurationError(_)));
    }
}
