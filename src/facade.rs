//! Collection Facade (component C8): the stable, validated API surface
//! callers use, per spec §4.8 / §6 "Collection" surface. Thin by design —
//! it validates arguments, renders MongoDB-shaped results, and delegates
//! everything else to the `CollectionCoordinator`.
//!
//! There is no single teacher file this maps onto one-to-one (the teacher
//! folds facade and coordinator concerns into `CollectionCore` directly);
//! this module is grounded on `CollectionCore`'s public method set
//! (`insert_one`/`find_one`/`find`/`update_one`/`update_many`/
//! `delete_one`/`delete_many`/`count_documents`) and its `InsertManyResult`
//! shape, split out as its own layer because spec §2's C7/C8 split is
//! explicit about keeping argument validation and dirty/lazy-load
//! bookkeeping out of the coordinator's critical-section state machine.

use crate::config::Config;
use crate::coordination_store::CoordinationStore;
use crate::coordinator::CollectionCoordinator;
use crate::document::{Document, ID_FIELD};
use crate::document_engine::{DeletionResult, InsertManyResult as EngineInsertManyResult, MutationResult};
use crate::error::{Result, StoreError};
use crate::file_service::FileService;
use crate::find_options::{self, FindOptions};
use crate::value::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct InsertOneResult {
    pub acknowledged: bool,
    pub inserted_id: String,
}

pub type InsertManyResult = EngineInsertManyResult;
pub type UpdateResult = MutationResult;
pub type DeleteResult = DeletionResult;

/// One collection's public handle. Cheap to clone (it's an `Arc` around
/// the coordinator); callers are expected to hold one per collection name
/// for the lifetime of their session, same as `Database::collection`
/// returns.
pub struct Collection<F: FileService, C: CoordinationStore> {
    name: String,
    coordinator: Arc<CollectionCoordinator<F, C>>,
    query_operators: HashSet<&'static str>,
    update_operators: HashSet<&'static str>,
    /// Per spec §4.8: whether this instance has completed at least one
    /// load from the coordinator. Purely observational bookkeeping — the
    /// coordinator's own snapshot-token cache is what actually governs
    /// staleness.
    lazy_loaded: AtomicBool,
    /// Per spec §4.8: set for the span of a mutating call, cleared once
    /// the coordinator's write protocol has committed. There is no
    /// deferred/batched write in this design (every Facade mutation runs
    /// its own critical section), so this is never observed as `true` by
    /// another call — it exists so the bookkeeping spec §4.8 names is
    /// actually present, not approximated away.
    is_dirty: AtomicBool,
}

impl<F: FileService, C: CoordinationStore> Collection<F, C> {
    pub(crate) fn new(
        name: String,
        coordinator: Arc<CollectionCoordinator<F, C>>,
        config: &Config,
    ) -> Self {
        Collection {
            name,
            coordinator,
            query_operators: config.supported_query_operators.clone(),
            update_operators: config.supported_update_operators.clone(),
            lazy_loaded: AtomicBool::new(false),
            is_dirty: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn mark_loaded(&self) {
        self.lazy_loaded.store(true, Ordering::Relaxed);
    }

    pub fn is_lazy_loaded(&self) -> bool {
        self.lazy_loaded.load(Ordering::Relaxed)
    }

    fn validate_filter(filter: &Value) -> Result<()> {
        match filter {
            Value::Object(_) => Ok(()),
            _ => Err(StoreError::InvalidArgument("filter must be an object".into())),
        }
    }

    fn validate_update(update: &Value) -> Result<()> {
        match update {
            Value::Object(m) if !m.is_empty() => Ok(()),
            Value::Object(_) => Err(StoreError::InvalidArgument("update must not be empty".into())),
            _ => Err(StoreError::InvalidArgument("update must be an object".into())),
        }
    }

    fn validate_document(document: &Value) -> Result<()> {
        match document {
            Value::Object(_) => Ok(()),
            _ => Err(StoreError::InvalidArgument("document must be an object".into())),
        }
    }

    pub fn insert_one(&self, document: Value) -> Result<InsertOneResult> {
        Self::validate_document(&document)?;
        let doc = Document::from_value_for_insert(document)?;
        self.is_dirty.store(true, Ordering::Relaxed);
        let id = self.coordinator.insert(doc)?;
        self.is_dirty.store(false, Ordering::Relaxed);
        self.mark_loaded();
        Ok(InsertOneResult { acknowledged: true, inserted_id: id })
    }

    /// SPEC_FULL.md §C supplemental operation, grounded on the teacher's
    /// `insert_many`/`InsertManyResult`. Validates every document before
    /// any is persisted, so a malformed element anywhere in the batch
    /// never causes a partial write.
    pub fn insert_many(&self, documents: Vec<Value>) -> Result<InsertManyResult> {
        if documents.is_empty() {
            return Err(StoreError::InvalidArgument("documents must not be empty".into()));
        }
        let mut docs = Vec::with_capacity(documents.len());
        for document in documents {
            Self::validate_document(&document)?;
            docs.push(Document::from_value_for_insert(document)?);
        }
        self.is_dirty.store(true, Ordering::Relaxed);
        let result = self.coordinator.insert_many(docs)?;
        self.is_dirty.store(false, Ordering::Relaxed);
        self.mark_loaded();
        Ok(result)
    }

    pub fn find_one(&self, filter: &Value) -> Result<Option<Value>> {
        Self::validate_filter(&filter.clone())?;
        let found = self.coordinator.find_by_query(filter, &self.query_operators)?;
        self.mark_loaded();
        Ok(found.map(|d| d.to_value()))
    }

    pub fn find(&self, filter: &Value) -> Result<Vec<Value>> {
        self.find_with_options(filter, &FindOptions::default())
    }

    /// SPEC_FULL.md §C supplemental operation: projection/sort/limit/skip
    /// applied as a pure post-filter over the already-materialised result,
    /// per §1's "no streaming cursors" non-goal.
    pub fn find_with_options(&self, filter: &Value, options: &FindOptions) -> Result<Vec<Value>> {
        Self::validate_filter(filter)?;
        let mut docs = self.coordinator.find_many(filter, &self.query_operators)?;
        self.mark_loaded();
        if let Some(sort) = &options.sort {
            find_options::apply_sort(&mut docs, sort);
        }
        docs = find_options::apply_limit_skip(docs, options.limit, options.skip);
        let values: Vec<Value> = docs
            .iter()
            .map(|d| match &options.projection {
                Some(p) => find_options::apply_projection(&d.to_value(), p),
                None => d.to_value(),
            })
            .collect();
        Ok(values)
    }

    pub fn count_documents(&self, filter: &Value) -> Result<u64> {
        Self::validate_filter(filter)?;
        let count = self.coordinator.count_by_query(filter, &self.query_operators)?;
        self.mark_loaded();
        Ok(count)
    }

    /// The Update Engine already rejects `_id` mutation deep inside the
    /// critical section; this mirrors that check at the Facade so an
    /// obviously-doomed call fails before taking the collection lock.
    fn reject_id_mutation(update: &Value) -> Result<()> {
        if let Value::Object(m) = update {
            if let Some(set) = m.get("$set") {
                if let Some(set_map) = set.as_object() {
                    if set_map.contains_key(ID_FIELD) {
                        return Err(StoreError::InvalidArgument("_id is immutable".into()));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn update_one(&self, filter: &Value, update: &Value) -> Result<UpdateResult> {
        Self::validate_filter(filter)?;
        Self::validate_update(update)?;
        Self::reject_id_mutation(update)?;
        let result = self.coordinator.update_by_query(
            filter,
            update,
            &self.query_operators,
            &self.update_operators,
        )?;
        self.mark_loaded();
        Ok(result)
    }

    pub fn update_many(&self, filter: &Value, update: &Value) -> Result<UpdateResult> {
        Self::validate_filter(filter)?;
        Self::validate_update(update)?;
        Self::reject_id_mutation(update)?;
        let result = self.coordinator.update_many(
            filter,
            update,
            &self.query_operators,
            &self.update_operators,
        )?;
        self.mark_loaded();
        Ok(result)
    }

    pub fn replace_one(&self, filter: &Value, replacement: Value) -> Result<UpdateResult> {
        Self::validate_filter(filter)?;
        Self::validate_document(&replacement)?;
        let result = self.coordinator.replace_by_query(filter, replacement, &self.query_operators)?;
        self.mark_loaded();
        Ok(result)
    }

    pub fn delete_one(&self, filter: &Value) -> Result<DeleteResult> {
        Self::validate_filter(filter)?;
        let result = self.coordinator.delete_by_query(filter, &self.query_operators)?;
        self.mark_loaded();
        Ok(result)
    }

    pub fn delete_many(&self, filter: &Value) -> Result<DeleteResult> {
        Self::validate_filter(filter)?;
        let result = self.coordinator.delete_many(filter, &self.query_operators)?;
        self.mark_loaded();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination_store::InMemoryCoordinationStore;
    use crate::collection_blob::CollectionBlob;
    use crate::file_service::{FileService as _, InMemoryFileService};
    use crate::master_index::MasterIndex;
    use chrono::Utc;

    fn new_collection() -> Collection<InMemoryFileService, InMemoryCoordinationStore> {
        let file_service = Arc::new(InMemoryFileService::new());
        let master_index = Arc::new(MasterIndex::new(Arc::new(InMemoryCoordinationStore::new()), Config::default()));
        let blob = CollectionBlob::new("people".to_string(), Utc::now());
        let text = crate::value::serialise(&blob.to_value()).unwrap();
        let file_id = file_service.create("people.json", text.as_bytes(), None).unwrap();
        master_index.add_collection("people", &file_id).unwrap();
        let coordinator = Arc::new(CollectionCoordinator::new(
            "people".to_string(),
            file_id,
            file_service,
            master_index,
            Config::default(),
        ));
        Collection::new("people".to_string(), coordinator, &Config::default())
    }

    fn obj(pairs: Vec<(&str, Value)>) -> Value {
        Value::Object(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    #[test]
    fn scenario_s1_insert_and_find() {
        let coll = new_collection();
        let inserted = coll
            .insert_one(obj(vec![
                ("_id", Value::String("u1".into())),
                ("name", Value::String("Anna".into())),
                ("age", Value::Number(30.0)),
            ]))
            .unwrap();
        assert_eq!(inserted.inserted_id, "u1");
        let found = coll.find_one(&obj(vec![("_id", Value::String("u1".into()))])).unwrap().unwrap();
        assert_eq!(found.as_object().unwrap().get("name"), Some(&Value::String("Anna".into())));

        let dup = coll.insert_one(obj(vec![
            ("_id", Value::String("u1".into())),
            ("name", Value::String("X".into())),
        ]));
        assert!(matches!(dup.unwrap_err(), StoreError::DuplicateKey(_)));
    }

    #[test]
    fn scenario_s4_replace_preserves_id() {
        let coll = new_collection();
        coll.insert_one(obj(vec![
            ("_id", Value::String("u3".into())),
            ("a", Value::Number(1.0)),
            ("b", Value::Number(2.0)),
        ]))
        .unwrap();
        let result = coll
            .replace_one(
                &obj(vec![("_id", Value::String("u3".into()))]),
                obj(vec![("a", Value::Number(9.0)), ("c", Value::Number(3.0))]),
            )
            .unwrap();
        assert_eq!(result, UpdateResult { matched_count: 1, modified_count: 1, acknowledged: true });
        let found = coll.find_one(&obj(vec![("_id", Value::String("u3".into()))])).unwrap().unwrap();
        let m = found.as_object().unwrap();
        assert!(!m.contains_key("b"));
        assert_eq!(m.get("c"), Some(&Value::Number(3.0)));
    }

    #[test]
    fn insert_rejects_non_object_document() {
        let coll = new_collection();
        assert!(matches!(
            coll.insert_one(Value::Number(1.0)).unwrap_err(),
            StoreError::InvalidArgument(_)
        ));
    }

    #[test]
    fn find_rejects_non_object_filter() {
        let coll = new_collection();
        assert!(matches!(coll.find(&Value::Number(1.0)).unwrap_err(), StoreError::InvalidArgument(_)));
    }

    #[test]
    fn update_rejects_empty_update_document() {
        let coll = new_collection();
        coll.insert_one(obj(vec![("_id", Value::String("u1".into()))])).unwrap();
        assert!(matches!(
            coll.update_one(&obj(vec![("_id", Value::String("u1".into()))]), &Value::Object(Default::default()))
                .unwrap_err(),
            StoreError::InvalidArgument(_)
        ));
    }

    #[test]
    fn update_rejects_id_mutation_via_set() {
        let coll = new_collection();
        coll.insert_one(obj(vec![("_id", Value::String("u1".into()))])).unwrap();
        let update = obj(vec![("$set", obj(vec![("_id", Value::String("other".into()))]))]);
        assert!(matches!(
            coll.update_one(&obj(vec![("_id", Value::String("u1".into()))]), &update).unwrap_err(),
            StoreError::InvalidArgument(_)
        ));
    }

    #[test]
    fn insert_many_batch_and_find_with_options() {
        let coll = new_collection();
        coll.insert_many(vec![
            obj(vec![("_id", Value::String("a".into())), ("age", Value::Number(30.0))]),
            obj(vec![("_id", Value::String("b".into())), ("age", Value::Number(10.0))]),
            obj(vec![("_id", Value::String("c".into())), ("age", Value::Number(20.0))]),
        ])
        .unwrap();
        let options = FindOptions::new().with_sort(vec![("age".to_string(), 1)]).with_limit(2);
        let found = coll.find_with_options(&Value::Object(Default::default()), &options).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].as_object().unwrap().get("_id"), Some(&Value::String("b".into())));
        assert_eq!(found[1].as_object().unwrap().get("_id"), Some(&Value::String("c".into())));
    }

    #[test]
    fn lazy_loaded_flag_flips_after_first_access() {
        let coll = new_collection();
        assert!(!coll.is_lazy_loaded());
        coll.count_documents(&Value::Object(Default::default())).unwrap();
        assert!(coll.is_lazy_loaded());
    }
}
