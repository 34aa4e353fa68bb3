//! Document Engine (component C5): in-memory CRUD over a collection's
//! document map. Deep-clones on ingress and egress so callers never share
//! mutable state with the store.
//!
//! Grounded on the teacher's `CollectionCore` (`collection_core/mod.rs`):
//! same operation set and the `{matchedCount, modifiedCount,
//! acknowledged}`/`{deletedCount, acknowledged}` result shapes, rebuilt
//! around the spec's tombstone-free direct-mutation semantics (the
//! teacher marks old documents `_tombstone` and appends a fresh one; this
//! engine mutates the stored `Vec<Document>` in place) and an
//! insertion-ordered map (`Vec` + index `HashMap`, grounded on the
//! teacher's `MemoryStorage`'s `HashMap<String, Vec<Document>>` layout)
//! so `find`/`findMany` preserve storage insertion order per §4.3.

use crate::document::Document;
use crate::error::{Result, StoreError};
use crate::query;
use crate::update;
use crate::value::Value;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationResult {
    pub matched_count: u64,
    pub modified_count: u64,
    pub acknowledged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionResult {
    pub deleted_count: u64,
    pub acknowledged: bool,
}

/// Result of a batch insert (SPEC_FULL.md §C supplemental `insertMany`),
/// grounded on the teacher's `InsertManyResult`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertManyResult {
    pub inserted_ids: Vec<String>,
    pub acknowledged: bool,
}

/// The in-memory document map for one collection instance. Insertion
/// order is the `Vec`'s order; `index` maps `_id` to position for O(1)
/// by-id lookup.
pub struct DocumentEngine {
    documents: Vec<Document>,
    index: HashMap<String, usize>,
}

/// A parsed filter, distinguishing the three cases §4.3/§4.5 name so
/// callers can take the fast path without re-deriving it.
enum FilterShape<'a> {
    MatchAll,
    ById(&'a str),
    General(&'a Value),
}

fn analyse_filter(filter: &Value) -> Result<FilterShape<'_>> {
    let map = match filter {
        Value::Object(m) => m,
        _ => return Err(StoreError::InvalidQuery("filter must be an object".into())),
    };
    if map.is_empty() {
        return Ok(FilterShape::MatchAll);
    }
    if map.len() == 1 {
        if let Some(Value::String(id)) = map.get("_id") {
            return Ok(FilterShape::ById(id));
        }
    }
    Ok(FilterShape::General(filter))
}

impl DocumentEngine {
    pub fn new() -> Self {
        DocumentEngine { documents: Vec::new(), index: HashMap::new() }
    }

    pub fn from_documents(documents: Vec<Document>) -> Self {
        let mut engine = DocumentEngine::new();
        for doc in documents {
            engine.index.insert(doc.id.clone(), engine.documents.len());
            engine.documents.push(doc);
        }
        engine
    }

    pub fn into_documents(self) -> Vec<Document> {
        self.documents
    }

    pub fn count(&self) -> u64 {
        self.documents.len() as u64
    }

    pub fn find_by_id(&self, id: &str) -> Option<Document> {
        self.index.get(id).map(|&pos| self.documents[pos].deep_clone())
    }

    pub fn exists_by_id(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn find_all(&self) -> Vec<Document> {
        self.documents.iter().map(Document::deep_clone).collect()
    }

    fn matching_positions(
        &self,
        filter: &Value,
        supported: &HashSet<&'static str>,
    ) -> Result<Vec<usize>> {
        match analyse_filter(filter)? {
            FilterShape::MatchAll => Ok((0..self.documents.len()).collect()),
            FilterShape::ById(id) => Ok(self.index.get(id).copied().into_iter().collect()),
            FilterShape::General(filter) => {
                query::validate(filter, supported)?;
                let mut positions = Vec::new();
                for (pos, doc) in self.documents.iter().enumerate() {
                    if query::matches(doc, filter)? {
                        positions.push(pos);
                    }
                }
                Ok(positions)
            }
        }
    }

    pub fn find_by_query(
        &self,
        filter: &Value,
        supported: &HashSet<&'static str>,
    ) -> Result<Option<Document>> {
        let positions = self.matching_positions(filter, supported)?;
        Ok(positions.first().map(|&pos| self.documents[pos].deep_clone()))
    }

    pub fn find_many(&self, filter: &Value, supported: &HashSet<&'static str>) -> Result<Vec<Document>> {
        let positions = self.matching_positions(filter, supported)?;
        Ok(positions.into_iter().map(|pos| self.documents[pos].deep_clone()).collect())
    }

    pub fn count_by_query(&self, filter: &Value, supported: &HashSet<&'static str>) -> Result<u64> {
        Ok(self.matching_positions(filter, supported)?.len() as u64)
    }

    /// Inserts `doc`. If `_id` is absent, a collision-free id is
    /// generated. Fails `DuplicateKey` if `_id` is already present.
    pub fn insert(&mut self, mut doc: Document) -> Result<String> {
        if doc.id.is_empty() {
            doc.id = self.generate_id();
        }
        if self.index.contains_key(&doc.id) {
            return Err(StoreError::DuplicateKey(doc.id.clone()));
        }
        let id = doc.id.clone();
        self.index.insert(id.clone(), self.documents.len());
        self.documents.push(doc);
        Ok(id)
    }

    /// Inserts every document in `docs` or none: a `DuplicateKey` partway
    /// through rolls back the ids already inserted by this call, matching
    /// the all-or-nothing feel of a single coordinator write (the
    /// concurrency core never persists a partially-applied batch).
    pub fn insert_many(&mut self, docs: Vec<Document>) -> Result<InsertManyResult> {
        let mut inserted_ids = Vec::with_capacity(docs.len());
        for doc in docs {
            match self.insert(doc) {
                Ok(id) => inserted_ids.push(id),
                Err(e) => {
                    for id in &inserted_ids {
                        self.delete_by_id(id)?;
                    }
                    return Err(e);
                }
            }
        }
        Ok(InsertManyResult { inserted_ids, acknowledged: true })
    }

    fn generate_id(&self) -> String {
        loop {
            let candidate = format!(
                "{}-{}",
                chrono::Utc::now().timestamp_millis(),
                uuid::Uuid::new_v4().simple()
            );
            if !self.index.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn apply_update_at(
        &mut self,
        pos: usize,
        upd: &Value,
        supported: &HashSet<&'static str>,
    ) -> Result<bool> {
        let outcome = update::apply(&self.documents[pos], upd, supported)?;
        if outcome.modified {
            self.documents[pos] = outcome.document;
        }
        Ok(outcome.modified)
    }

    pub fn update_by_id(
        &mut self,
        id: &str,
        upd: &Value,
        supported: &HashSet<&'static str>,
    ) -> Result<MutationResult> {
        match self.index.get(id).copied() {
            None => Ok(MutationResult { matched_count: 0, modified_count: 0, acknowledged: true }),
            Some(pos) => {
                let modified = self.apply_update_at(pos, upd, supported)?;
                Ok(MutationResult { matched_count: 1, modified_count: modified as u64, acknowledged: true })
            }
        }
    }

    /// Updates the first document matching `filter`. No matches ⇒
    /// `DocumentNotFound` (spec §4.5's documented asymmetry with
    /// `replaceByQuery`).
    pub fn update_by_query(
        &mut self,
        filter: &Value,
        upd: &Value,
        query_ops: &HashSet<&'static str>,
        update_ops: &HashSet<&'static str>,
    ) -> Result<MutationResult> {
        let positions = self.matching_positions(filter, query_ops)?;
        let pos = *positions.first().ok_or(StoreError::DocumentNotFound)?;
        let modified = self.apply_update_at(pos, upd, update_ops)?;
        Ok(MutationResult { matched_count: 1, modified_count: modified as u64, acknowledged: true })
    }

    pub fn update_many(
        &mut self,
        filter: &Value,
        upd: &Value,
        query_ops: &HashSet<&'static str>,
        update_ops: &HashSet<&'static str>,
    ) -> Result<MutationResult> {
        let positions = self.matching_positions(filter, query_ops)?;
        let matched = positions.len() as u64;
        let mut modified = 0u64;
        for pos in positions {
            if self.apply_update_at(pos, upd, update_ops)? {
                modified += 1;
            }
        }
        Ok(MutationResult { matched_count: matched, modified_count: modified, acknowledged: true })
    }

    pub fn replace_by_id(&mut self, id: &str, replacement: Value) -> Result<MutationResult> {
        match self.index.get(id).copied() {
            None => Ok(MutationResult { matched_count: 0, modified_count: 0, acknowledged: true }),
            Some(pos) => {
                let modified = self.apply_replacement_at(pos, replacement)?;
                Ok(MutationResult { matched_count: 1, modified_count: modified as u64, acknowledged: true })
            }
        }
    }

    /// No matches ⇒ success with zero counts. Intentional asymmetry with
    /// `update_by_query` (spec §4.5).
    pub fn replace_by_query(
        &mut self,
        filter: &Value,
        replacement: Value,
        supported: &HashSet<&'static str>,
    ) -> Result<MutationResult> {
        let positions = self.matching_positions(filter, supported)?;
        match positions.first() {
            None => Ok(MutationResult { matched_count: 0, modified_count: 0, acknowledged: true }),
            Some(&pos) => {
                let modified = self.apply_replacement_at(pos, replacement)?;
                Ok(MutationResult { matched_count: 1, modified_count: modified as u64, acknowledged: true })
            }
        }
    }

    fn apply_replacement_at(&mut self, pos: usize, replacement: Value) -> Result<bool> {
        let fields = replacement
            .as_object()
            .ok_or_else(|| StoreError::InvalidArgument("replacement must be an object".into()))?;
        if let Some(new_id) = fields.get("_id") {
            if new_id.as_str() != Some(self.documents[pos].id.as_str()) {
                return Err(StoreError::InvalidArgument("replacement document must not change _id".into()));
            }
        }
        let update_doc = Value::Object(fields.clone());
        let outcome = update::apply(&self.documents[pos], &update_doc, &HashSet::new())?;
        if outcome.modified {
            self.documents[pos] = outcome.document;
        }
        Ok(outcome.modified)
    }

    pub fn delete_by_id(&mut self, id: &str) -> Result<DeletionResult> {
        match self.index.remove(id) {
            None => Ok(DeletionResult { deleted_count: 0, acknowledged: true }),
            Some(pos) => {
                self.documents.remove(pos);
                self.reindex_from(pos);
                Ok(DeletionResult { deleted_count: 1, acknowledged: true })
            }
        }
    }

    pub fn delete_by_query(&mut self, filter: &Value, supported: &HashSet<&'static str>) -> Result<DeletionResult> {
        let positions = self.matching_positions(filter, supported)?;
        match positions.first() {
            None => Ok(DeletionResult { deleted_count: 0, acknowledged: true }),
            Some(&pos) => {
                let id = self.documents[pos].id.clone();
                self.index.remove(&id);
                self.documents.remove(pos);
                self.reindex_from(pos);
                Ok(DeletionResult { deleted_count: 1, acknowledged: true })
            }
        }
    }

    pub fn delete_many(&mut self, filter: &Value, supported: &HashSet<&'static str>) -> Result<DeletionResult> {
        let positions = self.matching_positions(filter, supported)?;
        let ids: Vec<String> = positions.iter().map(|&pos| self.documents[pos].id.clone()).collect();
        for id in &ids {
            self.index.remove(id);
        }
        let id_set: HashSet<&String> = ids.iter().collect();
        self.documents.retain(|doc| !id_set.contains(&doc.id));
        self.reindex_from(0);
        Ok(DeletionResult { deleted_count: ids.len() as u64, acknowledged: true })
    }

    fn reindex_from(&mut self, start: usize) {
        for (pos, doc) in self.documents.iter().enumerate().skip(start) {
            self.index.insert(doc.id.clone(), pos);
        }
    }
}

impl Default for DocumentEngine {
    fn default() -> Self {
        Self::new()
    }
}
