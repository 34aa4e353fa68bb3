//! Collection Blob (spec §3): the JSON shape persisted in the file
//! service for one collection — `{ name, metadata, documents }`.

use crate::document::Document;
use crate::error::{Result, StoreError};
use crate::value::Value;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct CollectionMetadata {
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub document_count: u64,
}

#[derive(Debug, Clone)]
pub struct CollectionBlob {
    pub name: String,
    pub metadata: CollectionMetadata,
    /// Insertion-ordered: a `Vec` plus an index rather than a bare map, so
    /// reads preserve storage insertion order per spec §4.3's
    /// determinism clause. Grounded on the teacher's
    /// `MemoryStorage`'s `HashMap<String, Vec<Document>>` layout.
    pub documents: Vec<Document>,
}

impl CollectionBlob {
    pub fn new(name: String, now: DateTime<Utc>) -> Self {
        CollectionBlob {
            name,
            metadata: CollectionMetadata { created: now, last_updated: now, document_count: 0 },
            documents: Vec::new(),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut root = HashMap::new();
        root.insert("name".to_string(), Value::String(self.name.clone()));
        let mut meta = HashMap::new();
        meta.insert("created".to_string(), Value::Date(self.metadata.created));
        meta.insert("lastUpdated".to_string(), Value::Date(self.metadata.last_updated));
        meta.insert("documentCount".to_string(), Value::Number(self.metadata.document_count as f64));
        root.insert("metadata".to_string(), Value::Object(meta));
        let mut docs = HashMap::new();
        for doc in &self.documents {
            docs.insert(doc.id.clone(), doc.to_value());
        }
        root.insert("documents".to_string(), Value::Object(docs));
        // `documents` is a map per §3's data model, and a plain HashMap
        // does not remember insertion order on its own — record it
        // explicitly so a reload preserves the order documents were
        // inserted in, per §4.3's determinism clause.
        root.insert(
            "documentOrder".to_string(),
            Value::Array(self.documents.iter().map(|d| Value::String(d.id.clone())).collect()),
        );
        Value::Object(root)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let root = value
            .as_object()
            .ok_or_else(|| StoreError::InvalidFileFormat("collection blob must be an object".into()))?;

        let name = root
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::InvalidFileFormat("collection blob missing name".into()))?
            .to_string();

        let meta = root
            .get("metadata")
            .and_then(Value::as_object)
            .ok_or_else(|| StoreError::InvalidFileFormat("collection blob missing metadata".into()))?;
        let created = date_field(meta, "created")?;
        let last_updated = date_field(meta, "lastUpdated")?;
        let document_count = meta
            .get("documentCount")
            .and_then(Value::as_f64)
            .ok_or_else(|| StoreError::InvalidFileFormat("metadata.documentCount missing".into()))?
            as u64;

        let docs_map = root
            .get("documents")
            .and_then(Value::as_object)
            .ok_or_else(|| StoreError::InvalidFileFormat("collection blob missing documents".into()))?;

        let order: Vec<String> = match root.get("documentOrder").and_then(Value::as_array) {
            Some(ids) => ids.iter().filter_map(Value::as_str).map(str::to_string).collect(),
            // Legacy/foreign blobs without an explicit order: fall back to
            // whatever order the decoded map yields.
            None => docs_map.keys().cloned().collect(),
        };

        let mut documents = Vec::with_capacity(docs_map.len());
        for id in &order {
            let doc_value = docs_map
                .get(id)
                .ok_or_else(|| StoreError::InvalidFileFormat(format!("documentOrder names unknown id {id}")))?;
            let doc = Document::from_value(doc_value.clone())?;
            if &doc.id != id {
                return Err(StoreError::InvalidFileFormat(format!(
                    "document key {id} does not match its _id {}",
                    doc.id
                )));
            }
            documents.push(doc);
        }

        Ok(CollectionBlob {
            name,
            metadata: CollectionMetadata { created, last_updated, document_count },
            documents,
        })
    }
}

fn date_field(map: &HashMap<String, Value>, key: &str) -> Result<DateTime<Utc>> {
    match map.get(key) {
        Some(Value::Date(d)) => Ok(*d),
        _ => Err(StoreError::InvalidFileFormat(format!("metadata.{key} missing or not a date"))),
    }
}
