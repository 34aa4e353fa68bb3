//! Document (spec §3 data model): an ordered mapping from string keys to
//! `Value`s with a mandatory, immutable-after-insert string `_id`.
//!
//! Grounded on the teacher's `Document` (`document.rs`), simplified: the
//! spec mandates `_id` be a plain string, so the teacher's
//! `DocumentId::{Int,String,ObjectId}` enum collapses to `String` here.

use crate::error::{Result, StoreError};
use crate::field_path;
use crate::value::{deep_clone, Value};
use std::collections::HashMap;

pub const ID_FIELD: &str = "_id";

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: HashMap<String, Value>,
}

impl Document {
    pub fn new(id: String, fields: HashMap<String, Value>) -> Self {
        Document { id, fields }
    }

    /// Build a `Document` from a `Value::Object`, extracting `_id`.
    /// Fails with `InvalidArgument` if `root` is not an object or if it
    /// carries an `_id` that isn't a string.
    pub fn from_value(root: Value) -> Result<Self> {
        let mut map = match root {
            Value::Object(m) => m,
            _ => return Err(StoreError::InvalidArgument("document must be an object".into())),
        };
        let id = match map.remove(ID_FIELD) {
            Some(Value::String(s)) => s,
            Some(_) => {
                return Err(StoreError::InvalidArgument("_id must be a string".into()))
            }
            None => return Err(StoreError::InvalidArgument("document is missing _id".into())),
        };
        Ok(Document { id, fields: map })
    }

    /// Build a `Document` for insertion, where `_id` is optional: the
    /// Document Engine generates one if absent. Still rejects a non-string
    /// `_id` when present.
    pub fn from_value_for_insert(root: Value) -> Result<Self> {
        let mut map = match root {
            Value::Object(m) => m,
            _ => return Err(StoreError::InvalidArgument("document must be an object".into())),
        };
        let id = match map.remove(ID_FIELD) {
            Some(Value::String(s)) => s,
            Some(_) => return Err(StoreError::InvalidArgument("_id must be a string".into())),
            None => String::new(),
        };
        Ok(Document { id, fields: map })
    }

    /// Render as a `Value::Object` with `_id` reinserted as the first
    /// conceptual key (actual JSON key order depends on the backing map).
    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert(ID_FIELD.to_string(), Value::String(self.id.clone()));
        Value::Object(map)
    }

    pub fn deep_clone(&self) -> Document {
        Document {
            id: self.id.clone(),
            fields: self
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), deep_clone(v)))
                .collect(),
        }
    }

    /// Dot-path accessor over the full document, including `_id`.
    pub fn get_path(&self, path: &str) -> Option<Value> {
        if path == ID_FIELD {
            return Some(Value::String(self.id.clone()));
        }
        let root = self.to_value();
        field_path::get(&root, path).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_value_extracts_id() {
        let v = Value::Object(
            vec![
                ("_id".to_string(), Value::String("u1".to_string())),
                ("name".to_string(), Value::String("Anna".to_string())),
            ]
            .into_iter()
            .collect(),
        );
        let doc = Document::from_value(v).unwrap();
        assert_eq!(doc.id, "u1");
        assert_eq!(doc.fields.get("name"), Some(&Value::String("Anna".to_string())));
    }

    #[test]
    fn from_value_rejects_missing_id() {
        let v = Value::Object(Default::default());
        assert!(matches!(
            Document::from_value(v).unwrap_err(),
            StoreError::InvalidArgument(_)
        ));
    }

    #[test]
    fn from_value_for_insert_allows_missing_id() {
        let v = Value::Object(
            vec![("name".to_string(), Value::String("Anna".to_string()))].into_iter().collect(),
        );
        let doc = Document::from_value_for_insert(v).unwrap();
        assert!(doc.id.is_empty());
    }

    #[test]
    fn from_value_for_insert_rejects_non_string_id() {
        let v = Value::Object(vec![("_id".to_string(), Value::Number(1.0))].into_iter().collect());
        assert!(matches!(
            Document::from_value_for_insert(v).unwrap_err(),
            StoreError::InvalidArgument(_)
        ));
    }

    #[test]
    fn to_value_round_trips() {
        let doc = Document::new(
            "u1".to_string(),
            vec![("age".to_string(), Value::Number(30.0))].into_iter().collect(),
        );
        let v = doc.to_value();
        let back = Document::from_value(v).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn get_path_resolves_nested_and_id() {
        let doc = Document::new(
            "u2".to_string(),
            vec![(
                "stats".to_string(),
                Value::Object(vec![("score".to_string(), Value::Number(100.0))].into_iter().collect()),
            )]
            .into_iter()
            .collect(),
        );
        assert_eq!(doc.get_path("stats.score"), Some(Value::Number(100.0)));
        assert_eq!(doc.get_path("_id"), Some(Value::String("u2".to_string())));
        assert_eq!(doc.get_path("missing.path"), None);
    }
}
