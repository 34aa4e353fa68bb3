//! Update Engine (component C4): applies replacement documents or operator
//! documents to produce a new document.
//!
//! Grounded on the teacher's `collection_core::apply_update_operators`,
//! restructured as an operator table (`lazy_static` registry of function
//! pointers) per spec §9's "operator tables, not switch chains", and
//! tightened to match spec.md §4.4's precise matched-vs-modified rule,
//! which the teacher's flag-based version does not implement.

use crate::document::{Document, ID_FIELD};
use crate::error::{Result, StoreError};
use crate::field_path;
use crate::query;
use crate::value::Value;
use lazy_static::lazy_static;
use std::collections::HashMap;

pub fn default_supported_operators() -> std::collections::HashSet<&'static str> {
    ["$set", "$unset", "$inc", "$push", "$addToSet"].into_iter().collect()
}

pub fn all_known_operators() -> std::collections::HashSet<&'static str> {
    ["$set", "$unset", "$inc", "$push", "$addToSet", "$pull", "$pop"]
        .into_iter()
        .collect()
}

type OperatorFn = fn(&mut Document, &Value) -> Result<()>;

lazy_static! {
    static ref OPERATOR_TABLE: HashMap<&'static str, OperatorFn> = {
        let mut m: HashMap<&'static str, OperatorFn> = HashMap::new();
        m.insert("$set", apply_set);
        m.insert("$unset", apply_unset);
        m.insert("$inc", apply_inc);
        m.insert("$push", apply_push);
        m.insert("$addToSet", apply_add_to_set);
        m.insert("$pull", apply_pull);
        m.insert("$pop", apply_pop);
        m
    };
}

/// Result of applying one update to one document: whether it matched
/// (always true when called — the Document Engine only invokes this on
/// documents already selected by a filter) and whether the post-image
/// differs from the pre-image under canonical serialisation.
pub struct ApplyOutcome {
    pub modified: bool,
    pub document: Document,
}

/// Apply `update` to `original`, returning the new document and whether
/// it was actually modified. `update` is either a replacement document
/// (no `$`-prefixed top-level keys) or an operator document (all
/// top-level keys `$`-prefixed from `supported`).
pub fn apply(
    original: &Document,
    update: &Value,
    supported: &std::collections::HashSet<&'static str>,
) -> Result<ApplyOutcome> {
    let map = match update {
        Value::Object(m) => m,
        _ => return Err(StoreError::InvalidUpdate("update must be an object".into())),
    };
    if map.is_empty() {
        return Err(StoreError::InvalidUpdate("update document must not be empty".into()));
    }

    let is_operator_doc = map.keys().any(|k| k.starts_with('$'));
    let is_plain_doc = map.keys().any(|k| !k.starts_with('$'));
    if is_operator_doc && is_plain_doc {
        return Err(StoreError::InvalidUpdate(
            "update document mixes operator and non-operator keys".into(),
        ));
    }

    if is_plain_doc {
        return apply_replacement(original, map);
    }

    let mut working = original.deep_clone();
    for (op, operand) in map {
        if !supported.contains(op.as_str()) {
            return Err(StoreError::InvalidUpdate(format!("unsupported update operator: {op}")));
        }
        let f = OPERATOR_TABLE
            .get(op.as_str())
            .ok_or_else(|| StoreError::InvalidUpdate(format!("unknown update operator: {op}")))?;
        f(&mut working, operand)?;
    }

    let modified = !canonically_equal(original, &working);
    Ok(ApplyOutcome { modified, document: working })
}

fn apply_replacement(
    original: &Document,
    replacement: &HashMap<String, Value>,
) -> Result<ApplyOutcome> {
    if let Some(new_id) = replacement.get(ID_FIELD) {
        if new_id.as_str() != Some(original.id.as_str()) {
            return Err(StoreError::InvalidArgument(
                "replacement document must not change _id".into(),
            ));
        }
    }
    let mut fields = replacement.clone();
    fields.remove(ID_FIELD);
    let replaced = Document::new(original.id.clone(), fields);
    let modified = !canonically_equal(original, &replaced);
    Ok(ApplyOutcome { modified, document: replaced })
}

/// Structural equality, not a serialise-then-compare-strings round trip:
/// `Document`'s `PartialEq` already compares `HashMap`s by content, which
/// is independent of either map's iteration order (and thus of whichever
/// `RandomState` seed each happens to carry after a clone vs. a rebuild).
fn canonically_equal(a: &Document, b: &Document) -> bool {
    a == b
}

fn reject_id_path(path: &str) -> Result<()> {
    if path == ID_FIELD || path.starts_with("_id.") {
        return Err(StoreError::InvalidArgument("_id is immutable".into()));
    }
    Ok(())
}

fn apply_set(doc: &mut Document, operand: &Value) -> Result<()> {
    let map = operand
        .as_object()
        .ok_or_else(|| StoreError::InvalidUpdate("$set requires an object".into()))?;
    let mut root = Value::Object(doc.fields.clone());
    for (path, value) in map {
        reject_id_path(path)?;
        field_path::set(&mut root, path, value.clone())?;
    }
    doc.fields = root.as_object().cloned().unwrap_or_default();
    Ok(())
}

fn apply_unset(doc: &mut Document, operand: &Value) -> Result<()> {
    let map = operand
        .as_object()
        .ok_or_else(|| StoreError::InvalidUpdate("$unset requires an object".into()))?;
    let mut root = Value::Object(doc.fields.clone());
    for path in map.keys() {
        reject_id_path(path)?;
        field_path::unset(&mut root, path);
    }
    doc.fields = root.as_object().cloned().unwrap_or_default();
    Ok(())
}

fn apply_inc(doc: &mut Document, operand: &Value) -> Result<()> {
    let map = operand
        .as_object()
        .ok_or_else(|| StoreError::InvalidUpdate("$inc requires an object".into()))?;
    let mut root = Value::Object(doc.fields.clone());
    for (path, delta) in map {
        reject_id_path(path)?;
        let n = delta
            .as_f64()
            .ok_or_else(|| StoreError::InvalidUpdate(format!("$inc operand at {path} must be a number")))?;
        let current = field_path::get(&root, path).cloned().unwrap_or(Value::Number(0.0));
        let current = match current {
            Value::Number(v) => v,
            Value::Null => 0.0,
            _ => {
                return Err(StoreError::InvalidUpdate(format!(
                    "$inc target at {path} is not a number"
                )))
            }
        };
        field_path::set(&mut root, path, Value::Number(current + n))?;
    }
    doc.fields = root.as_object().cloned().unwrap_or_default();
    Ok(())
}

fn each_elements(operand: &Value) -> Result<Vec<Value>> {
    match operand {
        Value::Object(m) if m.len() == 1 && m.contains_key("$each") => {
            let arr = m["$each"]
                .as_array()
                .ok_or_else(|| StoreError::InvalidUpdate("$each requires an array".into()))?;
            Ok(arr.clone())
        }
        other => Ok(vec![other.clone()]),
    }
}

fn apply_push(doc: &mut Document, operand: &Value) -> Result<()> {
    let map = operand
        .as_object()
        .ok_or_else(|| StoreError::InvalidUpdate("$push requires an object".into()))?;
    let mut root = Value::Object(doc.fields.clone());
    for (path, spec) in map {
        reject_id_path(path)?;
        let additions = each_elements(spec)?;
        let current = field_path::get(&root, path).cloned();
        let mut arr = match current {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(a)) => a,
            Some(_) => {
                return Err(StoreError::InvalidUpdate(format!(
                    "$push target at {path} is not a sequence"
                )))
            }
        };
        arr.extend(additions);
        field_path::set(&mut root, path, Value::Array(arr))?;
    }
    doc.fields = root.as_object().cloned().unwrap_or_default();
    Ok(())
}

fn apply_add_to_set(doc: &mut Document, operand: &Value) -> Result<()> {
    let map = operand
        .as_object()
        .ok_or_else(|| StoreError::InvalidUpdate("$addToSet requires an object".into()))?;
    let mut root = Value::Object(doc.fields.clone());
    for (path, spec) in map {
        reject_id_path(path)?;
        let candidates = each_elements(spec)?;
        let current = field_path::get(&root, path).cloned();
        let mut arr = match current {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(a)) => a,
            Some(_) => {
                return Err(StoreError::InvalidUpdate(format!(
                    "$addToSet target at {path} is not a sequence"
                )))
            }
        };
        for candidate in candidates {
            if !arr.iter().any(|existing| structurally_equal(existing, &candidate)) {
                arr.push(candidate);
            }
        }
        field_path::set(&mut root, path, Value::Array(arr))?;
    }
    doc.fields = root.as_object().cloned().unwrap_or_default();
    Ok(())
}

/// Supplemental operator (SPEC_FULL.md §C), gated off by default: removes
/// every array element matching `spec` (a literal or a condition object
/// evaluated with Query $eq semantics).
fn apply_pull(doc: &mut Document, operand: &Value) -> Result<()> {
    let map = operand
        .as_object()
        .ok_or_else(|| StoreError::InvalidUpdate("$pull requires an object".into()))?;
    let mut root = Value::Object(doc.fields.clone());
    for (path, condition) in map {
        reject_id_path(path)?;
        let current = field_path::get(&root, path).cloned();
        let arr = match current {
            None | Some(Value::Null) => continue,
            Some(Value::Array(a)) => a,
            Some(_) => {
                return Err(StoreError::InvalidUpdate(format!(
                    "$pull target at {path} is not a sequence"
                )))
            }
        };
        let filtered: Vec<Value> = arr
            .into_iter()
            .filter(|item| !value_matches_pull_condition(item, condition))
            .collect();
        field_path::set(&mut root, path, Value::Array(filtered))?;
    }
    doc.fields = root.as_object().cloned().unwrap_or_default();
    Ok(())
}

/// Supplemental operator (SPEC_FULL.md §C), gated off by default: removes
/// the first (`-1`) or last (`1`) element of the array at `path`.
fn apply_pop(doc: &mut Document, operand: &Value) -> Result<()> {
    let map = operand
        .as_object()
        .ok_or_else(|| StoreError::InvalidUpdate("$pop requires an object".into()))?;
    let mut root = Value::Object(doc.fields.clone());
    for (path, direction) in map {
        reject_id_path(path)?;
        let current = field_path::get(&root, path).cloned();
        let mut arr = match current {
            None | Some(Value::Null) => continue,
            Some(Value::Array(a)) => a,
            Some(_) => {
                return Err(StoreError::InvalidUpdate(format!(
                    "$pop target at {path} is not a sequence"
                )))
            }
        };
        if arr.is_empty() {
            continue;
        }
        match direction.as_f64() {
            Some(n) if n < 0.0 => {
                arr.remove(0);
            }
            _ => {
                arr.pop();
            }
        }
        field_path::set(&mut root, path, Value::Array(arr))?;
    }
    doc.fields = root.as_object().cloned().unwrap_or_default();
    Ok(())
}

fn structurally_equal(a: &Value, b: &Value) -> bool {
    a == b
}

fn value_matches_pull_condition(item: &Value, condition: &Value) -> bool {
    match condition {
        Value::Object(cond) if cond.keys().all(|k| k.starts_with('$')) => {
            let wrapped_doc = Document::new(String::new(), {
                let mut m = HashMap::new();
                m.insert("v".to_string(), item.clone());
                m
            });
            let wrapped_filter = Value::Object({
                let mut m = HashMap::new();
                m.insert("v".to_string(), condition.clone());
                m
            });
            query::matches(&wrapped_doc, &wrapped_filter).unwrap_or(false)
        }
        literal => structurally_equal(item, literal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, fields: Vec<(&str, Value)>) -> Document {
        Document::new(
            id.to_string(),
            fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        )
    }

    fn obj(pairs: Vec<(&str, Value)>) -> Value {
        Value::Object(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    #[test]
    fn set_inc_push_combo_matches_scenario() {
        let d = doc(
            "u2",
            vec![
                ("stats", obj(vec![("score", Value::Number(100.0)), ("level", Value::Number(1.0))])),
                ("tags", Value::Array(vec![Value::String("beginner".into())])),
            ],
        );
        let update = obj(vec![
            ("$set", obj(vec![("name", Value::String("Adv".into()))])),
            ("$inc", obj(vec![("stats.score", Value::Number(50.0)), ("stats.level", Value::Number(1.0))])),
            ("$push", obj(vec![("tags", Value::String("advanced".into()))])),
        ]);
        let outcome = apply(&d, &update, &default_supported_operators()).unwrap();
        assert!(outcome.modified);
        assert_eq!(outcome.document.fields.get("name"), Some(&Value::String("Adv".into())));
        let stats = outcome.document.fields.get("stats").unwrap().as_object().unwrap();
        assert_eq!(stats.get("score"), Some(&Value::Number(150.0)));
        assert_eq!(stats.get("level"), Some(&Value::Number(2.0)));
        let tags = outcome.document.fields.get("tags").unwrap().as_array().unwrap();
        assert_eq!(tags.len(), 2);
    }

    #[test]
    fn replacement_preserves_id_and_drops_fields() {
        let d = doc("u3", vec![("a", Value::Number(1.0)), ("b", Value::Number(2.0))]);
        let replacement = obj(vec![("a", Value::Number(9.0)), ("c", Value::Number(3.0))]);
        let outcome = apply(&d, &replacement, &default_supported_operators()).unwrap();
        assert_eq!(outcome.document.id, "u3");
        assert!(!outcome.document.fields.contains_key("b"));
        assert_eq!(outcome.document.fields.get("c"), Some(&Value::Number(3.0)));
        assert!(outcome.modified);
    }

    #[test]
    fn replacement_changing_id_is_rejected() {
        let d = doc("u3", vec![]);
        let replacement = obj(vec![("_id", Value::String("other".into()))]);
        let err = apply(&d, &replacement, &default_supported_operators()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[test]
    fn set_on_id_is_rejected() {
        let d = doc("u3", vec![]);
        let update = obj(vec![("$set", obj(vec![("_id", Value::String("x".into()))]))]);
        let err = apply(&d, &update, &default_supported_operators()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[test]
    fn mixed_operator_and_plain_keys_rejected() {
        let d = doc("u3", vec![]);
        let update = obj(vec![("$set", obj(vec![("a", Value::Number(1.0))])), ("b", Value::Number(2.0))]);
        assert!(matches!(
            apply(&d, &update, &default_supported_operators()).unwrap_err(),
            StoreError::InvalidUpdate(_)
        ));
    }

    #[test]
    fn empty_update_rejected() {
        let d = doc("u3", vec![]);
        assert!(matches!(
            apply(&d, &Value::Object(HashMap::new()), &default_supported_operators()).unwrap_err(),
            StoreError::InvalidUpdate(_)
        ));
    }

    #[test]
    fn empty_each_push_is_matched_not_modified() {
        let d = doc("u3", vec![("tags", Value::Array(vec![]))]);
        let update = obj(vec![("$push", obj(vec![("tags", obj(vec![("$each", Value::Array(vec![]))]))]))]);
        let outcome = apply(&d, &update, &default_supported_operators()).unwrap();
        assert!(!outcome.modified);
    }

    #[test]
    fn add_to_set_existing_element_is_noop() {
        let d = doc("u3", vec![("tags", Value::Array(vec![Value::String("a".into())]))]);
        let update = obj(vec![("$addToSet", obj(vec![("tags", Value::String("a".into()))]))]);
        let outcome = apply(&d, &update, &default_supported_operators()).unwrap();
        assert!(!outcome.modified);
        assert_eq!(outcome.document.fields.get("tags").unwrap().as_array().unwrap().len(), 1);
    }

    #[test]
    fn unset_absent_path_is_noop_and_not_modified() {
        let d = doc("u3", vec![("a", Value::Number(1.0))]);
        let update = obj(vec![("$unset", obj(vec![("b", Value::String(String::new()))]))]);
        let outcome = apply(&d, &update, &default_supported_operators()).unwrap();
        assert!(!outcome.modified);
    }

    #[test]
    fn inc_on_missing_path_treats_as_zero() {
        let d = doc("u3", vec![]);
        let update = obj(vec![("$inc", obj(vec![("score", Value::Number(5.0))]))]);
        let outcome = apply(&d, &update, &default_supported_operators()).unwrap();
        assert_eq!(outcome.document.fields.get("score"), Some(&Value::Number(5.0)));
    }

    #[test]
    fn push_on_non_sequence_is_invalid_update() {
        let d = doc("u3", vec![("tags", Value::Number(1.0))]);
        let update = obj(vec![("$push", obj(vec![("tags", Value::String("x".into()))]))]);
        assert!(matches!(
            apply(&d, &update, &default_supported_operators()).unwrap_err(),
            StoreError::InvalidUpdate(_)
        ));
    }

    #[test]
    fn pull_supplemental_operator_removes_matching_elements() {
        let d = doc(
            "u3",
            vec![("tags", Value::Array(vec![Value::String("a".into()), Value::String("b".into())]))],
        );
        let update = obj(vec![("$pull", obj(vec![("tags", Value::String("a".into()))]))]);
        let outcome = apply(&d, &update, &all_known_operators()).unwrap();
        let tags = outcome.document.fields.get("tags").unwrap().as_array().unwrap();
        assert_eq!(tags, &vec![Value::String("b".into())]);
    }
}
