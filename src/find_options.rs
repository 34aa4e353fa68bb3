//! Find options (SPEC_FULL.md §C supplemental feature): projection, sort,
//! limit, skip on reads. Grounded on the teacher's `find_options.rs`,
//! retargeted from `serde_json::Value` to this crate's `Value` and from
//! `get_nested_value` to `field_path::get`.
//!
//! Reads already materialise a full `Vec<Document>` (§1 Non-goals: "no
//! streaming cursors"), so these are pure post-filters over that vector —
//! they touch no concurrency surface and are applied entirely within the
//! Facade, after the Coordinator/Document Engine have already produced
//! their result.

use crate::document::Document;
use crate::value::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// field → 1 (include) or 0 (exclude). `_id` is included by default in
    /// include-mode unless explicitly excluded, matching the teacher's rule.
    pub projection: Option<HashMap<String, i32>>,
    /// `[(field, direction)]`, direction 1 ascending, -1 descending.
    /// Earlier entries take priority; ties fall through to the next entry.
    pub sort: Option<Vec<(String, i32)>>,
    pub limit: Option<usize>,
    pub skip: Option<usize>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projection(mut self, projection: HashMap<String, i32>) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_sort(mut self, sort: Vec<(String, i32)>) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }
}

/// Apply projection to one document's `Value::Object` rendering.
/// Include-mode and exclude-mode are mutually exclusive, same detection
/// rule as the teacher: any inclusion with no non-`_id` exclusion means
/// include-mode.
pub fn apply_projection(doc: &Value, projection: &HashMap<String, i32>) -> Value {
    if projection.is_empty() {
        return doc.clone();
    }
    let obj = match doc.as_object() {
        Some(m) => m,
        None => return doc.clone(),
    };

    let has_inclusions = projection.values().any(|&v| v == 1);
    let has_non_id_exclusions = projection.iter().any(|(field, &action)| action == 0 && field != "_id");
    let include_mode = has_inclusions && !has_non_id_exclusions;

    let mut result = HashMap::new();
    if include_mode {
        for (field, &action) in projection {
            if action == 1 {
                if let Some(value) = crate::field_path::get(doc, field) {
                    result.insert(field.clone(), value.clone());
                }
            }
        }
        if projection.get("_id") != Some(&0) {
            if let Some(id) = obj.get("_id") {
                result.insert("_id".to_string(), id.clone());
            }
        }
    } else {
        for (key, value) in obj {
            if projection.get(key) != Some(&0) {
                result.insert(key.clone(), value.clone());
            }
        }
    }
    Value::Object(result)
}

/// Sort by type priority `Null < Number < String < Bool < Object < Array`
/// across mixed types, matching within a type by natural order. Missing
/// keys sort as `None < Some`, mirroring the teacher's "null sorts first"
/// rule.
fn type_priority(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::Date(_) => 1,
        Value::String(_) => 2,
        Value::Bool(_) => 3,
        Value::Object(_) => 4,
        Value::Array(_) => 5,
    }
}

fn compare_for_sort(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Some(Value::Date(x)), Some(Value::Date(y))) => x.cmp(y),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(a_val), Some(b_val)) => type_priority(a_val).cmp(&type_priority(b_val)),
    }
}

/// Sort documents in place by a prioritised list of dotted field paths.
pub fn apply_sort(docs: &mut [Document], sort: &[(String, i32)]) {
    if sort.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for (field, direction) in sort {
            let va = a.get_path(field);
            let vb = b.get_path(field);
            let cmp = compare_for_sort(va.as_ref(), vb.as_ref());
            if cmp != Ordering::Equal {
                return if *direction >= 0 { cmp } else { cmp.reverse() };
            }
        }
        Ordering::Equal
    });
}

/// Apply skip then limit, in that order (matching MongoDB's cursor
/// semantics: skip offsets before limit bounds the window).
pub fn apply_limit_skip(docs: Vec<Document>, limit: Option<usize>, skip: Option<usize>) -> Vec<Document> {
    let skip_count = skip.unwrap_or(0);
    if skip_count >= docs.len() {
        return Vec::new();
    }
    let start = skip_count;
    let end = match limit {
        Some(n) => (start + n).min(docs.len()),
        None => docs.len(),
    };
    docs[start..end].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, fields: Vec<(&str, Value)>) -> Document {
        Document::new(id.to_string(), fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    #[test]
    fn projection_include_mode_keeps_id_by_default() {
        let d = doc("u1", vec![("name", Value::String("Anna".into())), ("age", Value::Number(30.0))]);
        let projection: HashMap<String, i32> =
            vec![("name".to_string(), 1)].into_iter().collect();
        let out = apply_projection(&d.to_value(), &projection);
        let m = out.as_object().unwrap();
        assert!(m.contains_key("name"));
        assert!(m.contains_key("_id"));
        assert!(!m.contains_key("age"));
    }

    #[test]
    fn projection_can_exclude_id_explicitly() {
        let d = doc("u1", vec![("name", Value::String("Anna".into()))]);
        let projection: HashMap<String, i32> =
            vec![("name".to_string(), 1), ("_id".to_string(), 0)].into_iter().collect();
        let out = apply_projection(&d.to_value(), &projection);
        assert!(!out.as_object().unwrap().contains_key("_id"));
    }

    #[test]
    fn projection_exclude_mode_drops_named_fields_only() {
        let d = doc("u1", vec![("name", Value::String("Anna".into())), ("age", Value::Number(30.0))]);
        let projection: HashMap<String, i32> = vec![("age".to_string(), 0)].into_iter().collect();
        let out = apply_projection(&d.to_value(), &projection);
        let m = out.as_object().unwrap();
        assert!(m.contains_key("name"));
        assert!(m.contains_key("_id"));
        assert!(!m.contains_key("age"));
    }

    #[test]
    fn sort_orders_ascending_then_descending() {
        let mut docs = vec![
            doc("a", vec![("age", Value::Number(30.0))]),
            doc("b", vec![("age", Value::Number(10.0))]),
            doc("c", vec![("age", Value::Number(20.0))]),
        ];
        apply_sort(&mut docs, &[("age".to_string(), 1)]);
        assert_eq!(docs.iter().map(|d| d.id.clone()).collect::<Vec<_>>(), vec!["b", "c", "a"]);
        apply_sort(&mut docs, &[("age".to_string(), -1)]);
        assert_eq!(docs.iter().map(|d| d.id.clone()).collect::<Vec<_>>(), vec!["a", "c", "b"]);
    }

    #[test]
    fn skip_then_limit_windows_the_sequence() {
        let docs = vec![doc("a", vec![]), doc("b", vec![]), doc("c", vec![]), doc("d", vec![])];
        let windowed = apply_limit_skip(docs, Some(2), Some(1));
        assert_eq!(windowed.iter().map(|d| d.id.clone()).collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[test]
    fn skip_past_end_returns_empty() {
        let docs = vec![doc("a", vec![])];
        assert!(apply_limit_skip(docs, None, Some(5)).is_empty());
    }
}
