//! Query Engine (component C3): compiles and evaluates match expressions.
//!
//! Grounded on the teacher's `query/operators.rs` and its operator-table
//! dispatch style (spec §9 "operator tables, not switch chains"); the
//! update engine's sibling table (`update::OPERATOR_TABLE`) uses a real
//! `lazy_static` map of function pointers, while this module's condition
//! operators dispatch on a `match` since each depends on the resolved
//! field value rather than operating on the document alone. Simplified to
//! the operator set spec.md and `SPEC_FULL.md` §C name: `$eq`/`$gt`/`$lt`/
//! `$and`/`$or` always on, `$ne`/`$in`/`$nin`/`$exists` gated by
//! `Config::supported_query_operators`.

use crate::document::Document;
use crate::error::{Result, StoreError};
use crate::value::Value;
use std::cmp::Ordering;
use std::collections::HashSet;

/// The comparison/logical operators a query may use. Always-on members
/// mirror spec.md §4.3 exactly; the rest are the §C supplemental set.
pub fn default_supported_operators() -> HashSet<&'static str> {
    ["$eq", "$gt", "$lt", "$and", "$or"].into_iter().collect()
}

pub fn all_known_operators() -> HashSet<&'static str> {
    ["$eq", "$gt", "$lt", "$and", "$or", "$ne", "$in", "$nin", "$exists"]
        .into_iter()
        .collect()
}

/// Compare two values on the total ordering defined for
/// (number,number), (string,string), (Date,Date). Any other pairing does
/// not compare (cross-type never matches, never errors).
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y),
        (Value::String(x), Value::String(y)) => x.partial_cmp(y),
        (Value::Date(x), Value::Date(y)) => x.partial_cmp(y),
        _ => None,
    }
}

/// Structural equality matching Codec/Query `$eq` semantics: Dates compare
/// by epoch, arrays/objects compare structurally, everything else by
/// value.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Date(x), Value::Date(y)) => x == y,
        _ => a == b,
    }
}

/// Equality against a resolved field value, honouring the
/// array-contains-scalar and missing-vs-null rules.
fn matches_equality(resolved: Option<&Value>, literal: &Value) -> bool {
    match literal {
        Value::Null => resolved.is_none() || matches!(resolved, Some(Value::Null)),
        _ => match resolved {
            None => false,
            Some(Value::Array(items)) => {
                if let Value::Array(_) = literal {
                    values_equal(resolved.unwrap(), literal)
                } else {
                    items.iter().any(|item| values_equal(item, literal))
                }
            }
            Some(v) => values_equal(v, literal),
        },
    }
}

fn resolve(document: &Document, path: &str) -> Option<Value> {
    document.get_path(path)
}

/// Validate a query document against `supported` before any document is
/// scanned. Mirrors the structural checks `matches` relies on so an
/// invalid query never silently matches nothing.
pub fn validate(filter: &Value, supported: &HashSet<&'static str>) -> Result<()> {
    let map = match filter {
        Value::Object(m) => m,
        _ => return Err(StoreError::InvalidQuery("filter must be an object".into())),
    };
    for (key, value) in map {
        if key.starts_with('$') {
            if !supported.contains(key.as_str()) {
                return Err(StoreError::InvalidQuery(format!("unknown operator: {key}")));
            }
            match key.as_str() {
                "$and" | "$or" => {
                    let items = value.as_array().ok_or_else(|| {
                        StoreError::InvalidQuery(format!("{key} requires an array of sub-queries"))
                    })?;
                    for sub in items {
                        validate(sub, supported)?;
                    }
                }
                other => {
                    return Err(StoreError::InvalidQuery(format!(
                        "{other} is not valid as a top-level query key"
                    )))
                }
            }
        } else if let Value::Object(cond) = value {
            for op in cond.keys() {
                if !op.starts_with('$') {
                    continue; // nested literal object match, not a condition map
                }
                if !supported.contains(op.as_str()) {
                    return Err(StoreError::InvalidQuery(format!("unknown operator: {op}")));
                }
                if !matches!(op.as_str(), "$eq" | "$ne" | "$gt" | "$lt" | "$in" | "$nin" | "$exists") {
                    return Err(StoreError::InvalidQuery(format!(
                        "{op} is not a valid field-condition operator"
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Evaluate `filter` against `document`. Callers must call `validate`
/// first (the Document Engine does so once per query execution, not once
/// per document, per spec.md §4.3 "revalidated on each execution").
pub fn matches(document: &Document, filter: &Value) -> Result<bool> {
    let map = match filter {
        Value::Object(m) => m,
        _ => return Err(StoreError::InvalidQuery("filter must be an object".into())),
    };
    for (key, value) in map {
        let ok = if key == "$and" {
            let items = value
                .as_array()
                .ok_or_else(|| StoreError::InvalidQuery("$and requires an array".into()))?;
            let mut all = true;
            for sub in items {
                if !matches(document, sub)? {
                    all = false;
                    break;
                }
            }
            all
        } else if key == "$or" {
            let items = value
                .as_array()
                .ok_or_else(|| StoreError::InvalidQuery("$or requires an array".into()))?;
            if items.is_empty() {
                false
            } else {
                let mut any = false;
                for sub in items {
                    if matches(document, sub)? {
                        any = true;
                        break;
                    }
                }
                any
            }
        } else {
            matches_field_condition(document, key, value)?
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matches_field_condition(document: &Document, path: &str, condition: &Value) -> Result<bool> {
    let resolved = resolve(document, path);
    match condition {
        Value::Object(cond) if !cond.is_empty() && cond.keys().all(|k| k.starts_with('$')) => {
            for (op, operand) in cond {
                let ok = match op.as_str() {
                    "$eq" => matches_equality(resolved.as_ref(), operand),
                    "$ne" => !matches_equality(resolved.as_ref(), operand),
                    "$gt" => resolved
                        .as_ref()
                        .and_then(|v| compare_values(v, operand))
                        .map(|o| o == Ordering::Greater)
                        .unwrap_or(false),
                    "$lt" => resolved
                        .as_ref()
                        .and_then(|v| compare_values(v, operand))
                        .map(|o| o == Ordering::Less)
                        .unwrap_or(false),
                    "$in" => {
                        let candidates = operand.as_array().ok_or_else(|| {
                            StoreError::InvalidQuery("$in requires an array".into())
                        })?;
                        candidates.iter().any(|c| matches_equality(resolved.as_ref(), c))
                    }
                    "$nin" => {
                        let candidates = operand.as_array().ok_or_else(|| {
                            StoreError::InvalidQuery("$nin requires an array".into())
                        })?;
                        !candidates.iter().any(|c| matches_equality(resolved.as_ref(), c))
                    }
                    "$exists" => {
                        let want = matches!(operand, Value::Bool(true));
                        resolved.is_some() == want
                    }
                    other => {
                        return Err(StoreError::InvalidQuery(format!("unknown operator: {other}")))
                    }
                };
                if !ok {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        literal => Ok(matches_equality(resolved.as_ref(), literal)),
    }
}
