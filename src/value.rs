//! Codec (spec §4.1, component C1).
//!
//! `Value` is the document value domain as a tagged sum — `Null | Bool |
//! Number | String | Date | Array | Object` — kept distinct from
//! `serde_json::Value` so that `Date` survives the JSON boundary instead of
//! collapsing into `String`. `serde_json::Value` is used only as the wire
//! format at `serialise`/`deserialise`; nothing upstream of the Codec is
//! allowed to see a bare JSON value.

use crate::error::{Result, StoreError};
use serde_json::{Map, Number, Value as Json};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Date(chrono::DateTime<chrono::Utc>),
    Array(Vec<Value>),
    Object(HashMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Object(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut HashMap<String, Value>> {
        match self {
            Value::Object(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }
}

/// A value is cloned by `Clone::clone` — everything in `Value` is owned, so
/// there is no aliasing to preserve and no cycle that could exist (the type
/// itself is a finite tree). `deep_clone` exists as a named entry point so
/// call sites read the same as the spec's Codec contract.
pub fn deep_clone(value: &Value) -> Value {
    value.clone()
}

/// Strict ISO-8601 UTC-with-millis pattern check, character class by
/// character class — avoids pulling in the `regex` crate for one fixed
/// shape.
fn matches_pattern(s: &str, pattern: &str) -> bool {
    if s.len() != pattern.len() {
        return false;
    }
    s.bytes()
        .zip(pattern.bytes())
        .all(|(c, p)| if p == b'd' { c.is_ascii_digit() } else { c == p })
}

fn is_strict_iso8601(s: &str) -> bool {
    matches_pattern(s, "dddd-dd-ddTdd:dd:ddZ") || matches_pattern(s, "dddd-dd-ddTdd:dd:dd.dddZ")
}

/// Parse a string as a Date only if it is the strict ISO-8601 UTC form
/// *and* denotes a valid calendar instant. Anything else — partial,
/// localised, offset, or space-separated forms — is left as a string by
/// the caller.
pub fn parse_strict_date(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    if !is_strict_iso8601(s) {
        return None;
    }
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

fn format_date(d: &chrono::DateTime<chrono::Utc>) -> String {
    d.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Convert a `Value` to the `serde_json::Value` wire form.
///
/// `NaN`/`±Infinity` serialise as JSON `null` — JSON cannot represent them
/// and the spec accepts this as a lossy edge.
pub fn to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => {
            if n.is_finite() {
                Number::from_f64(*n).map(Json::Number).unwrap_or(Json::Null)
            } else {
                Json::Null
            }
        }
        Value::String(s) => Json::String(s.clone()),
        Value::Date(d) => Json::String(format_date(d)),
        Value::Array(arr) => Json::Array(arr.iter().map(to_json).collect()),
        Value::Object(map) => {
            let mut obj = Map::new();
            for (k, v) in map {
                obj.insert(k.clone(), to_json(v));
            }
            Json::Object(obj)
        }
    }
}

/// Convert a `serde_json::Value` wire form back into a `Value`, rehydrating
/// strict ISO-8601 strings into `Date`.
pub fn from_json(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
        Json::String(s) => match parse_strict_date(s) {
            Some(d) => Value::Date(d),
            None => Value::String(s.clone()),
        },
        Json::Array(arr) => Value::Array(arr.iter().map(from_json).collect()),
        Json::Object(obj) => {
            let mut map = HashMap::with_capacity(obj.len());
            for (k, v) in obj {
                map.insert(k.clone(), from_json(v));
            }
            Value::Object(map)
        }
    }
}

/// Serialise a value to its JSON wire string.
pub fn serialise(value: &Value) -> Result<String> {
    serde_json::to_string(&to_json(value))
        .map_err(|e| StoreError::InvalidFileFormat(format!("serialise failed: {e}")))
}

/// Deserialise a JSON wire string into a `Value`.
///
/// Double-parsing guard: if the decoded top-level value is itself a
/// string, the blob re-encoded a JSON document as a JSON string — that is
/// treated as corrupt, not as a legitimately stringly document.
pub fn deserialise(s: &str) -> Result<Value> {
    let json: Json = serde_json::from_str(s)
        .map_err(|e| StoreError::InvalidFileFormat(format!("not valid JSON: {e}")))?;
    let value = from_json(&json);
    if matches!(value, Value::String(_)) {
        return Err(StoreError::InvalidFileFormat(
            "decoded value is a JSON string, not a document (double-encoded?)".to_string(),
        ));
    }
    Ok(value)
}
