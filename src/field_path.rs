//! Field Path (component C2): get/set/unset over dotted paths against a
//! `Value` tree. Grounded on the teacher's `Document::get`/`set_nested`/
//! `remove_nested` dotted-path walkers, simplified to a single `Value`
//! domain rather than a `DocumentId`-aware `Document`.

use crate::error::{Result, StoreError};
use crate::value::Value;

fn split(path: &str) -> Vec<&str> {
    path.split('.').collect()
}

/// Walk `path` against `root`. Returns `None` when any intermediate or leaf
/// segment is absent — callers distinguish "missing" from an explicit
/// `Value::Null` by checking this, not by the returned value's kind.
pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in split(path) {
        match current {
            Value::Object(map) => current = map.get(segment)?,
            Value::Array(arr) => {
                let idx: usize = segment.parse().ok()?;
                current = arr.get(idx)?;
            }
            _ => return None,
        }
    }
    Some(current)
}

/// Assign `value` at `path`, creating intermediate object nodes as needed.
/// Fails with `InvalidPath` (surfaced as `InvalidArgument`) if an
/// intermediate segment already exists and is not an object.
pub fn set(root: &mut Value, path: &str, value: Value) -> Result<()> {
    let segments = split(path);
    set_at(root, &segments, value)
}

fn set_at(node: &mut Value, segments: &[&str], value: Value) -> Result<()> {
    let (head, rest) = segments
        .split_first()
        .expect("set_at called with empty path");

    if !node.is_object() {
        if matches!(node, Value::Null) {
            *node = Value::Object(Default::default());
        } else {
            return Err(StoreError::InvalidArgument(format!(
                "cannot set path through non-object segment at '{head}'"
            )));
        }
    }

    let map = node.as_object_mut().expect("just ensured object");

    if rest.is_empty() {
        map.insert((*head).to_string(), value);
        return Ok(());
    }

    let child = map
        .entry((*head).to_string())
        .or_insert(Value::Object(Default::default()));
    set_at(child, rest, value)
}

/// Delete the leaf at `path`. No-op if any segment along the way is
/// absent. The parent object is left in place even if it becomes empty.
pub fn unset(root: &mut Value, path: &str) {
    let segments = split(path);
    unset_at(root, &segments);
}

fn unset_at(node: &mut Value, segments: &[&str]) {
    let (head, rest) = match segments.split_first() {
        Some(pair) => pair,
        None => return,
    };

    let map = match node.as_object_mut() {
        Some(m) => m,
        None => return,
    };

    if rest.is_empty() {
        map.remove(*head);
        return;
    }

    if let Some(child) = map.get_mut(*head) {
        unset_at(child, rest);
    }
}
