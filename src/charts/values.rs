//! Helm values documents.
//!
//! Values are YAML strings in the cluster declaration. They are handled here
//! as JSON trees so that re-encoding yields sorted keys and the same document
//! always serialises to the same string.

use serde_json::{Map, Value};

use crate::controller::error::{Error, Result};

/// Parse a values document. Empty and null documents yield an empty map.
pub fn parse(doc: &str) -> Result<Map<String, Value>> {
    if doc.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_yaml::from_str::<Value>(doc)? {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map),
        other => Err(Error::Validation(format!(
            "values document must be a mapping, got {}",
            kind(&other)
        ))),
    }
}

/// Encode a values tree as YAML.
pub fn render(values: &Map<String, Value>) -> Result<String> {
    Ok(serde_yaml::to_string(values)?)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

/// Split a protected path (`a.b.c`, optionally prefixed with `$.`) into keys.
pub fn path_segments(path: &str) -> Vec<&str> {
    let path = path.strip_prefix("$.").unwrap_or(path);
    path.split('.').filter(|s| !s.is_empty()).collect()
}

/// Value at `path`, if every segment exists.
pub fn get_path<'a>(values: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let segments = path_segments(path);
    let (last, parents) = segments.split_last()?;
    let mut current = values;
    for segment in parents {
        current = current.get(*segment)?.as_object()?;
    }
    current.get(*last)
}

/// Set `value` at `path`, creating (or replacing non-mapping) intermediate nodes.
pub fn set_path(values: &mut Map<String, Value>, path: &str, value: Value) {
    let segments = path_segments(path);
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut current = values;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }
    current.insert(last.to_string(), value);
}

/// Carry the old value at each protected path into the new document.
///
/// Paths absent from the old document are skipped.
pub fn merge_protected(old: &str, new: &str, protected: &[String]) -> Result<String> {
    let old = parse(old)?;
    let mut new = parse(new)?;
    for path in protected {
        if let Some(value) = get_path(&old, path) {
            set_path(&mut new, path, value.clone());
        }
    }
    render(&new)
}

/// Recursively merge `overlay` into `base`; mappings merge, anything else replaces.
pub fn deep_merge(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Layer the `overlay` document on top of `base`.
pub fn merge_documents(base: &str, overlay: &str) -> Result<String> {
    let mut merged = parse(base)?;
    deep_merge(&mut merged, parse(overlay)?);
    render(&merged)
}
