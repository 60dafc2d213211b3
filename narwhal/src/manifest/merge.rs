//! Structural merge of a rendered extension overlay onto a rendered base.
//!
//! Rules:
//! - mappings merge recursively, the overlay wins on scalars
//! - a `null` overlay value removes the key from the base
//! - sequences whose items are all mappings with a `name` key merge item by
//!   item on that name, new names are appended
//! - every other sequence is replaced by the overlay
//! - a mapping meeting a non-mapping (or a sequence meeting a scalar) is a
//!   conflict and fails the merge

use serde_yaml::{Mapping, Value};

use crate::error::BuildError;

/// Parse both documents and merge `overlay` onto `base`.
pub fn merge_documents(base: &str, overlay: &str) -> Result<Value, BuildError> {
    let base: Value =
        serde_yaml::from_str(base).map_err(|e| BuildError::Decode(e.to_string()))?;
    if overlay.trim().is_empty() {
        return Ok(base);
    }
    let overlay: Value = serde_yaml::from_str(overlay)
        .map_err(|e| BuildError::Merge(format!("invalid extension overlay: {e}")))?;

    match overlay {
        Value::Null => Ok(base),
        Value::Mapping(_) => merge_value(base, overlay, ""),
        _ => Err(BuildError::Merge(
            "extension overlay root must be a mapping".to_string(),
        )),
    }
}

/// Merge two YAML values, overlay taking precedence.
pub fn merge_value(base: Value, overlay: Value, path: &str) -> Result<Value, BuildError> {
    match (base, overlay) {
        (base, Value::Null) => Ok(base),
        (Value::Null, overlay) => Ok(overlay),
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            merge_mapping(base, overlay, path).map(Value::Mapping)
        }
        (Value::Sequence(base), Value::Sequence(overlay)) => {
            if is_named_list(&base) && is_named_list(&overlay) && !overlay.is_empty() {
                merge_named_list(base, overlay, path).map(Value::Sequence)
            } else {
                Ok(Value::Sequence(overlay))
            }
        }
        (base, overlay) if kind(&base) != kind(&overlay) => Err(BuildError::Merge(format!(
            "cannot merge {} onto {} at {}",
            kind(&overlay),
            kind(&base),
            display_path(path)
        ))),
        (_, overlay) => Ok(overlay),
    }
}

fn merge_mapping(mut base: Mapping, overlay: Mapping, path: &str) -> Result<Mapping, BuildError> {
    for (key, value) in overlay {
        if value.is_null() {
            base.remove(&key);
            continue;
        }

        let child = child_path(path, &key);
        match base.get_mut(&key) {
            Some(existing) => {
                let current = std::mem::take(existing);
                *existing = merge_value(current, value, &child)?;
            }
            None => {
                base.insert(key, value);
            }
        }
    }
    Ok(base)
}

fn merge_named_list(
    mut base: Vec<Value>,
    overlay: Vec<Value>,
    path: &str,
) -> Result<Vec<Value>, BuildError> {
    for item in overlay {
        let name = item_name(&item).map(str::to_owned);
        let position = base.iter().position(|b| item_name(b) == name.as_deref());
        match position {
            Some(index) => {
                let current = std::mem::take(&mut base[index]);
                let child = format!("{}[{}]", display_path(path), name.unwrap_or_default());
                base[index] = merge_value(current, item, &child)?;
            }
            None => base.push(item),
        }
    }
    Ok(base)
}

fn is_named_list(items: &[Value]) -> bool {
    items.iter().all(|item| item_name(item).is_some())
}

fn item_name(item: &Value) -> Option<&str> {
    item.as_mapping()?.get("name")?.as_str()
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Mapping(_) => "mapping",
        Value::Sequence(_) => "sequence",
        Value::Tagged(_) => "tagged value",
        _ => "scalar",
    }
}

fn child_path(path: &str, key: &Value) -> String {
    let key = match key {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    };
    if path.is_empty() {
        key
    } else {
        format!("{path}.{key}")
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() { "<root>" } else { path }
}
