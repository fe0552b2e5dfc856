use serde_json::{Map, Value};

/// Flatten a JSON document into a single-level object with `.`-joined keys,
/// the row layout used by legacy version-2 stores.
///
/// Arrays flatten to integer keys (`"a.0"`, `"a.1"`, …); scalars pass
/// through unchanged.
pub fn flatten(value: &Value) -> Value {
    let mut out = Map::new();
    flatten_into(&mut out, "", value);
    Value::Object(out)
}

fn flatten_into(out: &mut Map<String, Value>, prefix: &str, value: &Value) {
    match value {
        Value::Object(object) => {
            for (key, child) in object {
                let path = join_key(prefix, key);
                flatten_into(out, &path, child);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                let path = join_key(prefix, &index.to_string());
                flatten_into(out, &path, child);
            }
        }
        scalar => {
            out.insert(prefix.to_string(), scalar.clone());
        }
    }
}

fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// True when any top-level key of an object contains a `.`, the marker of a
/// legacy flattened row.
pub fn has_dotted_keys(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|object| object.keys().any(|key| key.contains('.')))
}

/// Rebuild a nested document from a flattened one.
///
/// Keys are split on `.` and nested; an object whose keys are the
/// contiguous integers `0..n` becomes an array.
pub fn unflatten(value: &Value) -> Value {
    let Some(object) = value.as_object() else {
        return value.clone();
    };
    let mut root = Map::new();
    for (key, child) in object {
        let segments: Vec<&str> = key.split('.').collect();
        insert_path(&mut root, &segments, child);
    }
    arrays_from_maps(Value::Object(root))
}

fn insert_path(node: &mut Map<String, Value>, segments: &[&str], value: &Value) {
    let [segment, rest @ ..] = segments else {
        return;
    };
    if rest.is_empty() {
        node.insert(segment.to_string(), value.clone());
        return;
    }
    let child = node
        .entry(segment.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(child) = child {
        insert_path(child, rest, value);
    }
}

fn arrays_from_maps(value: Value) -> Value {
    match value {
        Value::Object(object) => {
            let object: Map<String, Value> = object
                .into_iter()
                .map(|(key, child)| (key, arrays_from_maps(child)))
                .collect();
            if is_contiguous_index_map(&object) {
                let mut items: Vec<(usize, Value)> = object
                    .into_iter()
                    .map(|(key, child)| (key.parse::<usize>().unwrap_or_default(), child))
                    .collect();
                items.sort_by_key(|(index, _)| *index);
                Value::Array(items.into_iter().map(|(_, child)| child).collect())
            } else {
                Value::Object(object)
            }
        }
        other => other,
    }
}

/// An object encodes an array iff its keys are exactly the integers `0..n`.
fn is_contiguous_index_map(object: &Map<String, Value>) -> bool {
    if object.is_empty() {
        return false;
    }
    let mut indexes: Vec<usize> = Vec::with_capacity(object.len());
    for key in object.keys() {
        match key.parse::<usize>() {
            Ok(index) => indexes.push(index),
            Err(_) => return false,
        }
    }
    indexes.sort_unstable();
    indexes.iter().enumerate().all(|(want, &got)| want == got)
}
