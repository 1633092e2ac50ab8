//! Dotted field-path lookup over a call payload

use serde_json::{Map, Value};

/// Resolve `path` (e.g. `event.type`) against a call's arguments.
///
/// The first segment is looked up in `kwargs`, then in each positional
/// mapping argument in order. Remaining segments walk nested mappings;
/// numeric segments also index into sequences. Strings yield their content,
/// other scalars and containers their compact JSON form. Null and missing
/// values resolve to `None`.
pub fn resolve_field_path(path: &str, args: &[Value], kwargs: &Map<String, Value>) -> Option<String> {
    let mut segments = path.split('.');
    let first = segments.next().filter(|s| !s.is_empty())?;
    let rest: Vec<&str> = segments.collect();

    let roots = std::iter::once(kwargs).chain(args.iter().filter_map(Value::as_object));
    for root in roots {
        let Some(start) = root.get(first) else {
            continue;
        };
        return walk(start, &rest).and_then(key_string);
    }
    None
}

fn walk<'a>(mut value: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    for segment in segments {
        value = match value {
            Value::Object(map) => map.get(*segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(value)
}

fn key_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
