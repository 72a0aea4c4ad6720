//! Loose coercions over JSON values, shared by conditions and templates.

use serde_json::Value;

/// Resolve a dotted path (`trigger.data.email`, `items.0.sku`) inside `root`.
///
/// Numeric segments index into arrays.  Empty segments are ignored, so a
/// stray leading or trailing dot does not change the result; a path with no
/// segments at all resolves to nothing.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.').map(str::trim).filter(|s| !s.is_empty()).peekable();
    segments.peek()?;
    let mut current = root;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// String form used for substitution and string comparisons.
///
/// Arrays of scalars join with `,`; other composites render as JSON.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        Value::Array(items) if items.iter().all(is_scalar) => {
            items.iter().map(to_text).collect::<Vec<_>>().join(",")
        }
        other => other.to_string(),
    }
}

/// Numeric form, or `None` when the value does not look like a number.
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// `null`, blank strings, and empty arrays/objects are empty.
pub fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}
