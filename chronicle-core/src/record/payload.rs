//! Size accounting and truncation for captured values

use serde_json::Value;

const TRUNCATION_OPEN: &str = "...[truncated, ";
const TRUNCATION_CLOSE: &str = " bytes total]";

/// Size of `value` serialized as compact JSON
pub fn serialized_size(value: &Value) -> usize {
    serde_json::to_vec(value).map(|bytes| bytes.len()).unwrap_or(0)
}

/// Enforce `max_size` on a single value.
///
/// Oversized values are replaced by a string holding the first `max_size`
/// bytes of their JSON form followed by a truncation marker. Returns the
/// bounded value and whether truncation happened.
pub fn bound_value(value: Value, max_size: usize) -> (Value, bool) {
    let serialized = match serde_json::to_string(&value) {
        Ok(s) => s,
        Err(_) => return (value, false),
    };
    if serialized.len() <= max_size {
        return (value, false);
    }

    let cut = floor_char_boundary(&serialized, max_size);
    let truncated = format!(
        "{}{}{}{}",
        &serialized[..cut],
        TRUNCATION_OPEN,
        serialized.len(),
        TRUNCATION_CLOSE
    );
    (Value::String(truncated), true)
}

/// Whether `value` is a truncation placeholder produced by [`bound_value`]
pub fn is_truncated(value: &Value) -> bool {
    match value {
        Value::String(s) => s.ends_with(TRUNCATION_CLOSE) && s.contains(TRUNCATION_OPEN),
        _ => false,
    }
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut cut = index;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_small_values_pass_through() {
        let (value, truncated) = bound_value(json!({"a": 1}), 1024);
        assert_eq!(value, json!({"a": 1}));
        assert!(!truncated);
        assert!(!is_truncated(&value));
    }

    #[test]
    fn test_oversized_value_is_marked() {
        let big = json!({"items": vec![1; 500]});
        let total = serialized_size(&big);

        let (value, truncated) = bound_value(big, 64);
        assert!(truncated);
        assert!(is_truncated(&value));
        let text = value.as_str().unwrap();
        assert!(text.starts_with("{\"items\":[1,1"));
        assert!(text.ends_with(&format!("...[truncated, {} bytes total]", total)));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let (value, truncated) = bound_value(json!("ééééééééé"), 4);
        assert!(truncated);
        // `"` plus one two-byte char fits in 4 bytes, the second does not
        assert!(value.as_str().unwrap().starts_with("\"é..."));
    }
}
