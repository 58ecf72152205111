use std::collections::BTreeMap;

use crate::Value;

/// One record rewritten by a recompute pass. Only fields whose value
/// actually changed appear in `changes`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RecordSnapshot {
    pub record_id: String,
    pub version_before: i64,
    pub version_after: i64,
    pub changes: BTreeMap<String, Value>,
}

/// Snapshots of one batch, handed to the caller as soon as the batch is
/// written.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RecomputedBatch {
    pub level: usize,
    pub table_id: String,
    pub field_ids: Vec<String>,
    /// Rows the pass read, including unchanged ones.
    pub rows_visited: usize,
    pub snapshots: Vec<RecordSnapshot>,
}

/// Whether a freshly computed value differs from the stored one. Integers
/// and reals compare by value; JSON text compares structurally. Values of
/// any other differing variants are never equal.
pub(crate) fn value_changed(fresh: &Value, stored: &Value) -> bool {
    !values_equal(fresh, stored)
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Integer(left), Value::Integer(right)) => left == right,
        (Value::Real(left), Value::Real(right)) => reals_equal(*left, *right),
        (Value::Integer(left), Value::Real(right)) | (Value::Real(right), Value::Integer(left)) => {
            reals_equal(*left as f64, *right)
        }
        (Value::Text(left), Value::Text(right)) => left == right || json_equal(left, right),
        (Value::Blob(left), Value::Blob(right)) => left == right,
        _ => false,
    }
}

fn reals_equal(left: f64, right: f64) -> bool {
    left == right || (left.is_nan() && right.is_nan())
}

fn json_equal(left: &str, right: &str) -> bool {
    let starts_structured = |text: &str| text.trim_start().starts_with(['[', '{']);
    if !starts_structured(left) || !starts_structured(right) {
        return false;
    }
    match (
        serde_json::from_str::<serde_json::Value>(left),
        serde_json::from_str::<serde_json::Value>(right),
    ) {
        (Ok(left), Ok(right)) => left == right,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::value_changed;
    use crate::Value;

    #[test]
    fn numbers_compare_across_storage() {
        assert!(!value_changed(&Value::Real(600.0), &Value::Integer(600)));
        assert!(!value_changed(&Value::Integer(600), &Value::Real(600.0)));
        assert!(value_changed(&Value::Real(400.0), &Value::Real(600.0)));
        assert!(!value_changed(&Value::Real(f64::NAN), &Value::Real(f64::NAN)));
    }

    #[test]
    fn small_changes_on_large_reals_are_detected() {
        assert!(value_changed(
            &Value::Real(1_000_000_000.5),
            &Value::Real(1_000_000_000.0)
        ));
        assert!(value_changed(&Value::Real(0.1 + 0.2), &Value::Real(0.3)));
        assert!(!value_changed(
            &Value::Real(1_000_000_000.5),
            &Value::Real(1_000_000_000.5)
        ));
    }

    #[test]
    fn text_never_equals_a_number() {
        assert!(value_changed(&Value::Real(100.0), &Value::Text("100".to_string())));
        assert!(value_changed(&Value::Integer(100), &Value::Text("100".to_string())));
        assert!(value_changed(&Value::Text("1".to_string()), &Value::Blob(vec![b'1'])));
    }

    #[test]
    fn json_text_compares_structurally() {
        let compact = Value::Text("[{\"id\":\"c1\",\"title\":\"A\"}]".to_string());
        let spaced = Value::Text("[{\"id\": \"c1\", \"title\": \"A\"}]".to_string());
        assert!(!value_changed(&compact, &spaced));
        assert!(value_changed(&compact, &Value::Text("[]".to_string())));
    }

    #[test]
    fn null_only_equals_null() {
        assert!(!value_changed(&Value::Null, &Value::Null));
        assert!(value_changed(&Value::Null, &Value::Integer(0)));
        assert!(value_changed(&Value::Text(String::new()), &Value::Null));
    }
}
