//! Normalization of the server's response envelopes.
//!
//! The admin endpoints are inconsistent about how they wrap records: some
//! return a bare array, some `{ "members": [...] }`, some `{ "data": [...] }`.
//! Everything here degrades to "no records" instead of failing, so a list
//! view never breaks on an unexpected shape.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Field checked when the caller's named field is absent or not an array.
pub const DATA_FIELD: &str = "data";

/// Extract an array of records from a response.
///
/// Search order: the value itself if it is an array, then `field` if given,
/// then the generic `data` field. Anything else yields an empty vector.
pub fn extract_array(value: &Value, field: Option<&str>) -> Vec<Value> {
  if let Value::Array(items) = value {
    return items.clone();
  }

  let Value::Object(map) = value else {
    return Vec::new();
  };

  if let Some(Value::Array(items)) = field.and_then(|f| map.get(f)) {
    return items.clone();
  }

  match map.get(DATA_FIELD) {
    Some(Value::Array(items)) => items.clone(),
    _ => Vec::new(),
  }
}

/// Extract a single record from a response, falling back to `default`.
///
/// Same search order as [`extract_array`]. A wrapped array yields its first
/// object; a wrapped object is returned as is.
pub fn extract_one(value: &Value, field: Option<&str>, default: Value) -> Value {
  if let Value::Array(items) = value {
    return first_object(items).unwrap_or(default);
  }

  let Value::Object(map) = value else {
    return default;
  };

  let candidates = field.into_iter().chain(std::iter::once(DATA_FIELD));
  for name in candidates {
    match map.get(name) {
      Some(obj @ Value::Object(_)) => return obj.clone(),
      Some(Value::Array(items)) => {
        if let Some(obj) = first_object(items) {
          return obj;
        }
      }
      _ => {}
    }
  }

  default
}

fn first_object(items: &[Value]) -> Option<Value> {
  items.first().filter(|v| v.is_object()).cloned()
}

/// Decode extracted records into typed values.
///
/// Records that don't fit `T` are skipped and logged rather than failing the
/// whole list.
pub fn decode_records<T: DeserializeOwned>(records: &[Value]) -> Vec<T> {
  records
    .iter()
    .enumerate()
    .filter_map(|(index, record)| match T::deserialize(record) {
      Ok(item) => Some(item),
      Err(e) => {
        tracing::warn!(index, error = %e, "skipping record that does not decode");
        None
      }
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde::Deserialize;
  use serde_json::json;

  #[test]
  fn test_bare_array_is_returned_unchanged() {
    let value = json!([{ "id": 1 }, { "id": 2 }, 3]);
    assert_eq!(
      extract_array(&value, Some("members")),
      value.as_array().cloned().unwrap()
    );
  }

  #[test]
  fn test_named_field() {
    let value = json!({ "members": [{ "id": 1 }], "total": 1 });
    assert_eq!(extract_array(&value, Some("members")), vec![json!({ "id": 1 })]);
  }

  #[test]
  fn test_data_field_fallback() {
    let value = json!({ "data": [{ "id": 7 }] });
    assert_eq!(extract_array(&value, Some("members")), vec![json!({ "id": 7 })]);
    assert_eq!(extract_array(&value, None), vec![json!({ "id": 7 })]);
  }

  #[test]
  fn test_named_field_wins_over_data() {
    let value = json!({ "members": [{ "id": 1 }], "data": [{ "id": 2 }] });
    assert_eq!(extract_array(&value, Some("members")), vec![json!({ "id": 1 })]);
  }

  #[test]
  fn test_named_field_not_an_array_falls_through_to_data() {
    let value = json!({ "members": { "id": 1 }, "data": [{ "id": 2 }] });
    assert_eq!(extract_array(&value, Some("members")), vec![json!({ "id": 2 })]);
  }

  #[test]
  fn test_malformed_responses_yield_empty() {
    for value in [
      Value::Null,
      json!("members"),
      json!(42),
      json!(true),
      json!({}),
      json!({ "data": "nope" }),
      json!({ "data": { "id": 1 } }),
      json!({ "members": null }),
    ] {
      assert!(extract_array(&value, Some("members")).is_empty(), "{value}");
    }
  }

  #[test]
  fn test_extract_one_search_order() {
    assert_eq!(
      extract_one(&json!([{ "id": 1 }, { "id": 2 }]), None, Value::Null),
      json!({ "id": 1 })
    );
    assert_eq!(
      extract_one(&json!({ "member": { "id": 3 } }), Some("member"), Value::Null),
      json!({ "id": 3 })
    );
    assert_eq!(
      extract_one(&json!({ "data": [{ "id": 4 }] }), Some("member"), Value::Null),
      json!({ "id": 4 })
    );
    assert_eq!(
      extract_one(&json!({ "data": { "id": 5 } }), None, Value::Null),
      json!({ "id": 5 })
    );
  }

  #[test]
  fn test_extract_one_default() {
    assert_eq!(extract_one(&json!([]), None, Value::Null), Value::Null);
    assert_eq!(extract_one(&json!("x"), None, json!({})), json!({}));
    assert_eq!(
      extract_one(&json!({ "data": [1, 2] }), None, Value::Null),
      Value::Null
    );
  }

  #[derive(Debug, Deserialize, PartialEq)]
  struct Row {
    id: u32,
  }

  #[test]
  fn test_decode_records_skips_bad_rows() {
    let records = vec![json!({ "id": 1 }), json!({ "id": "x" }), json!({ "id": 3 })];
    let rows: Vec<Row> = decode_records(&records);
    assert_eq!(rows, vec![Row { id: 1 }, Row { id: 3 }]);
  }
}
