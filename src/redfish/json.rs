//! Small accessors over untyped Redfish JSON.

use serde_json::Value;

/// Non-empty string at a JSON pointer (`/Status/Health`).
pub(crate) fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// First key that holds a usable identifier. Numbers are accepted too,
/// some controllers report `MemberId` as an integer.
pub(crate) fn first_str(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

pub(crate) fn f64_at(value: &Value, pointer: &str) -> Option<f64> {
    value.pointer(pointer).and_then(Value::as_f64)
}

pub(crate) fn odata_id(value: &Value) -> Option<&str> {
    value.get("@odata.id").and_then(Value::as_str)
}

/// `@odata.id` of every entry of a collection's `Members`.
pub(crate) fn member_uris(collection: &Value) -> Vec<String> {
    collection
        .get("Members")
        .and_then(Value::as_array)
        .map(|members| {
            members
                .iter()
                .filter_map(odata_id)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// A collection member that carries more than just its link.
pub(crate) fn is_expanded(member: &Value) -> bool {
    member
        .as_object()
        .is_some_and(|object| object.keys().any(|key| key != "@odata.id"))
}

pub(crate) fn array_at<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}
