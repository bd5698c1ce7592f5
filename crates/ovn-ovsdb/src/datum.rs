//! Helpers for OVSDB's JSON datum notation
//!
//! OVSDB encodes references and collections as tagged arrays:
//! `["uuid", "..."]`, `["named-uuid", "..."]`, `["set", [...]]` and
//! `["map", [[k, v], ...]]`. A set with exactly one member may also be
//! sent as the bare atom.

use serde_json::{json, Value};

/// A reference to a committed row
pub fn uuid(id: &str) -> Value {
    json!(["uuid", id])
}

/// A reference to a row inserted earlier in the same transaction
pub fn named_uuid(name: &str) -> Value {
    json!(["named-uuid", name])
}

/// Build a set datum
pub fn set<I>(items: I) -> Value
where
    I: IntoIterator<Item = Value>,
{
    json!(["set", items.into_iter().collect::<Vec<_>>()])
}

/// Build a string-to-string map datum
pub fn map<I, K, V>(pairs: I) -> Value
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let pairs: Vec<Value> = pairs
        .into_iter()
        .map(|(k, v)| json!([k.into(), v.into()]))
        .collect();
    json!(["map", pairs])
}

/// Extract the id from a `["uuid", id]` datum
pub fn as_uuid(value: &Value) -> Option<&str> {
    let pair = value.as_array()?;
    if pair.len() == 2 && pair[0] == "uuid" {
        pair[1].as_str()
    } else {
        None
    }
}

/// Members of a set datum (bare atoms count as a one-member set)
pub fn set_items(value: &Value) -> Vec<&Value> {
    match value.as_array() {
        Some(pair) if pair.len() == 2 && pair[0] == "set" => pair[1]
            .as_array()
            .map(|items| items.iter().collect())
            .unwrap_or_default(),
        _ if value.is_null() => Vec::new(),
        _ => vec![value],
    }
}

/// Look up a key in a `["map", [[k, v], ...]]` datum
pub fn map_get<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let pair = value.as_array()?;
    if pair.len() != 2 || pair[0] != "map" {
        return None;
    }
    pair[1].as_array()?.iter().find_map(|entry| {
        let kv = entry.as_array()?;
        if kv.len() == 2 && kv[0] == key {
            Some(&kv[1])
        } else {
            None
        }
    })
}
