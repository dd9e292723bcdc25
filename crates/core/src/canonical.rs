//! Canonical encoding of block content.
//!
//! Block hashes must be reproducible by any ledger holder, including ones not
//! written in Rust, so the encoding is pinned down exactly: compact JSON with
//! object keys sorted by their UTF-8 bytes at every nesting level and no
//! whitespace. The signature-bearing fields are never part of the encoding.

use crate::hash::{hash, Hash};
use serde_json::{Map, Value};

/// Fields that are excluded from the content hash.
pub const EXCLUDED_FIELDS: [&str; 3] = ["hash", "signatures", "signer_keys"];

/// Encode a field mapping into its canonical byte form.
///
/// The output does not depend on the insertion order of `fields`.
pub fn encode(fields: &Map<String, Value>) -> Vec<u8> {
    let entries = fields
        .iter()
        .filter(|(key, _)| !EXCLUDED_FIELDS.contains(&key.as_str()))
        .collect();

    let mut out = Vec::with_capacity(256);
    write_object(&mut out, entries);
    out
}

/// Hash a field mapping: SHA-256 over [`encode`].
pub fn content_hash(fields: &Map<String, Value>) -> Hash {
    hash(&encode(fields))
}

fn write_object(out: &mut Vec<u8>, mut entries: Vec<(&String, &Value)>) {
    entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

    out.push(b'{');
    for (i, (key, value)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        write_scalar(out, &Value::from(key.as_str()));
        out.push(b':');
        write_value(out, value);
    }
    out.push(b'}');
}

fn write_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Object(map) => write_object(out, map.iter().collect()),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(out, item);
            }
            out.push(b']');
        }
        scalar => write_scalar(out, scalar),
    }
}

// `Display` on a scalar `Value` is the compact JSON form.
fn write_scalar(out: &mut Vec<u8>, value: &Value) {
    out.extend_from_slice(value.to_string().as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn as_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_keys_sorted_and_compact() {
        let fields = as_map(json!({
            "timestamp": "2024-05-01T10:00:00",
            "author": "admin",
            "new_value": 10,
            "old_value": 0,
        }));

        let encoded = String::from_utf8(encode(&fields)).unwrap();
        assert_eq!(
            encoded,
            r#"{"author":"admin","new_value":10,"old_value":0,"timestamp":"2024-05-01T10:00:00"}"#
        );
    }

    #[test]
    fn test_signature_fields_excluded() {
        let bare = as_map(json!({ "subject_id": "can-1" }));
        let signed = as_map(json!({
            "subject_id": "can-1",
            "hash": "ab",
            "signatures": ["00"],
            "signer_keys": ["pem"],
        }));

        assert_eq!(encode(&bare), encode(&signed));
        assert_eq!(content_hash(&bare), content_hash(&signed));
    }

    #[test]
    fn test_nested_objects_sorted() {
        let fields = as_map(json!({ "b": { "z": 1, "a": [ { "y": 2, "x": 3 } ] }, "a": null }));

        let encoded = String::from_utf8(encode(&fields)).unwrap();
        assert_eq!(encoded, r#"{"a":null,"b":{"a":[{"x":3,"y":2}],"z":1}}"#);
    }

    #[test]
    fn test_strings_escaped() {
        let fields = as_map(json!({ "author": "a\"b\\c\n" }));

        let encoded = String::from_utf8(encode(&fields)).unwrap();
        assert_eq!(encoded, r#"{"author":"a\"b\\c\n"}"#);
    }

    #[test]
    fn test_sort_is_bytewise() {
        // Uppercase sorts before lowercase in byte order.
        let fields = as_map(json!({ "b": 1, "B": 2, "a": 3 }));

        let encoded = String::from_utf8(encode(&fields)).unwrap();
        assert_eq!(encoded, r#"{"B":2,"a":3,"b":1}"#);
    }

    #[test]
    fn test_empty_mapping() {
        assert_eq!(encode(&Map::new()), b"{}");
    }

    proptest! {
        #[test]
        fn prop_insertion_order_irrelevant(
            entries in proptest::collection::btree_map("[a-z_]{1,12}", any::<u64>(), 0..12)
        ) {
            let mut forward = Map::new();
            for (k, v) in entries.iter() {
                forward.insert(k.clone(), Value::from(*v));
            }
            let mut reverse = Map::new();
            for (k, v) in entries.iter().rev() {
                reverse.insert(k.clone(), Value::from(*v));
            }

            prop_assert_eq!(encode(&forward), encode(&reverse));
            prop_assert_eq!(content_hash(&forward), content_hash(&reverse));
        }
    }
}
