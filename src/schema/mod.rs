// src/schema/mod.rs
// Canonical form and stable hashing for JSON-Schema-subset objects

pub mod compare;

pub use compare::{CompareOptions, SchemaChange, SchemaChangeKind, compare_schemas};

use serde_json::Value;
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// Recursion bound for canonicalization. A deep non-cyclic tree can blow the
/// stack even with cycle detection, so both guards are required.
pub const MAX_DEPTH: usize = 64;

/// Hash reported for a tool with no input schema at all.
pub const EMPTY_SCHEMA_HASH: &str = "empty";

/// Stable 16-hex-char hash of a schema's canonical form.
pub fn schema_hash(schema: &Value) -> String {
    let canonical = canonicalize(schema);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())[..16].to_string()
}

/// Hash for an optional schema; absent schemas get the fixed sentinel.
pub fn schema_hash_opt(schema: Option<&Value>) -> String {
    match schema {
        Some(schema) => schema_hash(schema),
        None => EMPTY_SCHEMA_HASH.to_string(),
    }
}

/// Produce the canonical string form of a schema:
///
/// 1. object keys NFC-normalized, then serialized in sorted order
/// 2. `required` arrays sorted
/// 3. `enum` arrays sorted by their JSON encoding
/// 4. same-document `$ref` resolved once; dangling refs become the literal
///    `"<unresolved-ref>"`
/// 5. depth beyond `MAX_DEPTH` becomes `"<deep>"`
/// 6. a node revisited through `$ref` becomes `"<cycle>"`
pub fn canonicalize(schema: &Value) -> String {
    let mut out = String::new();
    let mut visiting: Vec<*const Value> = Vec::new();
    write_canonical(schema, schema, 0, &mut visiting, &mut out);
    out
}

fn write_canonical(
    node: &Value,
    root: &Value,
    depth: usize,
    visiting: &mut Vec<*const Value>,
    out: &mut String,
) {
    if depth > MAX_DEPTH {
        out.push_str("\"<deep>\"");
        return;
    }

    let identity = node as *const Value;
    if visiting.contains(&identity) {
        out.push_str("\"<cycle>\"");
        return;
    }

    match node {
        Value::Object(map) => {
            // $ref replaces the node wholesale; siblings are ignored.
            if let Some(reference) = map.get("$ref").and_then(|v| v.as_str()) {
                match resolve_ref(root, reference) {
                    Some(target) => {
                        visiting.push(identity);
                        write_canonical(target, root, depth + 1, visiting, out);
                        visiting.pop();
                    }
                    None => out.push_str("\"<unresolved-ref>\""),
                }
                return;
            }

            visiting.push(identity);

            let mut entries: Vec<(String, &Value)> = map
                .iter()
                .map(|(k, v)| (k.nfc().collect::<String>(), v))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            out.push('{');
            for (i, (key, value)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(key, out);
                out.push(':');
                match key.as_str() {
                    "required" => write_sorted_string_array(value, root, depth, visiting, out),
                    "enum" => write_sorted_by_encoding(value, root, depth, visiting, out),
                    _ => write_canonical(value, root, depth + 1, visiting, out),
                }
            }
            out.push('}');

            visiting.pop();
        }
        Value::Array(items) => {
            visiting.push(identity);
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, root, depth + 1, visiting, out);
            }
            out.push(']');
            visiting.pop();
        }
        Value::String(s) => write_json_string(&s.nfc().collect::<String>(), out),
        other => {
            // Numbers, booleans, null: serde_json's encoding is already stable.
            out.push_str(&other.to_string());
        }
    }
}

/// `required`: element order carries no meaning, so it is sorted.
fn write_sorted_string_array(
    value: &Value,
    root: &Value,
    depth: usize,
    visiting: &mut Vec<*const Value>,
    out: &mut String,
) {
    let Value::Array(items) = value else {
        write_canonical(value, root, depth + 1, visiting, out);
        return;
    };
    let mut names: Vec<String> = items
        .iter()
        .map(|v| match v {
            Value::String(s) => s.nfc().collect(),
            other => other.to_string(),
        })
        .collect();
    names.sort();
    out.push('[');
    for (i, name) in names.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_json_string(name, out);
    }
    out.push(']');
}

/// `enum`: sorted by the JSON encoding of each member, so heterogeneous
/// value lists still order deterministically.
fn write_sorted_by_encoding(
    value: &Value,
    root: &Value,
    depth: usize,
    visiting: &mut Vec<*const Value>,
    out: &mut String,
) {
    let Value::Array(items) = value else {
        write_canonical(value, root, depth + 1, visiting, out);
        return;
    };
    let mut encoded: Vec<String> = items
        .iter()
        .map(|item| {
            let mut buf = String::new();
            write_canonical(item, root, depth + 1, visiting, &mut buf);
            buf
        })
        .collect();
    encoded.sort();
    out.push('[');
    out.push_str(&encoded.join(","));
    out.push(']');
}

/// Resolve a same-document `#/…` JSON pointer. Anything else is dangling.
fn resolve_ref<'a>(root: &'a Value, reference: &str) -> Option<&'a Value> {
    let pointer = reference.strip_prefix('#')?;
    if pointer.is_empty() {
        return Some(root);
    }
    root.pointer(pointer)
}

fn write_json_string(s: &str, out: &mut String) {
    // serde_json handles escaping; a plain string cannot fail to serialize.
    match serde_json::to_string(s) {
        Ok(encoded) => out.push_str(&encoded),
        Err(_) => out.push_str("\"\""),
    }
}
