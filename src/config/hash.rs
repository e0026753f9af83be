//! Deterministic hashing for change detection.
//!
//! Values are hashed through a canonical JSON rendering: object keys sorted,
//! no insignificant whitespace. The same logical value always hashes the
//! same regardless of how the map that produced it was ordered.

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::spec::Manifest;

/// Hasher for computing property and manifest hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Hashes a resolved property snapshot.
    #[must_use]
    pub fn hash_value(&self, value: &Value) -> String {
        let mut canonical = String::new();
        write_canonical(value, &mut canonical);
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }

    /// Computes a hash of the whole manifest.
    ///
    /// Covers the project identity, every declaration in insertion order
    /// (with references rendered as expressions) and the stack outputs.
    #[must_use]
    pub fn hash_manifest(&self, manifest: &Manifest) -> String {
        let mut hasher = Sha256::new();

        hasher.update(manifest.project.name.as_bytes());
        hasher.update([0]);
        hasher.update(manifest.project.stack.as_bytes());

        for decl in &manifest.resources {
            let properties: serde_json::Map<String, Value> = decl
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), v.to_expression_json()))
                .collect();
            let entry = serde_json::json!({
                "name": decl.name,
                "type": decl.kind.as_str(),
                "properties": properties,
                "depends_on": decl.depends_on,
            });
            hasher.update([0]);
            hasher.update(self.hash_value(&entry).as_bytes());
        }

        for output in &manifest.outputs {
            hasher.update([1]);
            hasher.update(output.name.as_bytes());
            hasher.update(self.hash_value(&output.value.to_expression_json()).as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes to determine if they are equal.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
