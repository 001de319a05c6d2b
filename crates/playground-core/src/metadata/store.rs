//! Content-addressed metadata cache.
//!
//! Value trees reference their metadata by hash instead of embedding it, so
//! every node built from the same schema shape shares one record. Entries
//! are never removed; a store lives as long as the session that owns it.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use md5::{Digest, Md5};
use serde_json::Value as JsonValue;

use super::ConfigMetadata;

/// Hash → metadata map shared by all value trees of a session
#[derive(Debug, Default)]
pub struct MetadataStore {
    entries: RwLock<HashMap<String, Arc<ConfigMetadata>>>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `metadata` (if not yet present) and return its hash.
    pub fn insert(&self, metadata: &ConfigMetadata) -> String {
        let hash = hash_metadata(metadata);
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if entries.contains_key(&hash) {
                return hash;
            }
        }
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries
            .entry(hash.clone())
            .or_insert_with(|| Arc::new(metadata.clone()));
        hash
    }

    /// Look up metadata by hash
    pub fn get(&self, hash: &str) -> Option<Arc<ConfigMetadata>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(hash)
            .cloned()
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// MD5 hex digest of the key-sorted JSON form of `metadata`.
pub fn hash_metadata(metadata: &ConfigMetadata) -> String {
    let value = serde_json::to_value(metadata).unwrap_or(JsonValue::Null);
    let mut canonical = String::new();
    stable_stringify(&value, &mut canonical);
    hex::encode(Md5::digest(canonical.as_bytes()))
}

/// Serialize with object keys sorted at every level, independent of the
/// map implementation serde_json was built with.
fn stable_stringify(value: &JsonValue, out: &mut String) {
    match value {
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&JsonValue::String(key.clone()).to_string());
                out.push(':');
                stable_stringify(&map[key], out);
            }
            out.push('}');
        }
        JsonValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                stable_stringify(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
