//! `anyOf` normalization.
//!
//! Unions coming from OpenAPI documents are frequently `Optional[...]`
//! wrappers (`anyOf: [X, {"type": "null"}]`) or nest further unions inside
//! array items and object properties. The functions here collapse those
//! into a single schema plus a nullability flag so the metadata builder
//! only ever sees one level of union.

use serde_json::{Map, Value as JsonValue};

use super::classify::{allows_null, is_any_of_schema, is_null_schema, union_branches};
use crate::{Error, Result};

/// A union resolved into one schema
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedSchema {
    /// The collapsed schema, or the parent with a rebuilt null-free `anyOf`
    pub schema: JsonValue,
    /// Whether a `null` branch (or nullable marker) was present
    pub nullable: bool,
}

/// Normalize any schema node: unions go through [`extract_from_any_of`],
/// everything else passes through with its own nullability.
pub fn extract_schema(schema: &JsonValue) -> Result<ExtractedSchema> {
    if is_any_of_schema(schema) {
        return extract_from_any_of(schema);
    }
    Ok(ExtractedSchema {
        nullable: allows_null(schema),
        schema: schema.clone(),
    })
}

/// Collapse an `anyOf` union.
///
/// Null branches are removed and reported through `nullable`. Nested unions
/// among the branches are flattened into the parent list. A single surviving
/// branch is merged into the parent (the parent's `title`/`description`
/// win); several branches are kept under a rebuilt `anyOf`.
pub fn extract_from_any_of(schema: &JsonValue) -> Result<ExtractedSchema> {
    let Some(branches) = union_branches(schema) else {
        return extract_schema(schema);
    };

    let mut nullable = allows_null(schema);
    let mut non_null = Vec::new();
    flatten_branches(branches, &mut nullable, &mut non_null);

    if non_null.is_empty() {
        return Err(Error::schema("No valid non-null schema found in anyOf"));
    }

    let mut parent = schema.as_object().cloned().unwrap_or_default();
    parent.remove("anyOf");
    parent.remove("oneOf");

    let normalized = non_null
        .into_iter()
        .map(normalize_nested)
        .collect::<Result<Vec<_>>>()?;

    let merged = if normalized.len() == 1 {
        let mut merged = match normalized.into_iter().next() {
            Some(JsonValue::Object(branch)) => branch,
            _ => Map::new(),
        };
        for key in ["title", "description", "default"] {
            if let Some(v) = parent.remove(key) {
                if !(key == "default" && v.is_null()) {
                    merged.insert(key.to_string(), v);
                }
            }
        }
        for (k, v) in parent {
            merged.entry(k).or_insert(v);
        }
        JsonValue::Object(merged)
    } else {
        parent.insert("anyOf".to_string(), JsonValue::Array(normalized));
        JsonValue::Object(parent)
    };

    Ok(ExtractedSchema {
        schema: merged,
        nullable,
    })
}

fn flatten_branches(branches: &[JsonValue], nullable: &mut bool, out: &mut Vec<JsonValue>) {
    for branch in branches {
        if is_null_schema(branch) {
            *nullable = true;
        } else if let Some(inner) = union_branches(branch) {
            if allows_null(branch) {
                *nullable = true;
            }
            flatten_branches(inner, nullable, out);
        } else {
            out.push(branch.clone());
        }
    }
}

/// Resolve unions one level down, in array `items` and object `properties`.
/// A resolved property that admitted `null` is marked `nullable: true`.
fn normalize_nested(branch: JsonValue) -> Result<JsonValue> {
    let JsonValue::Object(mut obj) = branch else {
        return Ok(branch);
    };

    if let Some(items) = obj.get("items").filter(|i| is_any_of_schema(i)) {
        let resolved = resolve_marked(items)?;
        obj.insert("items".to_string(), resolved);
    }

    if let Some(JsonValue::Object(props)) = obj.get_mut("properties") {
        for (_, prop) in props.iter_mut() {
            if is_any_of_schema(prop) {
                *prop = resolve_marked(prop)?;
            }
        }
    }

    Ok(JsonValue::Object(obj))
}

fn resolve_marked(schema: &JsonValue) -> Result<JsonValue> {
    let extracted = extract_from_any_of(schema)?;
    let mut resolved = extracted.schema;
    if extracted.nullable {
        if let Some(obj) = resolved.as_object_mut() {
            obj.insert("nullable".to_string(), JsonValue::Bool(true));
        }
    }
    Ok(resolved)
}
