//! Enhanced value tree → plain JSON payload.
//!
//! The walk drops "nothing entered" values (`null`, `""`, `[]`), turns
//! camelCase keys back into snake_case and applies the backend's special
//! cases for tools, tool calls and tool-role messages.

use serde_json::{Map, Value as JsonValue};

use crate::enhanced::{EnhancedField, EnhancedNode, EnhancedValue, ID_KEY, METADATA_KEY};
use crate::metadata::{ConfigMetadata, MetadataStore};
use crate::policy::{self, is_truthy, TOOL_PROVENANCE_FIELD, TOOL_PROVENANCE_KEYS};
use crate::utils::{is_internal_key, to_snake_case};

/// Whether an extracted value is worth sending. `null`, `""` and `[]` are
/// dropped; `false`, `0` and `{}` are kept.
pub fn should_include_value(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(items) => !items.is_empty(),
        _ => true,
    }
}

/// Collapse an Enhanced tree into the plain JSON the backend expects.
///
/// Returns `None` when nothing worth sending remains: empty arrays, objects
/// that end up empty or fail [`check_validity`], and omitted primitives.
pub fn extract_value_by_metadata(
    node: Option<&EnhancedNode>,
    store: &MetadataStore,
) -> Option<JsonValue> {
    let node = node?;
    match &node.value {
        EnhancedValue::Primitive(v) => Some(v.clone()).filter(should_include_value),
        EnhancedValue::Array(items) => {
            let values: Vec<JsonValue> = items
                .iter()
                .filter_map(|item| extract_value_by_metadata(Some(item), store))
                .filter(should_include_value)
                .collect();
            if values.is_empty() {
                None
            } else {
                Some(JsonValue::Array(values))
            }
        }
        EnhancedValue::Compound { value, .. } => {
            extract_value_by_metadata(value.as_deref(), store)
        }
        EnhancedValue::Object(fields) => {
            let metadata = store.get(&node.metadata);
            let mut obj = Map::new();

            for (key, field) in fields.iter().filter(|(k, _)| !is_internal_key(k)) {
                match (key.as_str(), field) {
                    ("tools", EnhancedField::Node(tools)) => {
                        if let Some(tools) = extract_tools(tools, store) {
                            obj.insert("tools".to_string(), tools);
                        }
                    }
                    ("toolCalls", EnhancedField::Node(calls)) => {
                        if let Some(calls) = extract_tool_calls(calls) {
                            obj.insert("tool_calls".to_string(), calls);
                        }
                    }
                    (_, EnhancedField::Node(child)) => {
                        if let Some(v) = extract_value_by_metadata(Some(child), store) {
                            if should_include_value(&v) {
                                obj.insert(to_snake_case(key), v);
                            }
                        }
                    }
                    (_, EnhancedField::Raw(v)) => {
                        if should_include_value(v) {
                            obj.insert(to_snake_case(key), v.clone());
                        }
                    }
                }
            }

            if obj.get("role").and_then(JsonValue::as_str) == Some("tool") {
                normalize_tool_message(&mut obj);
            }

            let valid = metadata.as_deref().map_or(true, |m| check_validity(&obj, m));
            if !obj.is_empty() && valid {
                Some(JsonValue::Object(obj))
            } else {
                None
            }
        }
    }
}

/// Whether a built object satisfies its metadata.
///
/// Every property with `nullable == false` must be present and truthy,
/// except where an alternative key covers it (`file_id`/`file_data`). A
/// chat message whose nullable properties are all empty is invalid.
pub fn check_validity(obj: &Map<String, JsonValue>, metadata: &ConfigMetadata) -> bool {
    let Some(properties) = metadata.properties() else {
        return true;
    };

    for (key, prop) in properties {
        if prop.nullable {
            continue;
        }
        let wire_key = to_snake_case(key);
        let present = obj.get(&wire_key).is_some_and(is_truthy);
        if !present && !policy::satisfied_by_alternative(&wire_key, obj) {
            return false;
        }
    }

    if policy::is_message_metadata(metadata) {
        let mut nullable_keys = properties
            .iter()
            .filter(|(_, p)| p.nullable)
            .map(|(k, _)| to_snake_case(k))
            .peekable();
        if nullable_keys.peek().is_some()
            && nullable_keys.all(|k| !obj.get(&k).is_some_and(is_truthy))
        {
            return false;
        }
    }

    true
}

/// Lossless plain form of a subtree: keys snake_cased, nothing omitted.
pub fn to_plain_value(node: &EnhancedNode) -> JsonValue {
    match &node.value {
        EnhancedValue::Primitive(v) => v.clone(),
        EnhancedValue::Array(items) => JsonValue::Array(items.iter().map(to_plain_value).collect()),
        EnhancedValue::Compound { value, .. } => value
            .as_deref()
            .map(to_plain_value)
            .unwrap_or(JsonValue::Null),
        EnhancedValue::Object(fields) => JsonValue::Object(
            fields
                .iter()
                .filter(|(k, _)| !is_internal_key(k))
                .map(|(k, field)| {
                    let v = match field {
                        EnhancedField::Node(n) => to_plain_value(n),
                        EnhancedField::Raw(v) => v.clone(),
                    };
                    (to_snake_case(k), v)
                })
                .collect(),
        ),
    }
}

/// Tool definitions are unwrapped from their `value` envelope; UI provenance
/// fields are re-attached under `agenta_metadata`.
fn extract_tools(tools: &EnhancedNode, store: &MetadataStore) -> Option<JsonValue> {
    let items = tools.items()?;
    let out: Vec<JsonValue> = items
        .iter()
        .filter_map(|tool| {
            let mut plain = match &tool.value {
                EnhancedValue::Primitive(v) => v.clone(),
                _ => extract_value_by_metadata(Some(tool), store)?,
            };
            let provenance: Map<String, JsonValue> = TOOL_PROVENANCE_KEYS
                .iter()
                .filter_map(|(ui_key, wire_key)| {
                    tool.extras
                        .get(*ui_key)
                        .filter(|v| !v.is_null())
                        .map(|v| (wire_key.to_string(), v.clone()))
                })
                .collect();
            if !provenance.is_empty() {
                if let Some(obj) = plain.as_object_mut() {
                    let entry = obj
                        .entry(TOOL_PROVENANCE_FIELD.to_string())
                        .or_insert_with(|| JsonValue::Object(Map::new()));
                    if let Some(existing) = entry.as_object_mut() {
                        existing.extend(provenance);
                    }
                }
            }
            Some(plain).filter(should_include_value)
        })
        .collect();
    Some(JsonValue::Array(out)).filter(should_include_value)
}

/// Tool calls are sent as plain objects with `function.parameters` encoded
/// as a JSON string.
fn extract_tool_calls(calls: &EnhancedNode) -> Option<JsonValue> {
    let items = calls.items()?;
    let out: Vec<JsonValue> = items
        .iter()
        .map(|call| {
            let mut plain = to_plain_value(call);
            strip_node_keys(&mut plain);
            if let Some(params) = plain
                .get_mut("function")
                .and_then(|f| f.get_mut("parameters"))
            {
                if !params.is_string() {
                    *params = JsonValue::String(params.to_string());
                }
            }
            plain
        })
        .filter(should_include_value)
        .collect();
    Some(JsonValue::Array(out)).filter(should_include_value)
}

fn strip_node_keys(value: &mut JsonValue) {
    match value {
        JsonValue::Object(obj) => {
            obj.remove(ID_KEY);
            obj.remove(METADATA_KEY);
            obj.values_mut().for_each(strip_node_keys);
        }
        JsonValue::Array(items) => items.iter_mut().for_each(strip_node_keys),
        _ => {}
    }
}

/// Tool-role messages always carry string or `[{type, text}]` content and a
/// string `tool_call_id`.
fn normalize_tool_message(obj: &mut Map<String, JsonValue>) {
    let content = match obj.remove("content") {
        Some(JsonValue::String(s)) => JsonValue::String(s),
        Some(JsonValue::Array(parts)) => JsonValue::Array(
            parts
                .iter()
                .map(|part| {
                    let mut normalized = Map::new();
                    for key in ["type", "text"] {
                        if let Some(v) = part.get(key) {
                            normalized.insert(key.to_string(), unwrap_value_envelope(v));
                        }
                    }
                    JsonValue::Object(normalized)
                })
                .collect(),
        ),
        Some(JsonValue::Null) | None => JsonValue::String(String::new()),
        Some(other) => JsonValue::String(other.to_string()),
    };
    obj.insert("content".to_string(), content);

    if let Some(id) = obj.remove("toolCallId").or_else(|| obj.remove("tool_call_id")) {
        let id = match id {
            JsonValue::String(s) => s,
            other => other.to_string(),
        };
        obj.insert("tool_call_id".to_string(), JsonValue::String(id));
    }
}

fn unwrap_value_envelope(value: &JsonValue) -> JsonValue {
    match value.get("value") {
        Some(inner) => inner.clone(),
        None => value.clone(),
    }
}
