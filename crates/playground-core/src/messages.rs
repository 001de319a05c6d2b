//! Schema-aware constructors for chat messages, tools and array items.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::enhanced::{EnhancedNode, EnhancedValue};
use crate::json::try_parse_partial_json;
use crate::metadata::{create_metadata, ConfigMetadata, MetadataKind, MetadataStore};
use crate::policy::{TOOL_CONFIGURATION_SCHEMA, TOOL_PROVENANCE_KEYS};
use crate::transform::Transformer;
use crate::utils::to_lower_camel_case;
use crate::{Error, Result};

/// Plain default value for `metadata`: schema defaults where given, `""`
/// for strings, `[]` for arrays and the first branch of a union.
pub fn default_value(metadata: &ConfigMetadata) -> JsonValue {
    if let Some(default) = metadata.default_value() {
        return default.clone();
    }
    match &metadata.kind {
        MetadataKind::String { .. } => JsonValue::String(String::new()),
        MetadataKind::Number { .. } | MetadataKind::Boolean { .. } => JsonValue::Null,
        MetadataKind::Array { .. } => JsonValue::Array(Vec::new()),
        MetadataKind::Object { properties, .. } => JsonValue::Object(
            properties
                .iter()
                .map(|(k, m)| (k.clone(), default_value(m)))
                .collect(),
        ),
        MetadataKind::Compound { options } => options
            .first()
            .map(|o| default_value(&o.config.as_metadata(&o.label)))
            .unwrap_or(JsonValue::Null),
    }
}

/// Default Enhanced node for `metadata`.
pub fn create_default_from_metadata(metadata: &ConfigMetadata, store: &MetadataStore) -> EnhancedNode {
    Transformer::new(store).transform_with_metadata(&default_value(metadata), metadata)
}

/// Enhanced chat message built from message metadata, optionally filled
/// from a plain message (`role`, `content`, `tool_calls`, `tool_call_id`,
/// `name` and so on). Tool calls are kept as raw JSON items.
pub fn create_message_from_schema(
    message_metadata: &ConfigMetadata,
    message: Option<&JsonValue>,
    store: &MetadataStore,
) -> EnhancedNode {
    let mut value = match default_value(message_metadata) {
        JsonValue::Object(obj) => obj,
        _ => Map::new(),
    };
    if let Some(JsonValue::Object(src)) = message {
        let declared = message_metadata.properties();
        for (k, v) in src {
            let camel = to_lower_camel_case(k);
            if declared.is_some_and(|p| p.contains_key(&camel)) {
                value.insert(camel, v.clone());
            } else {
                value.insert(k.clone(), v.clone());
            }
        }
    }

    let mut node =
        Transformer::new(store).transform_with_metadata(&JsonValue::Object(value), message_metadata);

    let raw_calls = message
        .and_then(|m| m.get("tool_calls").or_else(|| m.get("toolCalls")))
        .and_then(JsonValue::as_array);
    if let (Some(calls), Some(calls_node)) = (raw_calls, node.child_mut("toolCalls")) {
        if let Some(array) = calls_node.array_node_mut() {
            let item_hash = item_metadata_hash(array, store);
            array.value = EnhancedValue::Array(
                calls
                    .iter()
                    .map(|call| EnhancedNode::primitive(item_hash.clone(), call.clone()))
                    .collect(),
            );
        }
    }
    node
}

/// UI provenance of a tool added from a provider catalogue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolProvenance {
    pub source: Option<String>,
    pub provider: Option<String>,
    pub provider_label: Option<String>,
    pub tool: Option<String>,
    pub tool_label: Option<String>,
}

impl ToolProvenance {
    /// The `__`-prefixed fields carried on a tool node
    pub fn to_extras(&self) -> Map<String, JsonValue> {
        let fields = [
            &self.source,
            &self.provider,
            &self.provider_label,
            &self.tool,
            &self.tool_label,
        ];
        TOOL_PROVENANCE_KEYS
            .iter()
            .zip(fields)
            .filter_map(|((ui_key, _), v)| {
                v.as_ref()
                    .map(|v| (ui_key.to_string(), JsonValue::String(v.clone())))
            })
            .collect()
    }
}

/// New item of a `Tools` array: the tool JSON kept verbatim, plus
/// provenance fields when the tool came from a catalogue.
pub fn create_tool_node(
    tools_metadata: &ConfigMetadata,
    tool: &JsonValue,
    provenance: Option<&ToolProvenance>,
    store: &MetadataStore,
) -> Result<EnhancedNode> {
    let item_hash = match tools_metadata.item_metadata() {
        Some(m) => store.insert(m),
        None => {
            let fallback = create_metadata(&TOOL_CONFIGURATION_SCHEMA)?
                .ok_or_else(|| Error::schema("Tool configuration schema produced no metadata"))?;
            store.insert(&fallback)
        }
    };
    let mut node = EnhancedNode::primitive(item_hash, tool.clone());
    if let Some(provenance) = provenance {
        node.extras = provenance.to_extras();
    }
    Ok(node)
}

/// Append a default item to an array node (looking through a compound
/// wrapper) and return its id.
pub fn append_array_item(node: &mut EnhancedNode, store: &MetadataStore) -> Result<String> {
    let array = node.array_node_mut().ok_or_else(|| Error::transform("Node is not an array"))?;
    let meta = store
        .get(&array.metadata)
        .ok_or_else(|| Error::transform(format!("Unknown metadata '{}'", array.metadata)))?;
    let item_meta = meta
        .item_metadata()
        .ok_or_else(|| Error::transform("Array metadata has no item metadata"))?;

    let item = create_default_from_metadata(item_meta, store);
    let id = item.id.clone();
    if let Some(items) = array.items_mut() {
        items.push(item);
    }
    Ok(id)
}

/// Remove the item with `__id == item_id` from an array node.
pub fn remove_array_item(node: &mut EnhancedNode, item_id: &str) -> Result<EnhancedNode> {
    let items = node
        .array_node_mut()
        .and_then(EnhancedNode::items_mut)
        .ok_or_else(|| Error::transform("Node is not an array"))?;
    let index = items
        .iter()
        .position(|item| item.id == item_id)
        .ok_or_else(|| Error::transform(format!("No array item with id '{}'", item_id)))?;
    Ok(items.remove(index))
}

pub(crate) fn item_metadata_hash(array: &EnhancedNode, store: &MetadataStore) -> String {
    store
        .get(&array.metadata)
        .and_then(|m| m.item_metadata().map(|item| store.insert(item)))
        .unwrap_or_else(|| array.metadata.clone())
}

/// A user-edited tool definition
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDraft {
    /// Best-effort parse of the text
    pub parsed: Option<JsonValue>,
    /// Whether the text is valid JSON, so name/description can be edited
    pub editable: bool,
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Parse tool JSON as typed by a user.
///
/// Text that is not valid JSON still yields what the partial parser could
/// recover, but `editable` is false.
pub fn parse_tool_definition(text: &str) -> ToolDraft {
    let strict = serde_json::from_str::<JsonValue>(text.trim()).ok();
    let editable = strict.as_ref().is_some_and(JsonValue::is_object);
    let parsed = strict.or_else(|| try_parse_partial_json(text));

    let function = parsed.as_ref().map(|p| p.get("function").unwrap_or(p));
    let field = |key: &str| {
        function
            .and_then(|f| f.get(key))
            .and_then(JsonValue::as_str)
            .map(String::from)
    };

    ToolDraft {
        name: field("name"),
        description: field("description"),
        parsed,
        editable,
    }
}

/// Set `function.name` or `function.description` of a tool definition and
/// return the re-serialized text. Fails while the text is not valid JSON.
pub fn update_tool_field(text: &str, field: &str, value: &str) -> Result<String> {
    let draft = parse_tool_definition(text);
    let mut tool = match (draft.editable, draft.parsed) {
        (true, Some(tool)) => tool,
        _ => return Err(Error::transform("Tool definition is not valid JSON")),
    };
    let target = if tool.get("function").is_some() {
        &mut tool["function"]
    } else {
        &mut tool
    };
    if let Some(obj) = target.as_object_mut() {
        obj.insert(field.to_string(), JsonValue::String(value.to_string()));
    }
    Ok(serde_json::to_string_pretty(&tool)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::extract_value_by_metadata;
    use serde_json::json;

    fn message_metadata() -> ConfigMetadata {
        create_metadata(&json!({
            "type": "object",
            "title": "Message",
            "properties": {
                "role": {"type": "string", "default": "user"},
                "content": {"anyOf": [{"type": "string"}, {"type": "null"}]},
                "name": {"anyOf": [{"type": "string"}, {"type": "null"}]},
                "tool_calls": {"anyOf": [
                    {"type": "array", "items": {"type": "object", "properties": {
                        "id": {"type": "string"}, "type": {"type": "string"}
                    }}},
                    {"type": "null"}
                ]},
                "tool_call_id": {"anyOf": [{"type": "string"}, {"type": "null"}]}
            }
        }))
        .unwrap()
        .unwrap()
    }

    #[test]
    fn test_default_from_metadata() {
        let store = MetadataStore::new();
        let node = create_default_from_metadata(&message_metadata(), &store);
        assert_eq!(node.child_value("role"), Some(&json!("user")));
        assert_eq!(node.child_value("content"), Some(&json!("")));
        assert_eq!(node.child("toolCalls").unwrap().items().unwrap().len(), 0);
    }

    #[test]
    fn test_default_of_compound_uses_first_option() {
        let meta = create_metadata(&json!({"anyOf": [
            {"type": "object", "title": "ResponseFormatText", "properties": {"type": {"const": "text"}}},
            {"type": "object", "title": "ResponseFormatJSONObject", "properties": {"type": {"const": "json_object"}}}
        ]}))
        .unwrap()
        .unwrap();
        assert_eq!(default_value(&meta), json!({"type": "text"}));
    }

    #[test]
    fn test_message_from_plain_json() {
        let store = MetadataStore::new();
        let meta = message_metadata();
        let node = create_message_from_schema(
            &meta,
            Some(&json!({"role": "assistant", "content": "hello", "x_trace": "t1"})),
            &store,
        );
        assert_eq!(node.child_value("role"), Some(&json!("assistant")));
        assert_eq!(
            extract_value_by_metadata(Some(&node), &store),
            Some(json!({"role": "assistant", "content": "hello", "x_trace": "t1"}))
        );
    }

    #[test]
    fn test_message_tool_calls_stay_raw() {
        let store = MetadataStore::new();
        let call = json!({"id": "call_1", "type": "function",
                          "function": {"name": "lookup", "arguments": "{}"}});
        let node = create_message_from_schema(
            &message_metadata(),
            Some(&json!({"role": "assistant", "tool_calls": [call.clone()]})),
            &store,
        );
        let calls = node.child("toolCalls").unwrap().items().unwrap();
        assert_eq!(calls[0].as_primitive(), Some(&call));

        let plain = extract_value_by_metadata(Some(&node), &store).unwrap();
        assert_eq!(plain["tool_calls"], json!([call]));
    }

    #[test]
    fn test_tool_node_carries_provenance() {
        let store = MetadataStore::new();
        let tools = ConfigMetadata::array(None).with_title("Tools");
        let provenance = ToolProvenance {
            source: Some("builtin".into()),
            provider: Some("openai".into()),
            tool: Some("web_search".into()),
            ..Default::default()
        };
        let tool = json!({"type": "web_search_preview"});
        let node = create_tool_node(&tools, &tool, Some(&provenance), &store).unwrap();
        assert_eq!(node.as_primitive(), Some(&tool));
        assert_eq!(node.extras.get("__provider"), Some(&json!("openai")));
        assert!(!node.extras.contains_key("__toolLabel"));
        assert_eq!(
            store.get(&node.metadata).unwrap().title(),
            Some("ToolConfiguration")
        );
    }

    #[test]
    fn test_append_and_remove_array_items() {
        let store = MetadataStore::new();
        let meta = create_metadata(&json!({
            "type": "array",
            "items": {"type": "object", "properties": {"role": {"type": "string"}}}
        }))
        .unwrap()
        .unwrap();
        let mut node = create_default_from_metadata(&meta, &store);

        let first = append_array_item(&mut node, &store).unwrap();
        let second = append_array_item(&mut node, &store).unwrap();
        assert_eq!(node.items().unwrap().len(), 2);

        let removed = remove_array_item(&mut node, &first).unwrap();
        assert_eq!(removed.id, first);
        assert_eq!(node.items().unwrap()[0].id, second);
        assert!(remove_array_item(&mut node, &first).is_err());
    }

    #[test]
    fn test_append_to_non_array_is_error() {
        let store = MetadataStore::new();
        let mut node = create_default_from_metadata(&ConfigMetadata::string(), &store);
        assert!(append_array_item(&mut node, &store).is_err());
    }

    #[test]
    fn test_parse_tool_definition() {
        let valid = parse_tool_definition(
            r#"{"type": "function", "function": {"name": "lookup", "description": "Find things"}}"#,
        );
        assert!(valid.editable);
        assert_eq!(valid.name.as_deref(), Some("lookup"));
        assert_eq!(valid.description.as_deref(), Some("Find things"));

        let partial = parse_tool_definition(r#"{"type": "function", "function": {"name": "look"#);
        assert!(!partial.editable);
        assert_eq!(partial.name.as_deref(), Some("look"));

        let accented = parse_tool_definition(r#"{"type": "function", ü"#);
        assert!(!accented.editable);
        assert_eq!(accented.parsed, Some(json!({"type": "function"})));
        assert_eq!(accented.name, None);

        let garbage = parse_tool_definition("nope");
        assert!(!garbage.editable);
        assert_eq!(garbage.parsed, None);
    }

    #[test]
    fn test_update_tool_field() {
        let text = r#"{"type": "function", "function": {"name": "lookup"}}"#;
        let updated = update_tool_field(text, "description", "Find things").unwrap();
        assert_eq!(
            parse_tool_definition(&updated).description.as_deref(),
            Some("Find things")
        );
        assert!(update_tool_field(r#"{"function": {"#, "name", "x").is_err());
    }
}
