//! Named special cases of the prompt configuration format.
//!
//! The transformers are generic tree walks; the handful of places where the
//! backend format needs something specific are collected here so each rule
//! can be found and tested on its own.

use once_cell::sync::Lazy;
use serde_json::{json, Map, Value as JsonValue};

use crate::metadata::ConfigMetadata;
use crate::schema::{discriminator_of, is_object_schema};

/// Title of the prompt tools array
pub const TOOLS_TITLE: &str = "Tools";

/// Title of chat message object metadata
pub const MESSAGE_TITLE: &str = "Message";

/// Title of prompt template schemas inside `ag_config`
pub const PROMPT_TEMPLATE_TITLE: &str = "PromptTemplate";

/// Prefix of response-format branch titles that are always flattened
pub const RESPONSE_FORMAT_TITLE_PREFIX: &str = "ResponseFormat";

/// UI provenance fields carried on tool items, with their wire names inside
/// `agenta_metadata`.
pub const TOOL_PROVENANCE_KEYS: [(&str, &str); 5] = [
    ("__source", "source"),
    ("__provider", "provider"),
    ("__providerLabel", "provider_label"),
    ("__tool", "tool"),
    ("__toolLabel", "tool_label"),
];

/// Wire key under which tool provenance is attached
pub const TOOL_PROVENANCE_FIELD: &str = "agenta_metadata";

/// Pairs of object keys where either one satisfies the other's requirement.
pub const ALTERNATIVE_REQUIREMENTS: [(&str, &str); 2] =
    [("file_id", "file_data"), ("file_data", "file_id")];

/// Item schema assumed for tools arrays that were stored without one.
pub static TOOL_CONFIGURATION_SCHEMA: Lazy<JsonValue> = Lazy::new(|| {
    json!({
        "type": "object",
        "title": "ToolConfiguration",
        "properties": {
            "type": {"type": "string", "title": "Type", "default": "function"},
            "function": {
                "type": "object",
                "title": "Function",
                "properties": {
                    "name": {"type": "string", "title": "Name"},
                    "description": {"type": "string", "title": "Description"},
                    "parameters": {"type": "object", "title": "Parameters", "additionalProperties": true}
                },
                "required": ["name"]
            }
        },
        "required": ["type", "function"]
    })
});

/// Whether a union branch is titled as a response-format variant.
pub fn is_response_format_title(title: Option<&str>) -> bool {
    title.is_some_and(|t| t.starts_with(RESPONSE_FORMAT_TITLE_PREFIX))
}

/// Whether a discriminated branch carries a genuine nested object next to
/// its `type` const and should keep its own object metadata.
pub fn is_nested_object_branch(branch: &JsonValue) -> bool {
    if discriminator_of(branch).is_none() {
        return false;
    }
    if is_response_format_title(branch.get("title").and_then(JsonValue::as_str)) {
        return false;
    }
    branch
        .get("properties")
        .and_then(JsonValue::as_object)
        .map(|props| {
            props
                .iter()
                .any(|(k, v)| k != "type" && is_object_schema(v) && v.get("properties").is_some())
        })
        .unwrap_or(false)
}

/// Whether an `ag_config` property holds a prompt rather than a custom
/// parameter: marked `x-parameter: prompt` or titled `PromptTemplate`.
pub fn is_prompt_schema(schema: &JsonValue) -> bool {
    schema.get("x-parameter").and_then(JsonValue::as_str) == Some("prompt")
        || schema.get("title").and_then(JsonValue::as_str) == Some(PROMPT_TEMPLATE_TITLE)
}

/// Whether array metadata is the prompt's tools list.
pub fn is_tools_array(metadata: &ConfigMetadata) -> bool {
    metadata.title() == Some(TOOLS_TITLE)
}

/// Whether object metadata describes a chat message.
pub fn is_message_metadata(metadata: &ConfigMetadata) -> bool {
    metadata.title() == Some(MESSAGE_TITLE)
}

/// Whether a missing `key` is covered by a populated alternative key.
pub fn satisfied_by_alternative(key: &str, obj: &Map<String, JsonValue>) -> bool {
    ALTERNATIVE_REQUIREMENTS
        .iter()
        .filter(|(required, _)| *required == key)
        .any(|(_, alternative)| obj.get(*alternative).is_some_and(is_truthy))
}

/// JavaScript-style truthiness, used by the validity rules.
pub fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_format_title() {
        assert!(is_response_format_title(Some("ResponseFormatJSONSchema")));
        assert!(!is_response_format_title(Some("ImageContent")));
        assert!(!is_response_format_title(None));
    }

    #[test]
    fn test_nested_object_branch() {
        let image = json!({
            "type": "object",
            "title": "ImageContent",
            "properties": {
                "type": {"const": "image_url"},
                "image_url": {"type": "object", "properties": {"url": {"type": "string"}}}
            }
        });
        let text = json!({
            "type": "object",
            "properties": {"type": {"const": "text"}, "text": {"type": "string"}}
        });
        let mut response_format = image.clone();
        response_format["title"] = json!("ResponseFormatJSONSchema");

        assert!(is_nested_object_branch(&image));
        assert!(!is_nested_object_branch(&text));
        assert!(!is_nested_object_branch(&response_format));
    }

    #[test]
    fn test_prompt_schema_detection() {
        assert!(is_prompt_schema(&json!({"type": "object", "x-parameter": "prompt"})));
        assert!(is_prompt_schema(&json!({"type": "object", "title": "PromptTemplate"})));
        assert!(!is_prompt_schema(&json!({"type": "number", "x-parameter": "float"})));
    }

    #[test]
    fn test_alternative_requirement() {
        let obj = json!({"file_data": "data:application/pdf;base64,AAAA"});
        let obj = obj.as_object().unwrap();
        assert!(satisfied_by_alternative("file_id", obj));
        assert!(!satisfied_by_alternative("file_data", obj));
        assert!(!satisfied_by_alternative("filename", obj));
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(false)));
        assert!(is_truthy(&json!([])));
        assert!(is_truthy(&json!({})));
        assert!(is_truthy(&json!("0")));
        assert!(is_truthy(&json!(0.5)));
    }

    #[test]
    fn test_tool_configuration_schema_is_object() {
        assert!(is_object_schema(&TOOL_CONFIGURATION_SCHEMA));
    }
}
