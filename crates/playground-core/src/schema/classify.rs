//! Structural predicates over JSON-schema nodes.
//!
//! Every predicate accepts any JSON value and answers `false` for shapes it
//! does not recognise, so callers can probe arbitrary OpenAPI fragments.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Scalar schema type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    /// String type
    String,
    /// Number type (float/double)
    Number,
    /// Integer type
    Integer,
    /// Boolean type
    Boolean,
    /// Null type
    Null,
}

impl PrimitiveType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "integer" => Some(Self::Integer),
            "boolean" => Some(Self::Boolean),
            "null" => Some(Self::Null),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Null => "null",
        }
    }
}

/// Structural kind of a schema node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    Primitive(PrimitiveType),
    Array,
    Object,
    AnyOf,
    Unknown,
}

/// Type names declared by `type`, accepting both `"string"` and `["string", "null"]`.
pub fn schema_types(schema: &JsonValue) -> Vec<&str> {
    match schema.get("type") {
        Some(JsonValue::String(s)) => vec![s.as_str()],
        Some(JsonValue::Array(arr)) => arr.iter().filter_map(JsonValue::as_str).collect(),
        _ => Vec::new(),
    }
}

/// First declared type that is not `"null"`.
pub fn primary_type(schema: &JsonValue) -> Option<&str> {
    schema_types(schema).into_iter().find(|t| *t != "null")
}

/// Whether the node itself admits `null` (`type` list or OpenAPI 3.0 `nullable`).
pub fn allows_null(schema: &JsonValue) -> bool {
    schema.get("nullable").and_then(JsonValue::as_bool) == Some(true)
        || schema_types(schema).contains(&"null")
}

/// Union branches of a node. `oneOf` is read as `anyOf`.
pub fn union_branches(schema: &JsonValue) -> Option<&Vec<JsonValue>> {
    schema
        .get("anyOf")
        .or_else(|| schema.get("oneOf"))
        .and_then(JsonValue::as_array)
}

pub fn is_any_of_schema(schema: &JsonValue) -> bool {
    union_branches(schema).is_some()
}

pub fn is_null_schema(schema: &JsonValue) -> bool {
    let types = schema_types(schema);
    !types.is_empty() && types.iter().all(|t| *t == "null")
}

pub fn is_primitive_schema(schema: &JsonValue) -> bool {
    matches!(
        primary_type(schema).and_then(PrimitiveType::parse),
        Some(PrimitiveType::String | PrimitiveType::Number | PrimitiveType::Integer | PrimitiveType::Boolean)
    )
}

pub fn is_array_schema(schema: &JsonValue) -> bool {
    match primary_type(schema) {
        Some(t) => t == "array",
        None => schema.get("items").is_some(),
    }
}

pub fn is_object_schema(schema: &JsonValue) -> bool {
    match primary_type(schema) {
        Some(t) => t == "object",
        None => {
            schema.get("properties").is_some() || schema.get("additionalProperties").is_some()
        }
    }
}

/// A `const` value, or the only member of a single-valued `enum`.
pub fn const_value(schema: &JsonValue) -> Option<&JsonValue> {
    if let Some(c) = schema.get("const") {
        return Some(c);
    }
    match schema.get("enum").and_then(JsonValue::as_array) {
        Some(values) if values.len() == 1 => values.first(),
        _ => None,
    }
}

/// The `type` discriminator of an object branch such as
/// `{"type": "object", "properties": {"type": {"const": "text"}}}`.
pub fn discriminator_of(branch: &JsonValue) -> Option<&str> {
    if !is_object_schema(branch) {
        return None;
    }
    branch
        .get("properties")
        .and_then(|p| p.get("type"))
        .and_then(const_value)
        .and_then(JsonValue::as_str)
}

/// Whether any non-null union branch is a `type`-const discriminated object.
pub fn is_const_discriminated(schema: &JsonValue) -> bool {
    union_branches(schema)
        .map(|branches| {
            branches
                .iter()
                .filter(|b| !is_null_schema(b))
                .any(|b| discriminator_of(b).is_some())
        })
        .unwrap_or(false)
}

/// Classify a schema node. Unions win over any sibling `type`.
pub fn classify(schema: &JsonValue) -> SchemaKind {
    if is_any_of_schema(schema) {
        return SchemaKind::AnyOf;
    }
    if let Some(p) = primary_type(schema).and_then(PrimitiveType::parse) {
        return SchemaKind::Primitive(p);
    }
    if is_array_schema(schema) {
        return SchemaKind::Array;
    }
    if is_object_schema(schema) {
        return SchemaKind::Object;
    }
    if is_null_schema(schema) {
        return SchemaKind::Primitive(PrimitiveType::Null);
    }
    SchemaKind::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_shapes() {
        assert_eq!(
            classify(&json!({"type": "string"})),
            SchemaKind::Primitive(PrimitiveType::String)
        );
        assert_eq!(
            classify(&json!({"type": ["integer", "null"]})),
            SchemaKind::Primitive(PrimitiveType::Integer)
        );
        assert_eq!(classify(&json!({"items": {"type": "string"}})), SchemaKind::Array);
        assert_eq!(classify(&json!({"additionalProperties": true})), SchemaKind::Object);
        assert_eq!(
            classify(&json!({"type": "object", "anyOf": [{"type": "string"}]})),
            SchemaKind::AnyOf
        );
        assert_eq!(classify(&json!({"type": "null"})), SchemaKind::Primitive(PrimitiveType::Null));
        assert_eq!(classify(&json!({})), SchemaKind::Unknown);
        assert_eq!(classify(&json!("not a schema")), SchemaKind::Unknown);
    }

    #[test]
    fn test_allows_null() {
        assert!(allows_null(&json!({"type": ["string", "null"]})));
        assert!(allows_null(&json!({"type": "string", "nullable": true})));
        assert!(!allows_null(&json!({"type": "string"})));
    }

    #[test]
    fn test_one_of_reads_as_union() {
        let schema = json!({"oneOf": [{"type": "string"}, {"type": "null"}]});
        assert!(is_any_of_schema(&schema));
        assert_eq!(union_branches(&schema).map(Vec::len), Some(2));
    }

    #[test]
    fn test_const_discrimination() {
        let text = json!({
            "type": "object",
            "properties": {"type": {"type": "string", "const": "text"}}
        });
        let json_object = json!({
            "type": "object",
            "properties": {"type": {"type": "string", "enum": ["json_object"]}}
        });
        assert_eq!(discriminator_of(&text), Some("text"));
        assert_eq!(discriminator_of(&json_object), Some("json_object"));
        assert!(is_const_discriminated(&json!({"anyOf": [text, {"type": "null"}]})));
        assert!(!is_const_discriminated(
            &json!({"anyOf": [{"type": "string"}, {"type": "array"}]})
        ));
    }
}
