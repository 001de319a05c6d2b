//! Enhanced value trees.
//!
//! An [`EnhancedNode`] wraps a configuration value with a generated identity
//! (`__id`) and a reference into the [`MetadataStore`] (`__metadata`). Objects
//! spread their children as sibling keys, arrays hold a list of nodes,
//! primitives hold the value itself and compound nodes remember which union
//! branch is `selected`:
//!
//! ```json
//! {"__id": "…", "__metadata": "…",
//!  "role": {"__id": "…", "__metadata": "…", "value": "user"}}
//! ```

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use crate::metadata::MetadataStore;
use crate::utils::is_internal_key;
use crate::{Error, Result};

/// Key of the generated node identity
pub const ID_KEY: &str = "__id";
/// Key of the metadata hash
pub const METADATA_KEY: &str = "__metadata";

/// Generate a fresh node identity
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// A UI-bound value with identity and metadata reference
#[derive(Debug, Clone, PartialEq)]
pub struct EnhancedNode {
    pub id: String,
    pub metadata: String,
    pub value: EnhancedValue,
    /// Other `__`-prefixed UI fields (tool provenance and the like)
    pub extras: Map<String, JsonValue>,
}

/// The payload of an [`EnhancedNode`]
#[derive(Debug, Clone, PartialEq)]
pub enum EnhancedValue {
    Primitive(JsonValue),
    Array(Vec<EnhancedNode>),
    Object(BTreeMap<String, EnhancedField>),
    Compound {
        selected: String,
        value: Option<Box<EnhancedNode>>,
    },
}

/// A key of an object node
#[derive(Debug, Clone, PartialEq)]
pub enum EnhancedField {
    Node(EnhancedNode),
    /// Key present in the source value but not declared by the schema,
    /// carried through untouched
    Raw(JsonValue),
}

impl EnhancedNode {
    pub fn new(metadata: impl Into<String>, value: EnhancedValue) -> Self {
        Self {
            id: generate_id(),
            metadata: metadata.into(),
            value,
            extras: Map::new(),
        }
    }

    pub fn primitive(metadata: impl Into<String>, value: JsonValue) -> Self {
        Self::new(metadata, EnhancedValue::Primitive(value))
    }

    /// Primitive payload, if this is a primitive node
    pub fn as_primitive(&self) -> Option<&JsonValue> {
        match &self.value {
            EnhancedValue::Primitive(v) => Some(v),
            _ => None,
        }
    }

    /// Item nodes, if this is an array node
    pub fn items(&self) -> Option<&[EnhancedNode]> {
        match &self.value {
            EnhancedValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn items_mut(&mut self) -> Option<&mut Vec<EnhancedNode>> {
        match &mut self.value {
            EnhancedValue::Array(items) => Some(items),
            _ => None,
        }
    }

    /// This node if it is an array, or the array selected inside a compound
    pub fn array_node_mut(&mut self) -> Option<&mut EnhancedNode> {
        match self.value {
            EnhancedValue::Array(_) => Some(self),
            EnhancedValue::Compound {
                value: Some(ref mut inner),
                ..
            } => inner.array_node_mut(),
            _ => None,
        }
    }

    /// Child node of an object node by (camelCase) key
    pub fn child(&self, key: &str) -> Option<&EnhancedNode> {
        match &self.value {
            EnhancedValue::Object(fields) => match fields.get(key) {
                Some(EnhancedField::Node(node)) => Some(node),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn child_mut(&mut self, key: &str) -> Option<&mut EnhancedNode> {
        match &mut self.value {
            EnhancedValue::Object(fields) => match fields.get_mut(key) {
                Some(EnhancedField::Node(node)) => Some(node),
                _ => None,
            },
            _ => None,
        }
    }

    /// Primitive value of an object child, looking through compound wrappers
    pub fn child_value(&self, key: &str) -> Option<&JsonValue> {
        self.child(key).and_then(EnhancedNode::leaf_value)
    }

    /// Primitive payload of this node or of the active branch of a compound
    pub fn leaf_value(&self) -> Option<&JsonValue> {
        match &self.value {
            EnhancedValue::Primitive(v) => Some(v),
            EnhancedValue::Compound { value: Some(inner), .. } => inner.leaf_value(),
            _ => None,
        }
    }

    /// Depth-first search by `__id`
    pub fn find(&self, id: &str) -> Option<&EnhancedNode> {
        if self.id == id {
            return Some(self);
        }
        match &self.value {
            EnhancedValue::Primitive(_) => None,
            EnhancedValue::Array(items) => items.iter().find_map(|n| n.find(id)),
            EnhancedValue::Object(fields) => fields.values().find_map(|f| match f {
                EnhancedField::Node(n) => n.find(id),
                EnhancedField::Raw(_) => None,
            }),
            EnhancedValue::Compound { value, .. } => value.as_ref().and_then(|n| n.find(id)),
        }
    }

    /// Depth-first mutable search by `__id`
    pub fn find_mut(&mut self, id: &str) -> Option<&mut EnhancedNode> {
        if self.id == id {
            return Some(self);
        }
        match &mut self.value {
            EnhancedValue::Primitive(_) => None,
            EnhancedValue::Array(items) => items.iter_mut().find_map(|n| n.find_mut(id)),
            EnhancedValue::Object(fields) => fields.values_mut().find_map(|f| match f {
                EnhancedField::Node(n) => n.find_mut(id),
                EnhancedField::Raw(_) => None,
            }),
            EnhancedValue::Compound { value, .. } => {
                value.as_mut().and_then(|n| n.find_mut(id))
            }
        }
    }

    /// Replace the primitive value of the node with `__id == id`.
    pub fn set_value(&mut self, id: &str, value: JsonValue) -> Result<()> {
        let node = self
            .find_mut(id)
            .ok_or_else(|| Error::transform(format!("No node with id '{}'", id)))?;
        match &mut node.value {
            EnhancedValue::Primitive(v) => {
                *v = value;
                Ok(())
            }
            _ => Err(Error::transform(format!(
                "Node '{}' is not a primitive node",
                id
            ))),
        }
    }

    /// Serialize to the `__id`/`__metadata` wire shape
    pub fn to_json(&self) -> JsonValue {
        let mut out = Map::new();
        out.insert(ID_KEY.to_string(), JsonValue::String(self.id.clone()));
        out.insert(
            METADATA_KEY.to_string(),
            JsonValue::String(self.metadata.clone()),
        );
        for (k, v) in &self.extras {
            out.insert(k.clone(), v.clone());
        }
        match &self.value {
            EnhancedValue::Primitive(v) => {
                out.insert("value".to_string(), v.clone());
            }
            EnhancedValue::Array(items) => {
                out.insert(
                    "value".to_string(),
                    JsonValue::Array(items.iter().map(EnhancedNode::to_json).collect()),
                );
            }
            EnhancedValue::Object(fields) => {
                for (k, field) in fields {
                    let v = match field {
                        EnhancedField::Node(n) => n.to_json(),
                        EnhancedField::Raw(v) => v.clone(),
                    };
                    out.insert(k.clone(), v);
                }
            }
            EnhancedValue::Compound { selected, value } => {
                out.insert("selected".to_string(), JsonValue::String(selected.clone()));
                if let Some(inner) = value {
                    out.insert("value".to_string(), inner.to_json());
                }
            }
        }
        JsonValue::Object(out)
    }

    /// Parse the wire shape back into a tree. The node kind follows the
    /// referenced metadata; nodes whose metadata is unknown to `store` are
    /// read by shape.
    pub fn from_json(json: &JsonValue, store: &MetadataStore) -> Result<Self> {
        let obj = json
            .as_object()
            .ok_or_else(|| Error::transform("Enhanced node must be a JSON object"))?;
        let id = obj
            .get(ID_KEY)
            .and_then(JsonValue::as_str)
            .ok_or_else(|| Error::transform("Enhanced node is missing '__id'"))?
            .to_string();
        let metadata = obj
            .get(METADATA_KEY)
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string();

        let extras: Map<String, JsonValue> = obj
            .iter()
            .filter(|(k, _)| is_internal_key(k) && *k != ID_KEY && *k != METADATA_KEY)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let kind = store.get(&metadata).map(|m| m.type_name());
        let shape = match kind {
            Some("compound") => Shape::Compound,
            Some("array") => Shape::Array,
            Some("object") if !looks_wrapped(obj) => Shape::Object,
            Some(_) => Shape::Primitive,
            None => guess_shape(obj),
        };

        let value = match shape {
            Shape::Compound => EnhancedValue::Compound {
                selected: obj
                    .get("selected")
                    .map(|s| s.as_str().map(String::from).unwrap_or_else(|| s.to_string()))
                    .unwrap_or_default(),
                value: match obj.get("value") {
                    Some(inner) if is_enhanced_node(inner) => {
                        Some(Box::new(Self::from_json(inner, store)?))
                    }
                    _ => None,
                },
            },
            Shape::Array => {
                let items = obj
                    .get("value")
                    .and_then(JsonValue::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .map(|item| Self::from_json(item, store))
                            .collect::<Result<Vec<_>>>()
                    })
                    .transpose()?
                    .unwrap_or_default();
                EnhancedValue::Array(items)
            }
            Shape::Object => {
                let mut fields = BTreeMap::new();
                for (k, v) in obj.iter().filter(|(k, _)| !is_internal_key(k)) {
                    let field = if is_enhanced_node(v) {
                        EnhancedField::Node(Self::from_json(v, store)?)
                    } else {
                        EnhancedField::Raw(v.clone())
                    };
                    fields.insert(k.clone(), field);
                }
                EnhancedValue::Object(fields)
            }
            Shape::Primitive => {
                EnhancedValue::Primitive(obj.get("value").cloned().unwrap_or(JsonValue::Null))
            }
        };

        Ok(Self {
            id,
            metadata,
            value,
            extras,
        })
    }
}

impl Serialize for EnhancedNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

enum Shape {
    Primitive,
    Array,
    Object,
    Compound,
}

/// Whether a JSON value is an Enhanced node (carries `__id`).
pub fn is_enhanced_node(value: &JsonValue) -> bool {
    value.get(ID_KEY).is_some_and(JsonValue::is_string)
}

/// Object-typed metadata on a node that only holds `value` (raw tool items).
fn looks_wrapped(obj: &Map<String, JsonValue>) -> bool {
    obj.contains_key("value") && obj.keys().all(|k| k == "value" || is_internal_key(k))
}

fn guess_shape(obj: &Map<String, JsonValue>) -> Shape {
    if obj.contains_key("selected") {
        return Shape::Compound;
    }
    match obj.get("value") {
        Some(JsonValue::Array(items)) if items.iter().all(is_enhanced_node) => Shape::Array,
        Some(_) => Shape::Primitive,
        None => Shape::Object,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ConfigMetadata;
    use serde_json::json;

    fn message_tree(store: &MetadataStore) -> EnhancedNode {
        let string_hash = store.insert(&ConfigMetadata::string());
        let mut fields = BTreeMap::new();
        fields.insert(
            "role".to_string(),
            EnhancedField::Node(EnhancedNode::primitive(&string_hash, json!("user"))),
        );
        fields.insert(
            "content".to_string(),
            EnhancedField::Node(EnhancedNode::primitive(&string_hash, json!("hi"))),
        );
        fields.insert("x-extension".to_string(), EnhancedField::Raw(json!(42)));
        let object_hash = store.insert(&ConfigMetadata::object(BTreeMap::new()));
        EnhancedNode::new(object_hash, EnhancedValue::Object(fields))
    }

    #[test]
    fn test_wire_shape_spreads_object_children() {
        let store = MetadataStore::new();
        let tree = message_tree(&store);
        let json = tree.to_json();
        assert_eq!(json["role"]["value"], json!("user"));
        assert_eq!(json["content"]["value"], json!("hi"));
        assert_eq!(json["x-extension"], json!(42));
        assert!(json.get("value").is_none());
        assert_eq!(json[ID_KEY], json!(tree.id));
    }

    #[test]
    fn test_from_json_restores_tree() {
        let store = MetadataStore::new();
        let tree = message_tree(&store);
        let parsed = EnhancedNode::from_json(&tree.to_json(), &store).unwrap();
        assert_eq!(parsed, tree);
    }

    #[test]
    fn test_from_json_by_shape_without_metadata() {
        let store = MetadataStore::new();
        let json = json!({
            "__id": "a", "__metadata": "unknown",
            "value": [
                {"__id": "b", "__metadata": "unknown", "value": "x"},
                {"__id": "c", "__metadata": "unknown", "selected": "string",
                 "value": {"__id": "d", "__metadata": "unknown", "value": "y"}}
            ]
        });
        let node = EnhancedNode::from_json(&json, &store).unwrap();
        let items = node.items().unwrap();
        assert_eq!(items[0].as_primitive(), Some(&json!("x")));
        assert_eq!(items[1].leaf_value(), Some(&json!("y")));
        assert_eq!(node.to_json(), json);
    }

    #[test]
    fn test_extras_round_trip() {
        let store = MetadataStore::new();
        let json = json!({"__id": "t", "__metadata": "m", "__source": "builtin",
                          "value": {"type": "function"}});
        let node = EnhancedNode::from_json(&json, &store).unwrap();
        assert_eq!(node.extras.get("__source"), Some(&json!("builtin")));
        assert_eq!(node.as_primitive(), Some(&json!({"type": "function"})));
        assert_eq!(node.to_json(), json);
    }

    #[test]
    fn test_find_and_set_value() {
        let store = MetadataStore::new();
        let mut tree = message_tree(&store);
        let content_id = tree.child("content").unwrap().id.clone();
        tree.set_value(&content_id, json!("hello")).unwrap();
        assert_eq!(tree.child_value("content"), Some(&json!("hello")));
        assert!(tree.find(&content_id).is_some());

        let root_id = tree.id.clone();
        assert!(tree.set_value(&root_id, json!("x")).is_err());
        assert!(tree.set_value("missing", json!("x")).is_err());
    }
}
