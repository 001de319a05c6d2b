//! Raw JSON → Enhanced value tree.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use crate::enhanced::{is_enhanced_node, EnhancedField, EnhancedNode, EnhancedValue};
use crate::metadata::{create_metadata, CompoundOption, ConfigMetadata, MetadataKind, MetadataStore};
use crate::policy::{self, TOOL_CONFIGURATION_SCHEMA};
use crate::utils::{is_internal_key, to_lower_camel_case};
use crate::{Error, Result};

static NULL: JsonValue = JsonValue::Null;

/// Builds Enhanced trees, registering every metadata record it uses in the
/// store it was created with.
#[derive(Debug, Clone, Copy)]
pub struct Transformer<'a> {
    store: &'a MetadataStore,
}

impl<'a> Transformer<'a> {
    pub fn new(store: &'a MetadataStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &'a MetadataStore {
        self.store
    }

    /// Transform `value` against a JSON schema.
    pub fn transform_value(&self, value: &JsonValue, schema: &JsonValue) -> Result<EnhancedNode> {
        let metadata = create_metadata(schema)?
            .ok_or_else(|| Error::schema(format!("Unsupported schema: {}", schema)))?;
        Ok(self.transform_with_metadata(value, &metadata))
    }

    /// Transform `value` against already-built metadata.
    pub fn transform_with_metadata(
        &self,
        value: &JsonValue,
        metadata: &ConfigMetadata,
    ) -> EnhancedNode {
        match &metadata.kind {
            MetadataKind::Array { .. } => self.transform_array(value, metadata),
            MetadataKind::Compound { .. } => self.transform_compound(value, metadata),
            MetadataKind::Object { .. } => self.transform_object(value, metadata),
            MetadataKind::String { .. }
            | MetadataKind::Number { .. }
            | MetadataKind::Boolean { .. } => self.transform_primitive(value, metadata),
        }
    }

    /// Array node holding one Enhanced node per item.
    ///
    /// Items of the prompt tools list stay raw JSON under `value`, so any
    /// tool definition survives unchanged. A tools list stored without item
    /// metadata falls back to the tool configuration schema.
    pub fn transform_array(&self, value: &JsonValue, metadata: &ConfigMetadata) -> EnhancedNode {
        let hash = self.store.insert(metadata);
        let is_tools = policy::is_tools_array(metadata);

        let item_metadata: Option<Cow<'_, ConfigMetadata>> = match metadata.item_metadata() {
            Some(m) => Some(Cow::Borrowed(m)),
            None if is_tools => tool_item_metadata().map(Cow::Owned),
            None => None,
        };

        let raw_items = match unwrap_enhanced(value) {
            JsonValue::Array(items) => items.as_slice(),
            _ => &[],
        };

        let items = raw_items
            .iter()
            .map(|item| match item_metadata.as_deref() {
                Some(m) if is_tools && m.properties().is_some() => {
                    EnhancedNode::primitive(self.store.insert(m), unwrap_enhanced(item).clone())
                }
                Some(m) => self.transform_with_metadata(item, m),
                None => self.transform_primitive(item, &infer_metadata(item)),
            })
            .collect();

        EnhancedNode::new(hash, EnhancedValue::Array(items))
    }

    /// Compound node: picks the branch matching the runtime value and
    /// transforms the value against it.
    pub fn transform_compound(&self, value: &JsonValue, metadata: &ConfigMetadata) -> EnhancedNode {
        let hash = self.store.insert(metadata);
        let options = metadata.compound_options().unwrap_or_default();
        let value = unwrap_enhanced(value);

        let Some(option) = select_option(options, value) else {
            return EnhancedNode::new(
                hash,
                EnhancedValue::Compound {
                    selected: String::new(),
                    value: None,
                },
            );
        };

        let branch = option.config.as_metadata(&option.label);
        let inner = self.transform_with_metadata(value, &branch);
        EnhancedNode::new(
            hash,
            EnhancedValue::Compound {
                selected: option.value.clone(),
                value: Some(Box::new(inner)),
            },
        )
    }

    /// Object node with one child per declared property (camelCase keys).
    /// Keys of the source value that the schema does not declare are copied
    /// through verbatim, keeping their original casing.
    pub fn transform_object(&self, value: &JsonValue, metadata: &ConfigMetadata) -> EnhancedNode {
        let hash = self.store.insert(metadata);
        let empty = BTreeMap::new();
        let properties = metadata.properties().unwrap_or(&empty);
        let source = unwrap_enhanced(value).as_object();

        let mut fields = BTreeMap::new();
        for (key, prop_meta) in properties {
            let prop_value = source
                .and_then(|src| {
                    src.iter()
                        .find(|(k, _)| to_lower_camel_case(k) == *key)
                        .map(|(_, v)| v)
                })
                .unwrap_or(&NULL);
            fields.insert(
                key.clone(),
                EnhancedField::Node(self.transform_with_metadata(prop_value, prop_meta)),
            );
        }

        if let Some(src) = source {
            for (k, v) in src.iter().filter(|(k, _)| !is_internal_key(k)) {
                if !properties.contains_key(&to_lower_camel_case(k)) {
                    fields.insert(k.clone(), EnhancedField::Raw(v.clone()));
                }
            }
        }

        EnhancedNode::new(hash, EnhancedValue::Object(fields))
    }

    /// Primitive node. An already-Enhanced input is unwrapped first so it is
    /// never wrapped twice.
    pub fn transform_primitive(&self, value: &JsonValue, metadata: &ConfigMetadata) -> EnhancedNode {
        EnhancedNode::primitive(self.store.insert(metadata), unwrap_enhanced(value).clone())
    }
}

/// The `value` of an Enhanced wrapper, or the input itself.
fn unwrap_enhanced(value: &JsonValue) -> &JsonValue {
    match value.get("value") {
        Some(inner) if is_enhanced_node(value) => inner,
        _ => value,
    }
}

fn tool_item_metadata() -> Option<ConfigMetadata> {
    match create_metadata(&TOOL_CONFIGURATION_SCHEMA) {
        Ok(meta) => meta,
        Err(e) => {
            log::warn!("Failed to build tool configuration metadata: {}", e);
            None
        }
    }
}

/// Pick the union branch for a runtime value: a matching `type`
/// discriminator first, then a branch of the same JSON type, then the first.
pub fn select_option<'o>(options: &'o [CompoundOption], value: &JsonValue) -> Option<&'o CompoundOption> {
    if let Some(tag) = value.get("type").and_then(JsonValue::as_str) {
        if let Some(option) = options
            .iter()
            .find(|o| o.config.discriminator() == Some(tag))
        {
            return Some(option);
        }
    }
    let runtime_type = json_type_name(value);
    options
        .iter()
        .find(|o| Some(o.config.value_type()) == runtime_type)
        .or_else(|| options.first())
}

fn json_type_name(value: &JsonValue) -> Option<&'static str> {
    match value {
        JsonValue::Null => None,
        JsonValue::Bool(_) => Some("boolean"),
        JsonValue::Number(_) => Some("number"),
        JsonValue::String(_) => Some("string"),
        JsonValue::Array(_) => Some("array"),
        JsonValue::Object(_) => Some("object"),
    }
}

/// Metadata for array items whose schema declares no item type.
fn infer_metadata(value: &JsonValue) -> ConfigMetadata {
    match value {
        JsonValue::Bool(_) => ConfigMetadata::boolean(),
        JsonValue::Number(n) => ConfigMetadata::number(n.is_i64() || n.is_u64()),
        JsonValue::Array(_) => ConfigMetadata::array(None),
        JsonValue::Object(_) => ConfigMetadata::new(MetadataKind::Object {
            properties: BTreeMap::new(),
            additional_properties: true,
        }),
        JsonValue::Null | JsonValue::String(_) => ConfigMetadata::string(),
    }
}
