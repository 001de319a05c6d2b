//! Prompt variants and their revisions.
//!
//! A [`VariantRecord`] is the plain form a variant is saved and fetched in.
//! [`Variant::derive`] turns it into editable value trees against the
//! application's `ag_config` schema; [`Variant::to_parameters`] goes back.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::enhanced::{generate_id, EnhancedNode};
use crate::metadata::MetadataStore;
use crate::openapi::OpenApiContext;
use crate::policy;
use crate::transform::{extract_value_by_metadata, to_plain_value, Transformer};
use crate::{Error, Result};

/// Extra key under which a prompt node remembers its `ag_config` key
pub const PROMPT_NAME_KEY: &str = "__name";

static CURLY_VARIABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.]*)\s*\}\}").expect("valid regex"));
static FSTRING_VARIABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));

/// Saved form of a variant revision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantRecord {
    pub id: String,
    pub variant_id: String,
    pub variant_name: String,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// `{"ag_config": {...}}`
    #[serde(default)]
    pub parameters: JsonValue,
}

/// A variant being edited
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub id: String,
    pub variant_id: String,
    pub variant_name: String,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Prompt templates, ordered by `ag_config` key
    pub prompts: Vec<EnhancedNode>,
    /// Non-prompt `ag_config` parameters, by key
    pub custom_properties: BTreeMap<String, EnhancedNode>,
}

impl Variant {
    /// Build editable trees for a saved revision.
    ///
    /// Saved `ag_config` values win over schema defaults. A property whose
    /// schema cannot be transformed is logged and left out.
    pub fn derive(
        record: &VariantRecord,
        openapi: &OpenApiContext,
        store: &MetadataStore,
    ) -> Result<Self> {
        let schema = openapi.ag_config_schema()?;
        let properties = schema
            .get("properties")
            .and_then(JsonValue::as_object)
            .ok_or_else(|| Error::openapi("'ag_config' schema declares no properties"))?;

        let schema_defaults = schema.get("default");
        let saved = record
            .parameters
            .get("ag_config")
            .or(Some(&record.parameters))
            .filter(|v| v.is_object());

        let transformer = Transformer::new(store);
        let mut prompts = Vec::new();
        let mut custom_properties = BTreeMap::new();
        for (key, prop_schema) in properties {
            let value = saved
                .and_then(|s| s.get(key))
                .or_else(|| schema_defaults.and_then(|d| d.get(key)))
                .or_else(|| prop_schema.get("default"))
                .cloned()
                .unwrap_or(JsonValue::Null);

            let node = match transformer.transform_value(&value, prop_schema) {
                Ok(node) => node,
                Err(e) => {
                    log::warn!("Skipping ag_config property '{}': {}", key, e);
                    continue;
                }
            };

            if policy::is_prompt_schema(prop_schema) {
                let mut node = node;
                node.extras
                    .insert(PROMPT_NAME_KEY.to_string(), JsonValue::String(key.clone()));
                prompts.push(node);
            } else {
                custom_properties.insert(key.clone(), node);
            }
        }

        log::debug!(
            "Derived variant '{}' r{} with {} prompt(s) and {} custom propert(ies)",
            record.variant_name,
            record.revision,
            prompts.len(),
            custom_properties.len()
        );

        Ok(Self {
            id: record.id.clone(),
            variant_id: record.variant_id.clone(),
            variant_name: record.variant_name.clone(),
            revision: record.revision,
            created_at: record.created_at,
            updated_at: record.updated_at,
            prompts,
            custom_properties,
        })
    }

    /// Plain `ag_config` object. Prompt `input_keys` are refreshed from the
    /// variables the prompt messages use.
    pub fn to_ag_config(&self, store: &MetadataStore) -> JsonValue {
        let mut config = Map::new();
        for prompt in &self.prompts {
            let Some(name) = prompt.extras.get(PROMPT_NAME_KEY).and_then(JsonValue::as_str) else {
                continue;
            };
            let mut prompt = prompt.clone();
            refresh_input_keys(&mut prompt, store);
            let value = extract_value_by_metadata(Some(&prompt), store)
                .unwrap_or_else(|| JsonValue::Object(Map::new()));
            config.insert(name.to_string(), value);
        }
        for (key, node) in &self.custom_properties {
            if let Some(value) = extract_value_by_metadata(Some(node), store) {
                config.insert(key.clone(), value);
            }
        }
        JsonValue::Object(config)
    }

    /// Plain `{"ag_config": …}` parameters for persistence
    pub fn to_parameters(&self, store: &MetadataStore) -> JsonValue {
        serde_json::json!({ "ag_config": self.to_ag_config(store) })
    }

    /// Record of the revision that saving this variant creates
    pub fn next_revision(&self, store: &MetadataStore) -> VariantRecord {
        let now = Utc::now();
        VariantRecord {
            id: generate_id(),
            variant_id: self.variant_id.clone(),
            variant_name: self.variant_name.clone(),
            revision: self.revision + 1,
            created_at: now,
            updated_at: now,
            parameters: self.to_parameters(store),
        }
    }

    /// Template variables used by all prompts, in first-use order
    pub fn prompt_variables(&self) -> Vec<String> {
        let mut out = Vec::new();
        for prompt in &self.prompts {
            for var in prompt_variables(prompt) {
                if !out.contains(&var) {
                    out.push(var);
                }
            }
        }
        out
    }

    /// Prompt by its `ag_config` key
    pub fn prompt(&self, name: &str) -> Option<&EnhancedNode> {
        self.prompts
            .iter()
            .find(|p| p.extras.get(PROMPT_NAME_KEY).and_then(JsonValue::as_str) == Some(name))
    }
}

/// Template variables of one prompt's messages. `curly` and `jinja2`
/// prompts use `{{var}}`, `fstring` prompts use `{var}`.
pub fn prompt_variables(prompt: &EnhancedNode) -> Vec<String> {
    let pattern = match prompt.child_value("templateFormat").and_then(JsonValue::as_str) {
        Some("fstring") => &*FSTRING_VARIABLE,
        _ => &*CURLY_VARIABLE,
    };

    let mut texts = Vec::new();
    if let Some(messages) = prompt.child("messages") {
        collect_message_texts(&to_plain_value(messages), &mut texts);
    }

    let mut vars: Vec<String> = Vec::new();
    for text in texts {
        for cap in pattern.captures_iter(text.as_str()) {
            let var = cap[1].to_string();
            if !vars.contains(&var) {
                vars.push(var);
            }
        }
    }
    vars
}

fn collect_message_texts(messages: &JsonValue, out: &mut Vec<String>) {
    let Some(messages) = messages.as_array() else {
        return;
    };
    for message in messages {
        match message.get("content") {
            Some(JsonValue::String(s)) => out.push(s.clone()),
            Some(JsonValue::Array(parts)) => out.extend(
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(JsonValue::as_str))
                    .map(String::from),
            ),
            _ => {}
        }
    }
}

/// Replace the prompt's `inputKeys` items with the variables it uses.
fn refresh_input_keys(prompt: &mut EnhancedNode, store: &MetadataStore) {
    let vars = prompt_variables(prompt);
    let Some(keys) = prompt
        .child_mut("inputKeys")
        .and_then(EnhancedNode::array_node_mut)
    else {
        return;
    };
    let item_hash = crate::messages::item_metadata_hash(keys, store);
    if let Some(items) = keys.items_mut() {
        *items = vars
            .into_iter()
            .map(|v| EnhancedNode::primitive(item_hash.clone(), JsonValue::String(v)))
            .collect();
    }
}
