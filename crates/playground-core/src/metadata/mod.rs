//! UI metadata derived from schema nodes.
//!
//! A [`ConfigMetadata`] describes how one schema node is edited: its kind,
//! labels, bounds, nested property/item descriptions and union options. The
//! builder in [`builder`] produces it from JSON schema; the [`store`] keeps
//! one shared copy per distinct shape, addressed by content hash.

pub mod builder;
pub mod store;

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub use builder::{
    create_metadata, create_primitive_metadata, process_any_of_schema, process_array_schema,
    process_object_schema,
};
pub use store::MetadataStore;

/// Normalized description of a schema node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Whether the schema admitted `null`
    #[serde(default)]
    pub nullable: bool,

    #[serde(flatten)]
    pub kind: MetadataKind,
}

/// Shape-specific part of [`ConfigMetadata`], tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataKind {
    String {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        options: Option<Vec<SelectOption>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<JsonValue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<String>,
    },
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
        #[serde(default, rename = "isInteger")]
        is_integer: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<JsonValue>,
    },
    Boolean {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<JsonValue>,
    },
    Array {
        #[serde(
            default,
            rename = "itemMetadata",
            skip_serializing_if = "Option::is_none"
        )]
        item_metadata: Option<Box<ConfigMetadata>>,
        #[serde(default, rename = "minItems", skip_serializing_if = "Option::is_none")]
        min_items: Option<u64>,
        #[serde(default, rename = "maxItems", skip_serializing_if = "Option::is_none")]
        max_items: Option<u64>,
    },
    Object {
        /// Property metadata keyed by camelCase property name
        #[serde(default)]
        properties: BTreeMap<String, ConfigMetadata>,
        #[serde(default, rename = "additionalProperties")]
        additional_properties: bool,
    },
    Compound {
        options: Vec<CompoundOption>,
    },
}

/// One entry of a string `enum` dropdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    pub label: String,
    pub value: JsonValue,
}

/// One branch of a compound (union) node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundOption {
    pub label: String,
    pub value: String,
    pub config: OptionConfig,
}

/// What a compound branch edits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionConfig {
    /// Full metadata of the branch schema
    Metadata(Box<ConfigMetadata>),
    /// Flattened `type`-const branch: the discriminator plus the metadata of
    /// the remaining properties
    Discriminated {
        #[serde(rename = "type")]
        discriminator: String,
        #[serde(default)]
        properties: BTreeMap<String, ConfigMetadata>,
    },
}

impl MetadataKind {
    /// The `type` tag this kind serializes with.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String { .. } => "string",
            Self::Number { .. } => "number",
            Self::Boolean { .. } => "boolean",
            Self::Array { .. } => "array",
            Self::Object { .. } => "object",
            Self::Compound { .. } => "compound",
        }
    }
}

impl ConfigMetadata {
    pub fn new(kind: MetadataKind) -> Self {
        Self {
            title: None,
            description: None,
            nullable: false,
            kind,
        }
    }

    pub fn string() -> Self {
        Self::new(MetadataKind::String {
            options: None,
            default: None,
            format: None,
        })
    }

    pub fn number(is_integer: bool) -> Self {
        Self::new(MetadataKind::Number {
            min: None,
            max: None,
            is_integer,
            default: None,
        })
    }

    pub fn boolean() -> Self {
        Self::new(MetadataKind::Boolean { default: None })
    }

    pub fn array(item_metadata: Option<ConfigMetadata>) -> Self {
        Self::new(MetadataKind::Array {
            item_metadata: item_metadata.map(Box::new),
            min_items: None,
            max_items: None,
        })
    }

    pub fn object(properties: BTreeMap<String, ConfigMetadata>) -> Self {
        Self::new(MetadataKind::Object {
            properties,
            additional_properties: false,
        })
    }

    pub fn compound(options: Vec<CompoundOption>) -> Self {
        Self::new(MetadataKind::Compound { options })
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Declared properties of object metadata
    pub fn properties(&self) -> Option<&BTreeMap<String, ConfigMetadata>> {
        match &self.kind {
            MetadataKind::Object { properties, .. } => Some(properties),
            _ => None,
        }
    }

    /// Item metadata of array metadata
    pub fn item_metadata(&self) -> Option<&ConfigMetadata> {
        match &self.kind {
            MetadataKind::Array { item_metadata, .. } => item_metadata.as_deref(),
            _ => None,
        }
    }

    /// Options of compound metadata
    pub fn compound_options(&self) -> Option<&[CompoundOption]> {
        match &self.kind {
            MetadataKind::Compound { options } => Some(options),
            _ => None,
        }
    }

    /// Schema default carried by primitive metadata
    pub fn default_value(&self) -> Option<&JsonValue> {
        match &self.kind {
            MetadataKind::String { default, .. }
            | MetadataKind::Number { default, .. }
            | MetadataKind::Boolean { default } => default.as_ref(),
            _ => None,
        }
    }
}

impl OptionConfig {
    /// Runtime JSON type a value of this branch has.
    pub fn value_type(&self) -> &'static str {
        match self {
            Self::Metadata(m) => match m.kind {
                MetadataKind::Compound { .. } => "object",
                ref kind => kind.type_name(),
            },
            Self::Discriminated { .. } => "object",
        }
    }

    /// The `type` const of a discriminated branch
    pub fn discriminator(&self) -> Option<&str> {
        match self {
            Self::Metadata(m) => m
                .properties()
                .and_then(|p| p.get("type"))
                .and_then(ConfigMetadata::default_value)
                .and_then(JsonValue::as_str),
            Self::Discriminated { discriminator, .. } => Some(discriminator),
        }
    }

    /// Metadata a value of this branch is transformed against. Flattened
    /// branches become object metadata whose `type` property defaults to the
    /// discriminator.
    pub fn as_metadata(&self, title: &str) -> Cow<'_, ConfigMetadata> {
        match self {
            Self::Metadata(m) => Cow::Borrowed(m),
            Self::Discriminated {
                discriminator,
                properties,
            } => {
                let mut props = properties.clone();
                props.insert(
                    "type".to_string(),
                    ConfigMetadata::new(MetadataKind::String {
                        options: None,
                        default: Some(JsonValue::String(discriminator.clone())),
                        format: None,
                    }),
                );
                Cow::Owned(ConfigMetadata::object(props).with_title(title))
            }
        }
    }
}
