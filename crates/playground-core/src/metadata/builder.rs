//! Schema → [`ConfigMetadata`] construction.
//!
//! Dispatch order is fixed: integers first (as integer-flagged numbers),
//! then unions, primitives, arrays and finally objects.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value as JsonValue;

use super::{CompoundOption, ConfigMetadata, MetadataKind, OptionConfig, SelectOption};
use crate::policy;
use crate::schema::classify::{allows_null, primary_type};
use crate::schema::{
    discriminator_of, extract_from_any_of, is_any_of_schema, is_array_schema, is_object_schema,
    is_primitive_schema, union_branches,
};
use crate::utils::to_lower_camel_case;
use crate::Result;

/// Build metadata for any schema node. Unrecognised shapes yield `None`.
pub fn create_metadata(schema: &JsonValue) -> Result<Option<ConfigMetadata>> {
    if !is_any_of_schema(schema) && primary_type(schema) == Some("integer") {
        return Ok(create_primitive_metadata(schema));
    }
    if is_any_of_schema(schema) {
        return process_any_of_schema(schema);
    }
    if is_primitive_schema(schema) {
        return Ok(create_primitive_metadata(schema));
    }
    if is_array_schema(schema) {
        return process_array_schema(schema).map(Some);
    }
    if is_object_schema(schema) {
        return process_object_schema(schema).map(Some);
    }
    Ok(None)
}

/// Title, description and nullability shared by all kinds.
fn create_base_metadata(schema: &JsonValue, kind: MetadataKind) -> ConfigMetadata {
    ConfigMetadata {
        title: string_field(schema, "title"),
        description: string_field(schema, "description"),
        nullable: allows_null(schema),
        kind,
    }
}

/// Metadata for `string`, `number`, `integer` and `boolean` schemas.
pub fn create_primitive_metadata(schema: &JsonValue) -> Option<ConfigMetadata> {
    let default = schema.get("default").filter(|d| !d.is_null()).cloned();
    let kind = match primary_type(schema)? {
        "string" => MetadataKind::String {
            options: schema.get("enum").and_then(JsonValue::as_array).map(|values| {
                values
                    .iter()
                    .map(|v| SelectOption {
                        label: v
                            .as_str()
                            .map(String::from)
                            .unwrap_or_else(|| v.to_string()),
                        value: v.clone(),
                    })
                    .collect()
            }),
            default,
            format: string_field(schema, "format"),
        },
        t @ ("number" | "integer") => MetadataKind::Number {
            min: schema.get("minimum").and_then(JsonValue::as_f64),
            max: schema.get("maximum").and_then(JsonValue::as_f64),
            is_integer: t == "integer",
            default,
        },
        "boolean" => MetadataKind::Boolean { default },
        _ => return None,
    };
    Some(create_base_metadata(schema, kind))
}

/// Metadata for `array` schemas; item unions are resolved by the recursion.
pub fn process_array_schema(schema: &JsonValue) -> Result<ConfigMetadata> {
    let item_metadata = match schema.get("items") {
        Some(items) => create_metadata(items)?,
        None => None,
    };
    Ok(create_base_metadata(
        schema,
        MetadataKind::Array {
            item_metadata: item_metadata.map(Box::new),
            min_items: schema.get("minItems").and_then(JsonValue::as_u64),
            max_items: schema.get("maxItems").and_then(JsonValue::as_u64),
        },
    ))
}

/// Metadata for `object` schemas. An object declaring only
/// `additionalProperties` still yields object metadata, with no properties.
pub fn process_object_schema(schema: &JsonValue) -> Result<ConfigMetadata> {
    let properties = schema
        .get("properties")
        .and_then(JsonValue::as_object)
        .map(process_properties)
        .unwrap_or_default();
    let additional_properties = match schema.get("additionalProperties") {
        Some(JsonValue::Bool(b)) => *b,
        Some(JsonValue::Object(_)) => true,
        _ => false,
    };
    Ok(create_base_metadata(
        schema,
        MetadataKind::Object {
            properties,
            additional_properties,
        },
    ))
}

/// Property metadata keyed by camelCase name. A property whose schema
/// fails to process is logged and left out.
fn process_properties(
    properties: &serde_json::Map<String, JsonValue>,
) -> BTreeMap<String, ConfigMetadata> {
    let mut out = BTreeMap::new();
    for (key, prop_schema) in properties {
        match create_metadata(prop_schema) {
            Ok(Some(mut meta)) => {
                meta.nullable |= allows_null(prop_schema);
                out.insert(to_lower_camel_case(key), meta);
            }
            Ok(None) => log::debug!("Skipping property '{}' with unsupported schema", key),
            Err(e) => log::warn!("Failed to process schema for property '{}': {}", key, e),
        }
    }
    out
}

/// Metadata for `anyOf` unions.
///
/// Discriminated unions always become compound metadata. Other unions
/// collapse to their only non-null branch when there is one, and become
/// compound metadata with one option per branch otherwise.
pub fn process_any_of_schema(schema: &JsonValue) -> Result<Option<ConfigMetadata>> {
    let extracted = extract_from_any_of(schema)?;
    let normalized = &extracted.schema;

    let branches: Vec<JsonValue> = match union_branches(normalized) {
        Some(branches) => branches.clone(),
        None => vec![normalized.clone()],
    };

    let discriminated = branches.iter().any(|b| discriminator_of(b).is_some());
    if !discriminated && branches.len() == 1 {
        // collapsed branch already carries the parent title/description
        return Ok(create_metadata(normalized)?.map(|m| {
            let nullable = m.nullable || extracted.nullable;
            m.with_nullable(nullable)
        }));
    }

    let options = if discriminated {
        discriminated_options(&branches)?
    } else {
        generic_options(&branches)?
    };

    let mut meta = ConfigMetadata::compound(options);
    meta.title = string_field(normalized, "title");
    meta.description = string_field(normalized, "description");
    meta.nullable = extracted.nullable;
    Ok(Some(meta))
}

fn discriminated_options(branches: &[JsonValue]) -> Result<Vec<CompoundOption>> {
    let mut options = Vec::new();
    for (index, branch) in branches.iter().enumerate() {
        let Some(discriminator) = discriminator_of(branch) else {
            if let Some(option) = generic_option(branch, index)? {
                options.push(option);
            }
            continue;
        };

        if policy::is_nested_object_branch(branch) {
            let meta = process_object_schema(branch)?;
            options.push(CompoundOption {
                label: meta
                    .title
                    .clone()
                    .unwrap_or_else(|| discriminator.to_string()),
                value: discriminator.to_string(),
                config: OptionConfig::Metadata(Box::new(meta)),
            });
            continue;
        }

        let properties = branch
            .get("properties")
            .and_then(JsonValue::as_object)
            .map(|props| {
                let mut rest = props.clone();
                rest.remove("type");
                process_properties(&rest)
            })
            .unwrap_or_default();
        options.push(CompoundOption {
            label: discriminator.to_string(),
            value: discriminator.to_string(),
            config: OptionConfig::Discriminated {
                discriminator: discriminator.to_string(),
                properties,
            },
        });
    }
    Ok(options)
}

fn generic_options(branches: &[JsonValue]) -> Result<Vec<CompoundOption>> {
    let mut options = Vec::new();
    let mut seen = HashSet::new();
    for (index, branch) in branches.iter().enumerate() {
        if let Some(mut option) = generic_option(branch, index)? {
            if !seen.insert(option.value.clone()) {
                option.value = format!("{}_{}", option.value, index);
                seen.insert(option.value.clone());
            }
            options.push(option);
        }
    }
    Ok(options)
}

fn generic_option(branch: &JsonValue, index: usize) -> Result<Option<CompoundOption>> {
    let Some(meta) = create_metadata(branch)? else {
        log::debug!("Skipping union branch {} with unsupported schema", index);
        return Ok(None);
    };
    let type_name = primary_type(branch)
        .map(String::from)
        .or_else(|| (!is_any_of_schema(branch)).then(|| meta.type_name().to_string()));
    let label = string_field(branch, "title")
        .or_else(|| type_name.clone())
        .unwrap_or_else(|| format!("Option {}", index + 1));
    let value = type_name.unwrap_or_else(|| format!("option_{}", index));
    Ok(Some(CompoundOption {
        label,
        value,
        config: OptionConfig::Metadata(Box::new(meta)),
    }))
}

fn string_field(schema: &JsonValue, key: &str) -> Option<String> {
    schema.get(key).and_then(JsonValue::as_str).map(String::from)
}
