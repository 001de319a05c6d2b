//! JSON-schema inspection: shape classification and `anyOf` normalization

pub mod classify;
pub mod extract;

pub use classify::{
    classify, const_value, discriminator_of, is_any_of_schema, is_array_schema,
    is_const_discriminated, is_null_schema, is_object_schema, is_primitive_schema,
    union_branches, PrimitiveType, SchemaKind,
};
pub use extract::{extract_from_any_of, extract_schema, ExtractedSchema};
