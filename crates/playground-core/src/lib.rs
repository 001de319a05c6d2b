//! Playground Core Library
//!
//! This library turns the OpenAPI request schema of an LLM application into
//! editable value trees, turns edited trees back into plain request
//! payloads, and runs variants against the application's `/test` endpoint.

pub mod config;
pub mod enhanced;
pub mod error;
pub mod generation;
pub mod json;
pub mod messages;
pub mod metadata;
pub mod openapi;
pub mod policy;
pub mod request;
pub mod schema;
pub mod transform;
pub mod utils;
pub mod variant;
pub mod worker;

pub use crate::{
    config::Config,
    enhanced::{EnhancedField, EnhancedNode, EnhancedValue},
    error::{Error, Result},
    generation::{GenerationData, MessageRow, RunSlot, TestRow},
    metadata::{create_metadata, ConfigMetadata, MetadataKind, MetadataStore},
    openapi::OpenApiContext,
    request::{transform_to_request_body, RunInput, RunTarget, TestResult},
    transform::{extract_value_by_metadata, Transformer},
    variant::{Variant, VariantRecord},
    worker::{RunRequest, RunResponse, RunWorker, WorkerHandle},
};
