//! Test-run request construction and result shape.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use url::Url;

use crate::enhanced::EnhancedNode;
use crate::generation::{MessageRow, TestRow};
use crate::metadata::MetadataStore;
use crate::openapi::OpenApiContext;
use crate::transform::extract_value_by_metadata;
use crate::variant::Variant;
use crate::{Error, Result};

/// Where test runs of an application are sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTarget {
    pub runtime_prefix: Url,
    /// Route of the application (`/chat`), empty for the root route
    #[serde(default)]
    pub route_path: String,
    #[serde(default)]
    pub application_id: Option<String>,
}

impl RunTarget {
    /// `{runtime_prefix}{route_path}/test?application_id=…`
    pub fn test_url(&self) -> Result<Url> {
        let route = self.route_path.trim_matches('/');
        let mut raw = self.runtime_prefix.as_str().trim_end_matches('/').to_string();
        if !route.is_empty() {
            raw.push('/');
            raw.push_str(route);
        }
        raw.push_str("/test");

        let mut url = Url::parse(&raw)
            .map_err(|e| Error::config(format!("Invalid run URL '{}': {}", raw, e)))?;
        if let Some(app_id) = &self.application_id {
            url.query_pairs_mut().append_pair("application_id", app_id);
        }
        Ok(url)
    }
}

/// Row data a run is built from: template variables and, for chat
/// applications, the conversation so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunInput {
    pub variables: BTreeMap<String, String>,
    pub messages: Vec<EnhancedNode>,
}

impl RunInput {
    pub fn from_test_row(row: &TestRow) -> Self {
        Self {
            variables: row.variables.clone(),
            messages: Vec::new(),
        }
    }

    /// A chat turn: the history of `row`, with variables from `inputs`.
    pub fn from_message_row(row: &MessageRow, inputs: Option<&TestRow>) -> Self {
        Self {
            variables: inputs.map(|r| r.variables.clone()).unwrap_or_default(),
            messages: row.history.clone(),
        }
    }
}

/// Build the POST body of a test run: `{ag_config, inputs?, messages?}`.
///
/// `inputs` is only sent when the request schema declares it, restricted to
/// the variables the variant's prompts use when they use any. `messages` is
/// only sent to chat applications; messages that extract to nothing are
/// left out.
pub fn transform_to_request_body(
    variant: &Variant,
    input: &RunInput,
    openapi: &OpenApiContext,
    store: &MetadataStore,
) -> Result<JsonValue> {
    let mut body = Map::new();
    body.insert("ag_config".to_string(), variant.to_ag_config(store));

    if openapi.accepts_inputs() {
        let wanted = variant.prompt_variables();
        let inputs: Map<String, JsonValue> = input
            .variables
            .iter()
            .filter(|(k, _)| wanted.is_empty() || wanted.contains(k))
            .map(|(k, v)| (k.clone(), JsonValue::String(v.clone())))
            .collect();
        body.insert("inputs".to_string(), JsonValue::Object(inputs));
    }

    if openapi.is_chat() {
        let messages: Vec<JsonValue> = input
            .messages
            .iter()
            .filter_map(|m| extract_value_by_metadata(Some(m), store))
            .collect();
        body.insert("messages".to_string(), JsonValue::Array(messages));
    }

    Ok(JsonValue::Object(body))
}

/// Outcome of one test run as stored in a run slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: ResultMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Error class (`network_error`, `AbortError`, …)
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// Error class of failed requests
pub const NETWORK_ERROR: &str = "network_error";
/// Error class of cancelled requests
pub const ABORT_ERROR: &str = "AbortError";
/// Message shown for cancelled requests
pub const ABORTED_MESSAGE: &str = "Request aborted";

impl TestResult {
    pub fn success(response: JsonValue, status_code: u16) -> Self {
        Self {
            response: Some(response),
            error: None,
            metadata: ResultMetadata::now(Some(status_code), None),
        }
    }

    /// A response the backend answered with an error
    pub fn backend_error(error: impl Into<String>, response: Option<JsonValue>, status_code: u16) -> Self {
        Self {
            response,
            error: Some(error.into()),
            metadata: ResultMetadata::now(Some(status_code), None),
        }
    }

    pub fn network_error(error: impl Into<String>) -> Self {
        Self {
            response: None,
            error: Some(error.into()),
            metadata: ResultMetadata::now(None, Some(NETWORK_ERROR)),
        }
    }

    /// A run that could not be sent at all
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            response: None,
            error: Some(error.into()),
            metadata: ResultMetadata::now(None, None),
        }
    }

    pub fn aborted() -> Self {
        Self {
            response: None,
            error: Some(ABORTED_MESSAGE.to_string()),
            metadata: ResultMetadata::now(None, Some(ABORT_ERROR)),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The `data` payload of a successful response
    pub fn output(&self) -> Option<&JsonValue> {
        self.response.as_ref().and_then(|r| r.get("data"))
    }
}

impl ResultMetadata {
    fn now(status_code: Option<u16>, kind: Option<&str>) -> Self {
        Self {
            timestamp: Utc::now(),
            status_code,
            kind: kind.map(String::from),
        }
    }
}
