//! OpenAPI document access for playground run endpoints.
//!
//! A playground application publishes an OpenAPI document describing its
//! `…/test` endpoint. The request schema of that endpoint carries the
//! `ag_config` object (prompt and model configuration) and, depending on the
//! application, `inputs` and/or chat `messages`.
//!
//! # Examples
//!
//! ```no_run
//! use playground_core::openapi::OpenApiContext;
//! use playground_core::error::Result;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! let spec = OpenApiContext::from_file("openapi.json").await?;
//!
//! if let Some(endpoint) = spec.test_endpoint() {
//!     println!("Run endpoint: {}", endpoint.path);
//! }
//! let ag_config = spec.ag_config_schema()?;
//! println!("{}", ag_config);
//! # Ok(())
//! # }
//! ```

// Internal imports (std, crate)
use std::path::Path;

use crate::Error;

// External imports (alphabetized)
use serde_json::{Map, Value as JsonValue};
use tokio::fs;

/// Nesting limit for `$ref` resolution; deeper chains are treated as cycles
pub const MAX_REF_DEPTH: usize = 32;

const TEST_SUFFIX: &str = "/test";

/// Represents an OpenAPI specification
#[derive(Debug, Clone, serde::Serialize)]
#[serde(transparent)]
pub struct OpenApiContext {
    /// The raw JSON value of the OpenAPI spec
    pub json: JsonValue,
}

/// The playground run endpoint of a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestEndpoint {
    /// Full path of the endpoint, e.g. `/chat/test`
    pub path: String,
    /// Route prefix in front of `/test`, e.g. `/chat` (empty for `/test`)
    pub route_path: String,
}

impl OpenApiContext {
    /// Wrap an already-parsed document
    pub fn new(json: JsonValue) -> Self {
        Self { json }
    }

    /// Create a new OpenApiContext from a file or URL (supports both YAML and JSON)
    pub async fn from_file_or_url<P: AsRef<str>>(location: P) -> crate::Result<Self> {
        let location = location.as_ref();

        if location.starts_with("http://") || location.starts_with("https://") {
            return Self::from_url(location).await;
        }

        Self::from_file(location).await
    }

    /// Create a new OpenApiContext from a file (supports both YAML and JSON)
    pub async fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await?;
        Self::parse_content(&content).map_err(|e| {
            crate::Error::openapi(format!(
                "Failed to parse OpenAPI spec at {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Create a new OpenApiContext from a URL (supports both YAML and JSON)
    ///
    /// Transport failures and non-2xx statuses surface as [`Error::Http`].
    pub async fn from_url(url: &str) -> crate::Result<Self> {
        let response = reqwest::get(url).await?.error_for_status()?;
        let content = response.text().await?;

        Self::parse_content(&content).map_err(|e| {
            crate::Error::openapi(format!("Failed to parse OpenAPI spec from {}: {}", url, e))
        })
    }

    /// Parse content as either JSON or YAML
    fn parse_content(content: &str) -> Result<Self, String> {
        if let Ok(json) = serde_json::from_str(content) {
            return Ok(Self { json });
        }

        if let Ok(json) = serde_yaml::from_str(content) {
            return Ok(Self { json });
        }

        Err("content is neither valid JSON nor YAML".to_string())
    }

    /// Get a reference to the raw JSON value
    pub fn as_json(&self) -> &JsonValue {
        &self.json
    }

    /// Get the title of the API
    pub fn title(&self) -> Option<&str> {
        self.json.get("info")?.get("title")?.as_str()
    }

    /// Get the version of the API
    pub fn version(&self) -> Option<&str> {
        self.json.get("info")?.get("version")?.as_str()
    }

    /// Locate the run endpoint: a POST path ending in `/test`. The shortest
    /// such path wins so that `/test` is preferred over nested routes.
    pub fn test_endpoint(&self) -> Option<TestEndpoint> {
        let paths = self.json.get("paths")?.as_object()?;
        paths
            .iter()
            .filter(|(path, item)| path.ends_with(TEST_SUFFIX) && item.get("post").is_some())
            .map(|(path, _)| path)
            .min_by_key(|path| path.len())
            .map(|path| TestEndpoint {
                path: path.clone(),
                route_path: path[..path.len() - TEST_SUFFIX.len()].to_string(),
            })
    }

    /// Fully dereferenced JSON schema of the run endpoint's request body
    pub fn request_schema(&self) -> crate::Result<JsonValue> {
        let endpoint = self
            .test_endpoint()
            .ok_or_else(|| Error::openapi("No POST endpoint ending in '/test'"))?;
        let schema = self
            .json
            .get("paths")
            .and_then(|p| p.get(&endpoint.path))
            .and_then(|item| item.get("post"))
            .and_then(|op| op.get("requestBody"))
            .and_then(|body| body.get("content"))
            .and_then(|content| content.get("application/json"))
            .and_then(|json| json.get("schema"))
            .ok_or_else(|| {
                Error::openapi(format!(
                    "Request body of '{}' has no application/json schema",
                    endpoint.path
                ))
            })?;
        self.dereference(schema)
    }

    /// Schema of the `ag_config` request property
    pub fn ag_config_schema(&self) -> crate::Result<JsonValue> {
        self.request_property("ag_config")?
            .ok_or_else(|| Error::openapi("Request schema has no 'ag_config' property"))
    }

    /// Default `ag_config` published with the schema, if any
    pub fn ag_config_defaults(&self) -> crate::Result<Option<JsonValue>> {
        Ok(self.ag_config_schema()?.get("default").cloned())
    }

    /// Schema of the chat `messages` request property, if declared
    pub fn messages_schema(&self) -> crate::Result<Option<JsonValue>> {
        self.request_property("messages")
    }

    /// Whether the application takes a chat history
    pub fn is_chat(&self) -> bool {
        matches!(self.messages_schema(), Ok(Some(_)))
    }

    /// Whether the request schema declares `inputs`
    pub fn accepts_inputs(&self) -> bool {
        matches!(self.request_property("inputs"), Ok(Some(_)))
    }

    fn request_property(&self, name: &str) -> crate::Result<Option<JsonValue>> {
        let schema = self.request_schema()?;
        Ok(schema
            .get("properties")
            .and_then(|props| props.get(name))
            .cloned())
    }

    /// Look up a local `#/...` reference
    pub fn resolve_ref(&self, reference: &str) -> crate::Result<&JsonValue> {
        let pointer = reference
            .strip_prefix('#')
            .ok_or_else(|| Error::openapi(format!("Unsupported schema ref '{}'", reference)))?;
        self.json
            .pointer(pointer)
            .ok_or_else(|| Error::openapi(format!("Schema ref '{}' not found", reference)))
    }

    /// Inline every `$ref` below `schema`.
    ///
    /// Sibling keys of a `$ref` (title, description, default) override the
    /// referenced definition, and a single-element `allOf` is merged into
    /// its parent. Chains deeper than [`MAX_REF_DEPTH`] are reported as
    /// cyclic.
    pub fn dereference(&self, schema: &JsonValue) -> crate::Result<JsonValue> {
        self.dereference_at(schema, 0)
    }

    fn dereference_at(&self, schema: &JsonValue, depth: usize) -> crate::Result<JsonValue> {
        if depth > MAX_REF_DEPTH {
            return Err(Error::openapi(format!(
                "Schema references nest deeper than {} levels (cyclic $ref?)",
                MAX_REF_DEPTH
            )));
        }

        match schema {
            JsonValue::Object(obj) => {
                if let Some(reference) = obj.get("$ref").and_then(JsonValue::as_str) {
                    let target = self.dereference_at(self.resolve_ref(reference)?, depth + 1)?;
                    return Ok(overlay(target, obj, &["$ref"]));
                }
                if let Some([single]) = obj.get("allOf").and_then(JsonValue::as_array).map(Vec::as_slice) {
                    let target = self.dereference_at(single, depth + 1)?;
                    return Ok(overlay(target, obj, &["allOf"]));
                }
                let mut out = Map::with_capacity(obj.len());
                for (k, v) in obj {
                    // Examples and defaults are data, not schema.
                    let v = if k == "default" || k == "example" || k == "examples" {
                        v.clone()
                    } else {
                        self.dereference_at(v, depth)?
                    };
                    out.insert(k.clone(), v);
                }
                Ok(JsonValue::Object(out))
            }
            JsonValue::Array(items) => items
                .iter()
                .map(|item| self.dereference_at(item, depth))
                .collect::<crate::Result<Vec<_>>>()
                .map(JsonValue::Array),
            other => Ok(other.clone()),
        }
    }
}

/// Copy the keys of `siblings` (minus `skip`) over `target`.
fn overlay(target: JsonValue, siblings: &Map<String, JsonValue>, skip: &[&str]) -> JsonValue {
    match target {
        JsonValue::Object(mut merged) => {
            for (k, v) in siblings {
                if !skip.contains(&k.as_str()) {
                    merged.insert(k.clone(), v.clone());
                }
            }
            JsonValue::Object(merged)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chat_spec() -> OpenApiContext {
        OpenApiContext::new(json!({
            "openapi": "3.1.0",
            "info": {"title": "Chat App", "version": "1.0.0"},
            "paths": {
                "/chat/run": {"post": {}},
                "/chat/test": {"post": {"requestBody": {"content": {"application/json": {
                    "schema": {"$ref": "#/components/schemas/TestRequest"}
                }}}}}
            },
            "components": {"schemas": {
                "TestRequest": {
                    "type": "object",
                    "properties": {
                        "ag_config": {"allOf": [{"$ref": "#/components/schemas/AgConfig"}], "default": {"prompt": {}}},
                        "messages": {"type": "array", "items": {"$ref": "#/components/schemas/Message"}},
                        "inputs": {"type": "object", "additionalProperties": true}
                    }
                },
                "AgConfig": {"type": "object", "properties": {
                    "prompt": {"$ref": "#/components/schemas/PromptTemplate", "title": "Prompt"}
                }},
                "PromptTemplate": {"type": "object", "title": "PromptTemplate", "properties": {
                    "messages": {"type": "array", "items": {"$ref": "#/components/schemas/Message"}}
                }},
                "Message": {"type": "object", "title": "Message", "properties": {
                    "role": {"type": "string"}, "content": {"type": "string"}
                }}
            }}
        }))
    }

    #[tokio::test]
    async fn test_from_file() -> crate::Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("openapi.json");
        let json_content = r#"
        {
            "openapi": "3.0.0",
            "info": {
                "title": "Test API Async",
                "version": "2.0.0"
            },
            "paths": {"/test": {"post": {}}}
        }
        "#;
        tokio::fs::write(&file_path, json_content).await?;

        let spec = OpenApiContext::from_file(&file_path).await?;
        assert_eq!(spec.title(), Some("Test API Async"));
        assert_eq!(spec.version(), Some("2.0.0"));
        assert_eq!(
            spec.test_endpoint(),
            Some(TestEndpoint {
                path: "/test".to_string(),
                route_path: String::new()
            })
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_from_yaml_file() -> crate::Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("openapi.yaml");
        tokio::fs::write(
            &file_path,
            "openapi: 3.0.0\ninfo:\n  title: Yaml App\n  version: 0.1.0\npaths: {}\n",
        )
        .await?;

        let spec = OpenApiContext::from_file_or_url(file_path.to_string_lossy()).await?;
        assert_eq!(spec.title(), Some("Yaml App"));
        assert_eq!(spec.test_endpoint(), None);
        Ok(())
    }

    #[test]
    fn test_test_endpoint_route_path() {
        let endpoint = chat_spec().test_endpoint().unwrap();
        assert_eq!(endpoint.path, "/chat/test");
        assert_eq!(endpoint.route_path, "/chat");
    }

    #[test]
    fn test_ag_config_schema_is_dereferenced() -> crate::Result<()> {
        let spec = chat_spec();
        let schema = spec.ag_config_schema()?;
        let prompt = &schema["properties"]["prompt"];
        assert_eq!(prompt["title"], json!("Prompt"));
        assert_eq!(
            prompt["properties"]["messages"]["items"]["title"],
            json!("Message")
        );
        assert_eq!(schema["default"], json!({"prompt": {}}));
        assert_eq!(spec.ag_config_defaults()?, Some(json!({"prompt": {}})));
        Ok(())
    }

    #[test]
    fn test_chat_and_inputs_detection() {
        let spec = chat_spec();
        assert!(spec.is_chat());
        assert!(spec.accepts_inputs());

        let completion = OpenApiContext::new(json!({
            "paths": {"/test": {"post": {"requestBody": {"content": {"application/json": {
                "schema": {"type": "object", "properties": {"ag_config": {"type": "object"}}}
            }}}}}}
        }));
        assert!(!completion.is_chat());
        assert!(!completion.accepts_inputs());
    }

    #[test]
    fn test_cyclic_ref_is_error() {
        let spec = OpenApiContext::new(json!({
            "components": {"schemas": {"Node": {"type": "object", "properties": {
                "next": {"$ref": "#/components/schemas/Node"}
            }}}}
        }));
        let err = spec
            .dereference(&json!({"$ref": "#/components/schemas/Node"}))
            .unwrap_err();
        assert!(err.to_string().contains("cyclic"));
    }

    #[test]
    fn test_missing_ref_is_error() {
        let spec = OpenApiContext::new(json!({}));
        assert!(spec.resolve_ref("#/components/schemas/Missing").is_err());
        assert!(spec.resolve_ref("other.json#/X").is_err());
    }

    #[test]
    fn test_missing_request_body_is_error() {
        let spec = OpenApiContext::new(json!({"paths": {"/test": {"post": {}}}}));
        assert!(spec.request_schema().is_err());
        assert!(!spec.is_chat());
    }

    #[tokio::test]
    async fn test_from_url() -> crate::Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/openapi.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "openapi: 3.1.0\ninfo:\n  title: app\n  version: '2.0'\npaths: {}\n",
            ))
            .mount(&mock_server)
            .await;

        let spec =
            OpenApiContext::from_file_or_url(format!("{}/openapi.yaml", mock_server.uri())).await?;
        assert_eq!(spec.title(), Some("app"));
        assert_eq!(spec.version(), Some("2.0"));

        let missing = OpenApiContext::from_url(&format!("{}/missing.json", mock_server.uri())).await;
        assert!(matches!(missing, Err(Error::Http(_))));
        Ok(())
    }
}
