//! Background execution of test runs.
//!
//! The worker owns the HTTP client and receives requests over a channel.
//! Every run executes as its own task, registered under its run id with a
//! [`CancellationToken`]; results come back on a second channel tagged with
//! the same run id. Cancellation stops the request cooperatively. Callers
//! still guard against late results with the run-id check of
//! [`GenerationData::apply_run_result`](crate::generation::GenerationData::apply_run_result).
//!
//! There are no retries: a failed run is reported once.

// Internal imports (std, crate)
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::metadata::MetadataStore;
use crate::openapi::OpenApiContext;
use crate::request::{transform_to_request_body, RunInput, RunTarget, TestResult};
use crate::variant::Variant;
use crate::{Error, Result};

// External imports (alphabetized)
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One run of a variant against a row
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub run_id: String,
    pub row_id: String,
    pub variant: Variant,
    pub input: RunInput,
    pub openapi: Arc<OpenApiContext>,
    pub target: RunTarget,
}

/// Result of a run, tagged for the slot it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct RunResponse {
    pub run_id: String,
    pub row_id: String,
    pub variant_id: String,
    pub result: TestResult,
}

/// Messages the worker accepts
#[derive(Debug)]
pub enum WorkerRequest {
    Run(Box<RunRequest>),
    Cancel { run_id: String },
}

/// Executes runs; see the module docs.
#[derive(Debug)]
pub struct RunWorker {
    client: reqwest::Client,
    store: Arc<MetadataStore>,
    timeout: Option<Duration>,
    inflight: Mutex<HashMap<String, CancellationToken>>,
}

/// Caller side of a spawned [`RunWorker`]
#[derive(Debug)]
pub struct WorkerHandle {
    requests: mpsc::UnboundedSender<WorkerRequest>,
    responses: mpsc::UnboundedReceiver<RunResponse>,
    task: JoinHandle<()>,
}

impl RunWorker {
    pub fn new(client: reqwest::Client, store: Arc<MetadataStore>) -> Self {
        Self {
            client,
            store,
            timeout: None,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Per-request timeout; a timed-out run reports a network error
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Start a worker with default settings on the current runtime
    pub fn spawn(client: reqwest::Client, store: Arc<MetadataStore>) -> WorkerHandle {
        Self::new(client, store).start()
    }

    /// Start this worker on the current runtime
    pub fn start(self) -> WorkerHandle {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(Arc::new(self).serve(request_rx, response_tx));
        WorkerHandle {
            requests: request_tx,
            responses: response_rx,
            task,
        }
    }

    async fn serve(
        self: Arc<Self>,
        mut requests: mpsc::UnboundedReceiver<WorkerRequest>,
        responses: mpsc::UnboundedSender<RunResponse>,
    ) {
        log::debug!("Run worker started");
        while let Some(request) = requests.recv().await {
            match request {
                WorkerRequest::Run(run) => {
                    let token = CancellationToken::new();
                    self.inflight_tokens()
                        .insert(run.run_id.clone(), token.clone());

                    let worker = Arc::clone(&self);
                    let responses = responses.clone();
                    tokio::spawn(async move {
                        let result = worker.execute(&run, token).await;
                        worker.inflight_tokens().remove(&run.run_id);
                        let response = RunResponse {
                            run_id: run.run_id,
                            row_id: run.row_id,
                            variant_id: run.variant.id,
                            result,
                        };
                        if responses.send(response).is_err() {
                            log::debug!("Run result dropped: handle is gone");
                        }
                    });
                }
                WorkerRequest::Cancel { run_id } => {
                    match self.inflight_tokens().remove(&run_id) {
                        Some(token) => {
                            log::debug!("Cancelling run {}", run_id);
                            token.cancel();
                        }
                        None => log::debug!("Cancel for unknown or finished run {}", run_id),
                    }
                }
            }
        }

        for (_, token) in self.inflight_tokens().drain() {
            token.cancel();
        }
        log::debug!("Run worker stopped");
    }

    fn inflight_tokens(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Build the request body, send it and normalize the outcome.
    pub async fn execute(&self, run: &RunRequest, token: CancellationToken) -> TestResult {
        let body = match transform_to_request_body(&run.variant, &run.input, &run.openapi, &self.store) {
            Ok(body) => body,
            Err(e) => return TestResult::failed(e.to_string()),
        };
        let url = match run.target.test_url() {
            Ok(url) => url,
            Err(e) => return TestResult::failed(e.to_string()),
        };

        log::debug!("Run {} → POST {}", run.run_id, url);
        let mut request = self.client.post(url).json(&body);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        tokio::select! {
            biased;

            _ = token.cancelled() => {
                log::debug!("Run {} aborted", run.run_id);
                TestResult::aborted()
            }

            result = send(request) => result,
        }
    }
}

async fn send(request: reqwest::RequestBuilder) -> TestResult {
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            log::warn!("Run request failed: {}", e);
            return TestResult::network_error(e.to_string());
        }
    };

    let status = response.status();
    let text = match response.text().await {
        Ok(text) => text,
        Err(e) => return TestResult::network_error(e.to_string()),
    };
    let payload = serde_json::from_str(&text).unwrap_or(JsonValue::String(text));

    if status.is_success() {
        TestResult::success(payload, status.as_u16())
    } else {
        let message = error_message(&payload)
            .unwrap_or_else(|| format!("HTTP {}", status));
        TestResult::backend_error(message, Some(payload), status.as_u16())
    }
}

/// The backend's `detail` (or `detail.message`) or `error` field.
fn error_message(payload: &JsonValue) -> Option<String> {
    let field = payload.get("detail").or_else(|| payload.get("error"))?;
    match field {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Null => None,
        other => Some(
            other
                .get("message")
                .and_then(JsonValue::as_str)
                .map(String::from)
                .unwrap_or_else(|| other.to_string()),
        ),
    }
}

impl WorkerHandle {
    /// Queue a run
    pub fn run(&self, request: RunRequest) -> Result<()> {
        self.requests
            .send(WorkerRequest::Run(Box::new(request)))
            .map_err(|_| Error::run("Run worker has stopped"))
    }

    /// Ask the worker to abort a run
    pub fn cancel(&self, run_id: impl Into<String>) -> Result<()> {
        self.requests
            .send(WorkerRequest::Cancel {
                run_id: run_id.into(),
            })
            .map_err(|_| Error::run("Run worker has stopped"))
    }

    /// Next finished run, in completion order
    pub async fn recv(&mut self) -> Option<RunResponse> {
        self.responses.recv().await
    }

    /// Stop accepting requests and wait for the worker loop to finish.
    /// Runs still in flight are cancelled.
    pub async fn shutdown(self) {
        let Self { requests, task, .. } = self;
        drop(requests);
        if let Err(e) = task.await {
            log::warn!("Run worker task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::VariantRecord;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeMap;
    use url::Url;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn openapi() -> Arc<OpenApiContext> {
        Arc::new(OpenApiContext::new(json!({
            "paths": {"/test": {"post": {"requestBody": {"content": {"application/json": {"schema": {
                "type": "object",
                "properties": {
                    "ag_config": {"type": "object", "properties": {
                        "prompt": {"type": "object", "x-parameter": "prompt", "properties": {
                            "messages": {"type": "array", "items": {"type": "object", "title": "Message",
                                "properties": {"role": {"type": "string"}, "content": {"type": "string"}}}}
                        }}
                    }},
                    "inputs": {"type": "object"}
                }
            }}}}}}}
        })))
    }

    fn request(store: &MetadataStore, server_uri: &str, run_id: &str) -> RunRequest {
        let openapi = openapi();
        let now = Utc::now();
        let record = VariantRecord {
            id: "rev-1".to_string(),
            variant_id: "var-1".to_string(),
            variant_name: "default".to_string(),
            revision: 1,
            created_at: now,
            updated_at: now,
            parameters: json!({"ag_config": {"prompt": {"messages": [
                {"role": "user", "content": "Capital of {{country}}?"}
            ]}}}),
        };
        let variant = Variant::derive(&record, &openapi, store).unwrap();
        let mut variables = BTreeMap::new();
        variables.insert("country".to_string(), "France".to_string());
        RunRequest {
            run_id: run_id.to_string(),
            row_id: "row-1".to_string(),
            variant,
            input: RunInput {
                variables,
                messages: Vec::new(),
            },
            openapi,
            target: RunTarget {
                runtime_prefix: Url::parse(server_uri).unwrap(),
                route_path: String::new(),
                application_id: Some("app-1".to_string()),
            },
        }
    }

    #[tokio::test]
    async fn test_run_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/test"))
            .and(query_param("application_id", "app-1"))
            .and(body_partial_json(json!({
                "ag_config": {"prompt": {"messages": [{"role": "user", "content": "Capital of {{country}}?"}]}},
                "inputs": {"country": "France"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": "Paris"})))
            .mount(&mock_server)
            .await;

        let store = Arc::new(MetadataStore::new());
        let mut handle = RunWorker::spawn(reqwest::Client::new(), Arc::clone(&store));
        handle.run(request(&store, &mock_server.uri(), "run-1")).unwrap();

        let response = handle.recv().await.unwrap();
        assert_eq!(response.run_id, "run-1");
        assert_eq!(response.row_id, "row-1");
        assert_eq!(response.variant_id, "rev-1");
        assert_eq!(response.result.output(), Some(&json!("Paris")));
        assert_eq!(response.result.metadata.status_code, Some(200));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_backend_error_detail_is_surfaced() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/test"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_json(json!({"detail": {"message": "model overloaded"}})),
            )
            .mount(&mock_server)
            .await;

        let store = Arc::new(MetadataStore::new());
        let worker = RunWorker::new(reqwest::Client::new(), Arc::clone(&store));
        let result = worker
            .execute(&request(&store, &mock_server.uri(), "run-1"), CancellationToken::new())
            .await;
        assert_eq!(result.error.as_deref(), Some("model overloaded"));
        assert_eq!(result.metadata.status_code, Some(500));
    }

    #[tokio::test]
    async fn test_cancel_aborts_run() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/test"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"data": "late"}))
                    .set_delay(Duration::from_secs(10)),
            )
            .mount(&mock_server)
            .await;

        let store = Arc::new(MetadataStore::new());
        let mut handle = RunWorker::spawn(reqwest::Client::new(), Arc::clone(&store));
        handle.run(request(&store, &mock_server.uri(), "run-1")).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel("run-1").unwrap();

        let response = tokio::time::timeout(Duration::from_secs(5), handle.recv())
            .await
            .expect("cancelled run should report promptly")
            .unwrap();
        assert_eq!(response.result.error.as_deref(), Some("Request aborted"));
        assert_eq!(response.result.metadata.kind.as_deref(), Some("AbortError"));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_runs_report_independently() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": "ok"})))
            .mount(&mock_server)
            .await;

        let store = Arc::new(MetadataStore::new());
        let mut handle = RunWorker::spawn(reqwest::Client::new(), Arc::clone(&store));
        handle.run(request(&store, &mock_server.uri(), "a")).unwrap();
        handle.run(request(&store, &mock_server.uri(), "b")).unwrap();

        let mut ids = vec![
            handle.recv().await.unwrap().run_id,
            handle.recv().await.unwrap().run_id,
        ];
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_network_error() {
        let store = Arc::new(MetadataStore::new());
        let worker = RunWorker::new(reqwest::Client::new(), Arc::clone(&store))
            .with_timeout(Duration::from_secs(5));
        let result = worker
            .execute(&request(&store, "http://127.0.0.1:1", "run-1"), CancellationToken::new())
            .await;
        assert!(result.is_error());
        assert_eq!(result.metadata.kind.as_deref(), Some("network_error"));
    }

    #[test]
    fn test_error_message() {
        assert_eq!(error_message(&json!({"detail": "bad"})), Some("bad".to_string()));
        assert_eq!(error_message(&json!({"error": "nope"})), Some("nope".to_string()));
        assert_eq!(
            error_message(&json!({"detail": [{"loc": ["body"]}]})),
            Some(r#"[{"loc":["body"]}]"#.to_string())
        );
        assert_eq!(error_message(&json!("plain")), None);
    }
}
