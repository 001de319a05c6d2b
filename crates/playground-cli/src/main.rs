//! playground CLI entrypoint
//! Inspects application schemas, derives variant trees and runs variants.

// Internal imports (std, crate)
use reqwest::Url;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

// External imports (alphabetized)
use anyhow::Context;
use clap::Parser;
use playground_core::messages::create_message_from_schema;
use playground_core::{
    create_metadata, json::try_parse_partial_json, transform_to_request_body, Config,
    EnhancedNode, MetadataStore, OpenApiContext, RunInput, RunRequest, RunWorker, Variant,
    VariantRecord,
};
use serde_json::{json, Value as JsonValue};
use tokio::fs;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "playground")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (YAML or TOML); defaults to the user config dir
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Variant and row data shared by `body` and `run`
#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Path or URL to the application's OpenAPI schema (YAML or JSON)
    #[arg(long)]
    openapi: Option<String>,
    /// Saved variant revision (JSON)
    #[arg(long)]
    variant: PathBuf,
    /// Template variable, repeatable: --input country=France
    #[arg(long = "input", value_parser = parse_key_value)]
    inputs: Vec<(String, String)>,
    /// Chat history as a JSON array of messages
    #[arg(long)]
    messages: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Summarize an OpenAPI schema and print its ag_config metadata
    Inspect {
        /// Path or URL to the OpenAPI schema
        #[arg(long)]
        openapi: Option<String>,
    },
    /// Print the editable value trees of a saved variant
    Transform {
        /// Path or URL to the OpenAPI schema
        #[arg(long)]
        openapi: Option<String>,
        /// Saved variant revision (JSON)
        #[arg(long)]
        variant: PathBuf,
    },
    /// Print the request body a run would send
    Body {
        #[command(flatten)]
        args: RunArgs,
    },
    /// Run a variant against the application's /test endpoint
    Run {
        #[command(flatten)]
        args: RunArgs,
        /// Base URL of the application runtime
        #[arg(long)]
        runtime_prefix: Option<Url>,
        /// Application id
        #[arg(long)]
        app_id: Option<String>,
        /// Request timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Cancel the run after this many milliseconds
        #[arg(long)]
        cancel_after_ms: Option<u64>,
    },
    /// Complete truncated JSON (e.g. a streamed tool call) and print it
    Repair {
        /// File holding the text; reads stdin when omitted
        file: Option<PathBuf>,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))
}

async fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .await
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => match Config::default_path().filter(|p| p.exists()) {
            Some(path) => Config::from_file(&path)
                .await
                .with_context(|| format!("Failed to load config from {}", path.display())),
            None => Ok(Config::default()),
        },
    }
}

async fn load_openapi(location: Option<&str>, config: &Config) -> anyhow::Result<OpenApiContext> {
    let location = location
        .or(config.openapi_path.as_deref())
        .context("No OpenAPI schema given: pass --openapi or set openapi_path in the config")?;
    tracing::info!("Loading OpenAPI schema from: {}", location);
    OpenApiContext::from_file_or_url(location)
        .await
        .with_context(|| format!("Failed to load OpenAPI schema from {}", location))
}

async fn load_variant(path: &Path) -> anyhow::Result<VariantRecord> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read variant {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid variant {}", path.display()))
}

async fn load_messages(
    path: Option<&Path>,
    openapi: &OpenApiContext,
    store: &MetadataStore,
) -> anyhow::Result<Vec<EnhancedNode>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read messages {}", path.display()))?;
    let messages: Vec<JsonValue> = serde_json::from_str(&content)
        .with_context(|| format!("Messages in {} must be a JSON array", path.display()))?;

    let item_schema = openapi
        .messages_schema()?
        .and_then(|schema| schema.get("items").cloned())
        .context("Application does not accept chat messages")?;
    let metadata = create_metadata(&item_schema)?.context("Message schema has no usable type")?;
    Ok(messages
        .iter()
        .map(|m| create_message_from_schema(&metadata, Some(m), store))
        .collect())
}

/// Everything a run needs, loaded from the command line
async fn prepare(
    args: &RunArgs,
    config: &Config,
    store: &MetadataStore,
) -> anyhow::Result<(OpenApiContext, Variant, RunInput)> {
    let openapi = load_openapi(args.openapi.as_deref(), config).await?;
    let record = load_variant(&args.variant).await?;
    let variant = Variant::derive(&record, &openapi, store).context("Failed to derive variant")?;
    let input = RunInput {
        variables: args.inputs.iter().cloned().collect::<BTreeMap<_, _>>(),
        messages: load_messages(args.messages.as_deref(), &openapi, store).await?,
    };
    Ok((openapi, variant, input))
}

fn print_json(value: &JsonValue) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref()).await?;
    let store = Arc::new(MetadataStore::new());

    match &cli.command {
        Commands::Inspect { openapi } => {
            let openapi = load_openapi(openapi.as_deref(), &config).await?;
            let endpoint = openapi.test_endpoint();
            let ag_config = openapi.ag_config_schema()?;
            let metadata = create_metadata(&ag_config)?;
            print_json(&json!({
                "title": openapi.title(),
                "version": openapi.version(),
                "testPath": endpoint.as_ref().map(|e| e.path.as_str()),
                "routePath": endpoint.as_ref().map(|e| e.route_path.as_str()),
                "chat": openapi.is_chat(),
                "inputs": openapi.accepts_inputs(),
                "agConfig": metadata,
            }))?;
        }
        Commands::Transform { openapi, variant } => {
            let openapi = load_openapi(openapi.as_deref(), &config).await?;
            let record = load_variant(variant).await?;
            let variant = Variant::derive(&record, &openapi, &store)?;
            let custom: serde_json::Map<String, JsonValue> = variant
                .custom_properties
                .iter()
                .map(|(k, node)| (k.clone(), node.to_json()))
                .collect();
            print_json(&json!({
                "id": variant.id,
                "variantName": variant.variant_name,
                "revision": variant.revision,
                "prompts": variant.prompts.iter().map(EnhancedNode::to_json).collect::<Vec<_>>(),
                "customProperties": custom,
                "variables": variant.prompt_variables(),
            }))?;
        }
        Commands::Body { args } => {
            let (openapi, variant, input) = prepare(args, &config, &store).await?;
            let body = transform_to_request_body(&variant, &input, &openapi, &store)?;
            print_json(&body)?;
        }
        Commands::Run {
            args,
            runtime_prefix,
            app_id,
            timeout_secs,
            cancel_after_ms,
        } => {
            let mut config = config.clone();
            if let Some(prefix) = runtime_prefix {
                config.runtime_prefix = prefix.clone();
            }
            if app_id.is_some() {
                config.application_id = app_id.clone();
            }
            if let Some(secs) = timeout_secs {
                config.request_timeout_secs = *secs;
            }

            let (openapi, variant, input) = prepare(args, &config, &store).await?;
            let mut target = config.run_target();
            if config.route_path.is_none() {
                if let Some(endpoint) = openapi.test_endpoint() {
                    target.route_path = endpoint.route_path;
                }
            }
            tracing::info!("Running variant '{}' against {}", variant.variant_name, target.test_url()?);

            let mut handle = RunWorker::new(reqwest::Client::new(), Arc::clone(&store))
                .with_timeout(Duration::from_secs(config.request_timeout_secs))
                .start();
            let run_id = playground_core::enhanced::generate_id();
            handle.run(RunRequest {
                run_id: run_id.clone(),
                row_id: "cli".to_string(),
                variant,
                input,
                openapi: Arc::new(openapi),
                target,
            })?;

            if let Some(ms) = cancel_after_ms {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                handle.cancel(&run_id)?;
            }

            let response = handle
                .recv()
                .await
                .context("Run worker stopped without a result")?;
            handle.shutdown().await;

            print_json(&serde_json::to_value(&response.result)?)?;
            if let Some(error) = &response.result.error {
                anyhow::bail!("Run failed: {}", error);
            }
        }
        Commands::Repair { file } => {
            let text = match file {
                Some(path) => fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                None => {
                    use tokio::io::AsyncReadExt;
                    let mut text = String::new();
                    tokio::io::stdin().read_to_string(&mut text).await?;
                    text
                }
            };
            let value = try_parse_partial_json(&text).context("Text is not recoverable JSON")?;
            print_json(&value)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("country=France").unwrap(),
            ("country".to_string(), "France".to_string())
        );
        assert_eq!(
            parse_key_value("q=a=b").unwrap(),
            ("q".to_string(), "a=b".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_cli_parses_run_overrides() {
        let cli = Cli::parse_from([
            "playground",
            "run",
            "--variant",
            "v.json",
            "--input",
            "country=France",
            "--runtime-prefix",
            "http://localhost:8000",
            "--cancel-after-ms",
            "50",
        ]);
        match cli.command {
            Commands::Run {
                args,
                runtime_prefix,
                cancel_after_ms,
                ..
            } => {
                assert_eq!(args.inputs, vec![("country".to_string(), "France".to_string())]);
                assert_eq!(runtime_prefix.unwrap().as_str(), "http://localhost:8000/");
                assert_eq!(cancel_after_ms, Some(50));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
