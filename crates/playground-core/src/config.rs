//! Configuration for talking to a playground backend.
//!
//! The configuration names the runtime the run endpoint lives on and the
//! OpenAPI document describing it. It can be created programmatically or
//! loaded from YAML or TOML (chosen by file extension).
//!
//! # Examples
//!
//! ```no_run
//! use playground_core::config::Config;
//!
//! # #[tokio::main]
//! # async fn main() -> playground_core::Result<()> {
//! let mut config = Config::new("http://localhost:8000".parse().unwrap());
//! config.route_path = Some("/chat".to_string());
//!
//! let loaded = Config::from_file("playground.yaml").await?;
//! # Ok(())
//! # }
//! ```

// Internal imports (std, crate)
use std::path::{Path, PathBuf};

use crate::request::RunTarget;

// External imports (alphabetized)
use serde::{Deserialize, Serialize};
use tokio::fs;
use url::Url;

/// Default request timeout for test runs
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Connection settings of a playground session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the application runtime
    #[serde(default = "default_runtime_prefix")]
    pub runtime_prefix: Url,

    /// Route of the application below the runtime prefix (e.g. `/chat`)
    #[serde(default)]
    pub route_path: Option<String>,

    /// Application id sent as `application_id` query parameter
    #[serde(default)]
    pub application_id: Option<String>,

    /// Path or URL of the OpenAPI document
    #[serde(default)]
    pub openapi_path: Option<String>,

    /// Per-run request timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self::new(default_runtime_prefix())
    }
}

impl Config {
    /// Create a new Config with default values
    pub fn new(runtime_prefix: Url) -> Self {
        Self {
            runtime_prefix,
            route_path: None,
            application_id: None,
            openapi_path: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }

    /// Default config file location (`<config dir>/playground/config.yaml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("playground").join("config.yaml"))
    }

    /// Load configuration from a YAML or TOML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await?;
        let config = if is_toml(path) {
            toml::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save configuration to a YAML or TOML file
    pub async fn save<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let path = path.as_ref();
        let content = if is_toml(path) {
            toml::to_string_pretty(self)?
        } else {
            serde_yaml::to_string(self)?
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, content).await?;
        Ok(())
    }

    /// Where test runs are sent
    pub fn run_target(&self) -> RunTarget {
        RunTarget {
            runtime_prefix: self.runtime_prefix.clone(),
            route_path: self.route_path.clone().unwrap_or_default(),
            application_id: self.application_id.clone(),
        }
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("toml")
}

fn default_runtime_prefix() -> Url {
    Url::parse("http://localhost").expect("static URL is valid")
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}
