//! Error handling for the playground core library.
//!
//! This module defines the main error type `Error` used throughout the library,
//! along with a convenient `Result` type alias. It uses `thiserror` for easy
//! error handling and implements conversions from common error types.
//!
//! # Examples
//!
//! ```
//! use playground_core::error::{Error, Result};
//!
//! fn might_fail() -> Result<()> {
//!     Err(Error::schema("No valid non-null schema found in anyOf"))
//! }
//!
//! assert!(might_fail().is_err());
//! ```

use thiserror::Error;

/// Result type for playground operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for playground operations
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// OpenAPI error
    #[error("OpenAPI error: {0}")]
    OpenApi(String),

    /// Malformed or unsupported schema
    #[error("Schema error: {0}")]
    Schema(String),

    /// Value tree could not be built or read back
    #[error("Transform error: {0}")]
    Transform(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Run bookkeeping error
    #[error("Run error: {0}")]
    Run(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new OpenAPI error
    pub fn openapi<S: Into<String>>(msg: S) -> Self {
        Self::OpenApi(msg.into())
    }

    /// Create a new schema error
    pub fn schema<S: Into<String>>(msg: S) -> Self {
        Self::Schema(msg.into())
    }

    /// Create a new transform error
    pub fn transform<S: Into<String>>(msg: S) -> Self {
        Self::Transform(msg.into())
    }

    /// Create a new run error
    pub fn run<S: Into<String>>(msg: S) -> Self {
        Self::Run(msg.into())
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Self::Config(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Self::Config(s)
    }
}
