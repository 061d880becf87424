//! Configuration system for the AskQL server
//!
//! Loads configuration from:
//! 1. config.yaml - operational settings (port, logging, database, guardrails)
//! 2. .env file - secrets (API keys)
//!
//! Environment variables always override config.yaml values. This is the
//! only place the process environment is read; everything downstream gets
//! the resolved [`Config`].

use askql_core::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {var}: {value}")]
    InvalidEnvVar { var: String, value: String },

    #[error(transparent)]
    Pipeline(#[from] askql_core::config::ConfigError),
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the DuckDB database file
    pub path: String,

    /// Feed the table catalog to the translator as schema context
    pub include_catalog: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/demo.duckdb".to_string(),
            include_catalog: true,
        }
    }
}

/// Text-generation service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,

    /// Override for OpenAI-compatible endpoints
    #[serde(default)]
    pub api_base: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            api_base: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or module-specific
    pub level: String,

    /// Output format: pretty, json, compact
    pub format: String,

    /// Output destination: stdout, file, both
    pub output: String,

    /// Directory for log files
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            output: "stdout".to_string(),
            directory: "./logs".to_string(),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from YAML file with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load from `path` when it exists, otherwise start from defaults.
    /// Environment overrides apply either way.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            let mut config = Config::default();
            config.apply_env(|var| std::env::var(var).ok())?;
            config.pipeline.validate()?;
            Ok(config)
        }
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(contents)?;
        config.apply_env(|var| std::env::var(var).ok())?;
        config.pipeline.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("ASKQL_SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("ASKQL_SERVER_PORT") {
            self.server.port = parse_var("ASKQL_SERVER_PORT", port)?;
        }

        if let Some(path) = lookup("ASKQL_DATABASE") {
            self.database.path = path;
        }

        if let Some(max_bytes) = lookup("ASKQL_MAX_BYTES") {
            self.pipeline.max_bytes = parse_var("ASKQL_MAX_BYTES", max_bytes)?;
        }
        if let Some(row_cap) = lookup("ASKQL_ROW_CAP") {
            self.pipeline.row_cap = parse_var("ASKQL_ROW_CAP", row_cap)?;
        }
        if let Some(timeout) = lookup("ASKQL_EXECUTION_TIMEOUT_MS") {
            self.pipeline.execution_timeout_ms = parse_var("ASKQL_EXECUTION_TIMEOUT_MS", timeout)?;
        }
        if let Some(mode) = lookup("ASKQL_VALIDATION_MODE") {
            self.pipeline.validation_mode = parse_var("ASKQL_VALIDATION_MODE", mode)?;
        }

        if let Some(model) = lookup("OPENAI_MODEL") {
            self.llm.model = model;
        }
        if let Some(base) = lookup("OPENAI_API_BASE") {
            self.llm.api_base = Some(base);
        }

        if let Some(level) = lookup("RUST_LOG") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Some(output) = lookup("LOG_OUTPUT") {
            self.logging.output = output;
        }
        if let Some(dir) = lookup("LOG_DIR") {
            self.logging.directory = dir;
        }

        Ok(())
    }

    /// Get OpenAI API key from environment (must be in .env)
    pub fn get_openai_api_key() -> Result<String, ConfigError> {
        std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()))
    }
}

fn parse_var<T: std::str::FromStr>(var: &str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        value,
    })
}
