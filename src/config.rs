//! Configuration management

use std::collections::HashMap;
use std::path::Path;

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config. Loaded in
    /// order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Model and script definition directories
    pub definitions: DefinitionsConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// Outbound HTTP configuration
    pub http: HttpConfig,
}

/// HTTP server binding
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8464,
        }
    }
}

/// Where model and script definitions live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefinitionsConfig {
    /// Directory of `models/*.yaml` entity schemas
    pub models_dir: String,
    /// Directory of `scripts/*.yaml` script definitions
    pub scripts_dir: String,
}

impl Default for DefinitionsConfig {
    fn default() -> Self {
        Self {
            models_dir: "models".to_string(),
            scripts_dir: "scripts".to_string(),
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Admin table: username to pre-hashed password
    pub admins: HashMap<String, String>,
    /// Entity holding users
    pub user_model: String,
    /// Entity holding bearer tokens
    pub token_model: String,
    /// User field the `POST /token` username matches against
    pub username_field: String,
    /// User fields projected into the caller context
    pub user_fields: Vec<String>,
    /// Token lifetime in seconds
    pub token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admins: HashMap::new(),
            user_model: "User".to_string(),
            token_model: "AuthnToken".to_string(),
            username_field: "mail".to_string(),
            user_fields: vec!["id".to_string(), "name".to_string(), "mail".to_string()],
            // 30 days
            token_ttl_secs: 2_592_000,
        }
    }
}

/// Outbound HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl Config {
    /// Load configuration: YAML file (if any), then `WEFT_*` environment
    /// variables on top. Nested keys use `__` (`WEFT_SERVER__PORT`).
    ///
    /// Declared `env_files` are loaded into the process environment
    /// first, so their variables participate in the final extraction.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let figment = figment.merge(Env::prefixed("WEFT_").split("__"));

        let preliminary: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        if preliminary.env_files.is_empty() {
            return Ok(preliminary);
        }
        for env_file in &preliminary.env_files {
            if Path::new(env_file).exists() {
                dotenvy::from_path(env_file)
                    .map_err(|e| Error::Config(format!("env file '{env_file}': {e}")))?;
            }
        }
        figment.extract().map_err(|e| Error::Config(e.to_string()))
    }

    /// Build the shared outbound HTTP client.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(self.http.timeout_secs))
            .user_agent(concat!("weft/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::from)
    }
}
