//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `IMGCTL_CONFIG`
//! environment variable. A missing file is not an error; every field has a default.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `IMGCTL_` override YAML values
//! 3. **PORT** - Special case: overrides `port` if set
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `IMGCTL_STORAGE__ROOT=/srv/uploads` sets the `storage.root` field.
//!
//! ## Example
//!
//! ```yaml
//! host: 0.0.0.0
//! port: 3000
//! storage:
//!   root: uploads
//!   max_file_size: 10485760
//!   default_job_id: test
//! trust_proxy_headers: false
//! cors:
//!   allowed_origins: ["*"]
//! enable_metrics: false
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

/// CLI args: where the config file lives, and whether to only validate it
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "IMGCTL_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Where and how uploaded images are stored
    pub storage: StorageConfig,
    /// Derive the public scheme and host of returned URLs from `X-Forwarded-Proto` and
    /// `X-Forwarded-Host`. Only enable behind a proxy that sets them.
    pub trust_proxy_headers: bool,
    /// CORS configuration for browser clients
    pub cors: CorsConfig,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            storage: StorageConfig::default(),
            trust_proxy_headers: false,
            cors: CorsConfig::default(),
            enable_metrics: false,
            enable_otel_export: false,
        }
    }
}

/// Image storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Storage root, relative to the working directory unless absolute
    pub root: PathBuf,
    /// Largest accepted image in bytes
    pub max_file_size: u64,
    /// Job used when an upload carries no `jobId`
    pub default_job_id: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("uploads"),
            max_file_size: 10 * 1024 * 1024,
            default_job_id: "test".to_string(),
        }
    }
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Allow credentials (cookies) in CORS requests
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Wildcard],
            allow_credentials: false,
            max_age: None,
        }
    }
}

/// CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(figment::Error::from)?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), String> {
        if self.storage.max_file_size == 0 {
            return Err("Config validation: storage.max_file_size must be positive (default: 10485760 = 10 MiB)".to_string());
        }

        if usize::try_from(self.storage.max_file_size).is_err() {
            return Err(format!(
                "Config validation: storage.max_file_size ({}) does not fit in memory on this platform",
                self.storage.max_file_size
            ));
        }

        let job_id = &self.storage.default_job_id;
        let job_id_is_safe = !job_id.is_empty()
            && !job_id.starts_with('/')
            && !job_id.contains(['\\', '\0'])
            && job_id.split('/').all(|segment| !segment.is_empty() && segment != "." && segment != "..");
        if !job_id_is_safe {
            return Err(format!(
                "Config validation: storage.default_job_id {job_id:?} must be a relative path without '.' or '..' segments"
            ));
        }

        if self.cors.allowed_origins.is_empty() {
            return Err("Config validation: CORS allowed_origins cannot be empty. Add at least one allowed origin.".to_string());
        }

        let has_wildcard = self.cors.allowed_origins.iter().any(|origin| matches!(origin, CorsOrigin::Wildcard));
        if has_wildcard && self.cors.allow_credentials {
            return Err(
                "Config validation: CORS cannot use wildcard origin '*' with allow_credentials=true. Specify explicit origins."
                    .to_string(),
            );
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            // (IMGCTL_CONFIG names the file itself, it is not a field)
            .merge(Env::prefixed("IMGCTL_").ignore(&["config"]).split("__"))
            // Conventional PORT, as set by most container platforms
            .merge(Env::raw().only(&["PORT"]))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
