//! Application Configuration
//!
//! This module provides configuration management for the application,
//! supporting YAML configuration files with sensible defaults and a few
//! environment overrides.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use log::{info, warn};

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Environment variable naming an alternative configuration file
pub const CONFIG_PATH_ENV: &str = "KODI_BUCKET_CONFIG";

/// Object store backend types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum StorageBackend {
    #[default]
    LocalFs,
    Mock,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "localfs" | "local" | "fs" => Ok(StorageBackend::LocalFs),
            "mock" => Ok(StorageBackend::Mock),
            _ => Err(format!("Unknown storage backend: {}", s)),
        }
    }
}

/// Metadata table source types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum MetadataSourceKind {
    #[default]
    None,
    Csv,
}

impl std::str::FromStr for MetadataSourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "" => Ok(MetadataSourceKind::None),
            "csv" => Ok(MetadataSourceKind::Csv),
            _ => Err(format!("Unknown metadata source: {}", s)),
        }
    }
}

/// Where TLS certificates come from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum TlsMode {
    /// Serve plain HTTP
    #[default]
    None,
    /// PEM files on disk, re-read when they change
    Files,
    /// A command printing one JSON certificate per line
    Command,
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Object store configuration
    pub storage: StorageConfig,
    /// Metadata table configuration
    pub metadata: MetadataConfig,
    /// TLS configuration
    pub tls: TlsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Number of worker threads
    pub workers: usize,
    /// Seconds a stopping listener may spend draining in-flight responses
    pub shutdown_timeout_secs: u64,
    /// Externally visible base URL, used for proxied thumbnail links
    pub public_url: Option<String>,
    /// Group titles into subdirectories by their `subdir` label
    pub subdirs: bool,
    /// Log progress of every media transfer
    pub verbose: bool,
    /// HTTP Basic Auth username
    pub username: Option<String>,
    /// HTTP Basic Auth password
    pub password: Option<String>,
}

/// Object store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Object store backend type
    pub backend: StorageBackend,
    /// Root directory for the local filesystem backend
    pub base_path: String,
}

/// Metadata table configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Metadata source type
    pub source: MetadataSourceKind,
    /// Path of the CSV export of the metadata spreadsheet
    pub path: String,
    /// Seconds after which both caches are reloaded
    pub staleness_secs: u64,
    /// Extensions of objects listed as media
    pub media_extensions: Vec<String>,
}

/// TLS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub mode: TlsMode,
    pub cert_path: String,
    pub key_path: String,
    /// Quiet period after a PEM file change before reloading
    pub settle_millis: u64,
    /// Shell command producing certificates
    pub command: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Path to log4rs configuration file
    pub config_file: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 1549,
            workers: 4,
            shutdown_timeout_secs: 30,
            public_url: None,
            subdirs: true,
            verbose: false,
            username: None,
            password: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::LocalFs,
            base_path: "./data/bucket".to_string(),
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            source: MetadataSourceKind::None,
            path: "./data/titles.csv".to_string(),
            staleness_secs: 300, // 5 minutes
            media_extensions: [".iso", ".m2ts", ".m4v", ".mp4"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            mode: TlsMode::None,
            cert_path: String::new(),
            key_path: String::new(),
            settle_millis: 500,
            command: String::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            config_file: "server_log.yaml".to_string(),
        }
    }
}

impl ServerConfig {
    /// Address the listener binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Basic auth credentials, when both halves are configured
    pub fn basic_auth(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some((u, p)),
            _ => None,
        }
    }
}

impl MetadataConfig {
    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }
}

impl AppConfig {
    /// Load configuration from the configured file, use defaults if not found
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file, use defaults if it does not exist
    pub fn load_from(config_path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = config_path.as_ref();
        if config_path.exists() {
            let content = fs::read_to_string(config_path)?;
            let config: AppConfig = serde_yaml::from_str(&content)?;
            info!("Loaded configuration from {}", config_path.display());
            Ok(config)
        } else {
            warn!("Config file {} not found, using defaults", config_path.display());
            Ok(Self::default())
        }
    }

    /// Apply STORAGE_BACKEND, METADATA_SOURCE and the basic auth variables
    pub fn apply_env_overrides(&mut self) {
        if let Ok(backend_str) = env::var("STORAGE_BACKEND") {
            match backend_str.parse::<StorageBackend>() {
                Ok(backend) => {
                    info!("Using storage backend from environment: {:?}", backend);
                    self.storage.backend = backend;
                }
                Err(e) => warn!("Invalid storage backend in environment: {}. Keeping {:?}.", e, self.storage.backend),
            }
        }

        if let Ok(source_str) = env::var("METADATA_SOURCE") {
            match source_str.parse::<MetadataSourceKind>() {
                Ok(source) => {
                    info!("Using metadata source from environment: {:?}", source);
                    self.metadata.source = source;
                }
                Err(e) => warn!("Invalid metadata source in environment: {}. Keeping {:?}.", e, self.metadata.source),
            }
        }

        if let Ok(username) = env::var("KODI_BUCKET_USERNAME") {
            self.server.username = Some(username);
        }
        if let Ok(password) = env::var("KODI_BUCKET_PASSWORD") {
            self.server.password = Some(password);
        }
    }
}
