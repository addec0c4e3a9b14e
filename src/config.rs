//! Configuration system.
//!
//! Loads settings from a TOML file with environment-variable overrides.
//! Archives are described as an array of tables, one per collector/kind
//! pair:
//!
//! ```toml
//! [[archive]]
//! collector = "routeviews2"
//! root = "/data/routeviews2"
//! discriminator = "updates"
//! save_dir = "/var/lib/bgpvault"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// One entry per served archive.
    #[serde(default)]
    pub archive: Vec<ArchiveConfig>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8083
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One archive: a collector's capture tree for one kind of data.
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    /// Collector name used in URLs and catalog blob filenames.
    pub collector: String,

    /// Root of the capture file tree.
    pub root: PathBuf,

    /// Substring a path must contain to belong to this archive
    /// (e.g. "updates" or "ribs"); also the kind segment in URLs.
    #[serde(default = "default_discriminator")]
    pub discriminator: String,

    /// Directory for the serialized catalog blob.
    pub save_dir: PathBuf,

    /// Minutes between periodic incremental rescans.
    #[serde(default = "default_refresh_minutes")]
    pub refresh_minutes: u64,

    /// Collector file rotation interval in minutes; bounds how far one
    /// file's records extend past its first record.
    #[serde(default = "default_rotation_minutes")]
    pub rotation_minutes: u64,

    #[serde(default)]
    pub debug: bool,
}

fn default_discriminator() -> String {
    "updates".to_string()
}

fn default_refresh_minutes() -> u64 {
    30
}

fn default_rotation_minutes() -> u64 {
    15
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("BGPVAULT_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("BGPVAULT_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }
        if let Ok(level) = std::env::var("BGPVAULT_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("BGPVAULT_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            archive: Vec::new(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# bgpvault configuration
#
# Environment variables override these settings:
# - BGPVAULT_HOST
# - BGPVAULT_PORT
# - BGPVAULT_LOG_LEVEL
# - BGPVAULT_LOG_FORMAT

[server]
# HTTP server host
host = "0.0.0.0"

# HTTP server port
port = 8083

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# One [[archive]] block per served collector/kind pair.
[[archive]]
# Collector name, used in URLs and catalog filenames
collector = "routeviews2"

# Root of the capture file tree
root = "/data/routeviews2"

# Path substring that selects files into this archive
discriminator = "updates"

# Where the serialized catalog is kept
save_dir = "/var/lib/bgpvault"

# Minutes between periodic rescans
refresh_minutes = 30

# Collector rotation interval in minutes
rotation_minutes = 15

# Verbose per-file scan logging
debug = false
"#
    .to_string()
}
