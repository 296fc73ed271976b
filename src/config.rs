// Configuration File Support
//
// This module provides configuration file parsing for the backup validator.
// Supports TOML format with environment variable overrides.
// The default configuration file is ./backup-validator.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bridge::{RunnerConfig, MAX_OUTPUT_SIZE};
use crate::logging::{LogFormat, LogLevel, LoggingConfig};
use crate::policy::{AllowList, AllowListSource, ALLOWED_IPS_ENV};

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "backup-validator.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP listener configuration
    pub server: ServerConfig,

    /// Client allow-list configuration
    pub access: AccessConfig,

    /// Script execution configuration
    pub scripts: ScriptsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind
    pub host: String,

    /// Port to bind
    pub port: u16,

    /// Debug mode (forces debug-level logging)
    pub debug: bool,

    /// Take the client address from X-Forwarded-For.
    /// Only enable behind a reverse proxy that sets the header itself.
    pub trust_proxy: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5001,
            debug: false,
            trust_proxy: false,
        }
    }
}

/// Client allow-list configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AccessConfig {
    /// Inline allow-list entries (IP literals or CIDR ranges)
    pub allowed_ips: Vec<String>,

    /// File with one entry per line
    pub allow_list_file: Option<PathBuf>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            allowed_ips: Vec::new(),
            allow_list_file: Some(PathBuf::from("allowed_ips.txt")),
        }
    }
}

/// Script execution configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScriptsConfig {
    /// Directory holding the scripts
    pub root: PathBuf,

    /// Per-script deadline in seconds (0 = none)
    pub timeout_secs: u64,

    /// Cap on concurrently running scripts (0 = unbounded)
    pub max_concurrent: usize,

    /// Maximum captured bytes per output stream
    pub max_output_bytes: usize,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("scripts"),
            timeout_secs: 0,
            max_concurrent: 0,
            max_output_bytes: MAX_OUTPUT_SIZE,
        }
    }
}

impl ScriptsConfig {
    /// Runner settings derived from this section
    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            timeout: (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs)),
            max_output_size: self.max_output_bytes,
            max_concurrent: (self.max_concurrent > 0).then_some(self.max_concurrent),
        }
    }
}

impl Config {
    /// Load configuration from a specific path
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - The loaded configuration with defaults and
    ///   environment overrides applied
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or
    /// if the resulting configuration is invalid.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - HOST / BACKUP_VALIDATOR_HOST
    /// - PORT / BACKUP_VALIDATOR_PORT
    /// - BACKUP_VALIDATOR_DEBUG
    /// - BACKUP_VALIDATOR_TRUST_PROXY
    /// - BACKUP_VALIDATOR_ALLOW_LIST_FILE
    /// - BACKUP_VALIDATOR_SCRIPTS_DIR
    /// - BACKUP_VALIDATOR_TIMEOUT_SECS
    /// - BACKUP_VALIDATOR_MAX_CONCURRENT
    /// - BACKUP_VALIDATOR_LOG_LEVEL
    /// - BACKUP_VALIDATOR_LOG_FORMAT
    /// - BACKUP_VALIDATOR_LOG_DIR
    ///
    /// The allow list itself ([`ALLOWED_IPS_ENV`]) is read in [`Config::allow_list`].
    pub fn apply_env_overrides(mut self) -> Self {
        // Server overrides
        if let Some(host) = env_var("BACKUP_VALIDATOR_HOST").or_else(|| env_var("HOST")) {
            self.server.host = host;
        }
        if let Some(port) = env_var("BACKUP_VALIDATOR_PORT").or_else(|| env_var("PORT")) {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Some(debug) = env_var("BACKUP_VALIDATOR_DEBUG") {
            self.server.debug = parse_bool(&debug).unwrap_or(self.server.debug);
        }
        if let Some(trust) = env_var("BACKUP_VALIDATOR_TRUST_PROXY") {
            self.server.trust_proxy = parse_bool(&trust).unwrap_or(self.server.trust_proxy);
        }

        // Access overrides
        if let Some(file) = env_var("BACKUP_VALIDATOR_ALLOW_LIST_FILE") {
            self.access.allow_list_file = Some(PathBuf::from(file));
        }

        // Script overrides
        if let Some(dir) = env_var("BACKUP_VALIDATOR_SCRIPTS_DIR") {
            self.scripts.root = PathBuf::from(dir);
        }
        if let Some(secs) = env_var("BACKUP_VALIDATOR_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                self.scripts.timeout_secs = secs;
            }
        }
        if let Some(max) = env_var("BACKUP_VALIDATOR_MAX_CONCURRENT") {
            if let Ok(max) = max.parse::<usize>() {
                self.scripts.max_concurrent = max;
            }
        }

        // Logging overrides
        if let Some(level) = env_var("BACKUP_VALIDATOR_LOG_LEVEL").and_then(|l| l.parse().ok()) {
            self.logging.level = level;
        }
        if let Some(format) = env_var("BACKUP_VALIDATOR_LOG_FORMAT").and_then(|f| f.parse().ok())
        {
            self.logging.format = format;
        }
        if let Some(dir) = env_var("BACKUP_VALIDATOR_LOG_DIR") {
            self.logging.dir = Some(PathBuf::from(dir));
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be > 0");
        }
        if self.server.host.trim().is_empty() {
            anyhow::bail!("Server host must not be empty");
        }
        if self.scripts.max_output_bytes == 0 {
            anyhow::bail!("scripts.max_output_bytes must be > 0");
        }
        if self.logging.max_file_bytes == 0 {
            anyhow::bail!("logging.max_file_bytes must be > 0");
        }
        Ok(())
    }

    /// Effective logging configuration (debug mode lowers the level)
    pub fn effective_logging(&self) -> LoggingConfig {
        let mut logging = self.logging.clone();
        if self.server.debug && logging.level > LogLevel::Debug {
            logging.level = LogLevel::Debug;
        }
        logging
    }

    /// Build the allow list from the highest-priority configured source
    ///
    /// # Errors
    ///
    /// Returns an error if the allow-list file exists but cannot be read.
    pub fn allow_list(&self) -> Result<AllowList> {
        AllowListSource {
            env: std::env::var(ALLOWED_IPS_ENV).ok(),
            inline: &self.access.allowed_ips,
            file: self.access.allow_list_file.as_deref(),
        }
        .load()
    }

    /// Address string for the listener
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
