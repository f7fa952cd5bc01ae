//! Configuration module for the botticelli server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the NDT server
#[derive(Parser, Debug)]
#[command(name = "botticelli")]
#[command(author = "botticelli authors")]
#[command(version)]
#[command(about = "An NDT-compatible network diagnostic server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Control channel address to bind to (e.g., 0.0.0.0:3001)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Port announced to clients for the S2C data connection
    #[arg(long)]
    pub s2c_port: Option<u16>,

    /// Length of the S2C measurement window in seconds
    #[arg(long)]
    pub s2c_duration: Option<u64>,

    /// Payload written on the S2C data connection
    #[arg(long, value_enum)]
    pub s2c_fill: Option<FillMode>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Contents of the S2C send buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FillMode {
    /// Repeated ASCII 'A'
    #[default]
    Pattern,
    /// Pseudo-random bytes, generated once per test
    Random,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub s2c: S2cConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Control channel address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// S2C sub-test configuration
#[derive(Debug, Deserialize)]
pub struct S2cConfig {
    /// Data connection port. Not randomized; clients are told this port.
    #[serde(default = "default_s2c_port")]
    pub port: u16,
    /// Measurement window in seconds
    #[serde(default = "default_s2c_duration")]
    pub duration_secs: u64,
    /// Send buffer contents
    #[serde(default)]
    pub fill: FillMode,
}

impl Default for S2cConfig {
    fn default() -> Self {
        Self {
            port: default_s2c_port(),
            duration_secs: default_s2c_duration(),
            fill: FillMode::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_s2c_port() -> u16 {
    3010
}

fn default_s2c_duration() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Per-connection settings for the S2C sub-test.
#[derive(Debug, Clone)]
pub struct S2cSettings {
    pub port: u16,
    pub duration: Duration,
    pub fill: FillMode,
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub s2c: S2cSettings,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(cli, toml_config))
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            s2c: S2cSettings {
                port: cli.s2c_port.unwrap_or(toml_config.s2c.port),
                duration: Duration::from_secs(
                    cli.s2c_duration.unwrap_or(toml_config.s2c.duration_secs),
                ),
                fill: cli.s2c_fill.unwrap_or(toml_config.s2c.fill),
            },
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
