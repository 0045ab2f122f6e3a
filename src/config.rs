//! Configuration module for the heartbeat-echo server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "heartbeat-echo")]
#[command(author = "heartbeat-echo authors")]
#[command(version = "0.1.0")]
#[command(about = "A WebSocket echo server with ping/pong liveness detection", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:8080)
    #[arg(short = 'l', long, visible_alias = "addr")]
    pub listen: Option<String>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum number of concurrent WebSocket sessions
    #[arg(long)]
    pub max_sessions: Option<usize>,

    /// HTML page served on every path other than /ws
    #[arg(long)]
    pub landing_page: Option<PathBuf>,

    /// Interval between ping frames, in milliseconds
    #[arg(long)]
    pub heartbeat_interval_ms: Option<u64>,

    /// Bound on sending one ping frame, in milliseconds
    #[arg(long)]
    pub probe_timeout_ms: Option<u64>,

    /// How long to wait for a pong before the peer is presumed dead, in milliseconds
    #[arg(long)]
    pub ack_window_ms: Option<u64>,

    /// Bound on echoing one message, in milliseconds
    #[arg(long)]
    pub write_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatSection,
    #[serde(default)]
    pub websocket: WebSocketSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Maximum number of concurrent sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Static landing page
    #[serde(default = "default_landing_page")]
    pub landing_page: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            workers: None,
            max_sessions: default_max_sessions(),
            landing_page: default_landing_page(),
        }
    }
}

/// Liveness timing, all in milliseconds
#[derive(Debug, Deserialize)]
pub struct HeartbeatSection {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_ack_window_ms")]
    pub ack_window_ms: u64,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            ack_window_ms: default_ack_window_ms(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

/// WebSocket handshake limits
#[derive(Debug, Deserialize)]
pub struct WebSocketSection {
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    #[serde(default = "default_write_buffer_size")]
    pub write_buffer_size: usize,
}

impl Default for WebSocketSection {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            max_frame_size: default_max_frame_size(),
            write_buffer_size: default_write_buffer_size(),
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
    "0.0.0.0:8080".to_string()
}

fn default_max_sessions() -> usize {
    10_000
}

fn default_landing_page() -> PathBuf {
    PathBuf::from("static/client.html")
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_probe_timeout_ms() -> u64 {
    1000
}

fn default_ack_window_ms() -> u64 {
    3000
}

fn default_write_timeout_ms() -> u64 {
    1000
}

fn default_max_message_size() -> usize {
    64 << 20 // 64 MB
}

fn default_max_frame_size() -> usize {
    16 << 20 // 16 MB
}

fn default_write_buffer_size() -> usize {
    128 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Per-session liveness timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Time between pings.
    pub interval: Duration,
    /// Bound on sending one ping.
    pub probe_timeout: Duration,
    /// Read deadline set on accept and after every pong.
    pub ack_window: Duration,
    /// Bound on echoing one data frame.
    pub write_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        HeartbeatSection::default().into()
    }
}

impl From<HeartbeatSection> for HeartbeatConfig {
    fn from(section: HeartbeatSection) -> Self {
        Self {
            interval: Duration::from_millis(section.interval_ms),
            probe_timeout: Duration::from_millis(section.probe_timeout_ms),
            ack_window: Duration::from_millis(section.ack_window_ms),
            write_timeout: Duration::from_millis(section.write_timeout_ms),
        }
    }
}

impl HeartbeatConfig {
    /// Reject timings that cannot work: zero durations, or an ack window
    /// that does not fit a full ping interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("heartbeat interval", self.interval),
            ("probe timeout", self.probe_timeout),
            ("ack window", self.ack_window),
            ("write timeout", self.write_timeout),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
        }
        if self.ack_window <= self.interval {
            return Err(ConfigError::Invalid(format!(
                "ack window ({:?}) must exceed heartbeat interval ({:?})",
                self.ack_window, self.interval
            )));
        }
        Ok(())
    }
}

/// Handshake settings applied to every WebSocket upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpgradeConfig {
    pub max_message_size: usize,
    pub max_frame_size: usize,
    pub write_buffer_size: usize,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        WebSocketSection::default().into()
    }
}

impl From<WebSocketSection> for UpgradeConfig {
    fn from(section: WebSocketSection) -> Self {
        Self {
            max_message_size: section.max_message_size,
            max_frame_size: section.max_frame_size,
            write_buffer_size: section.write_buffer_size,
        }
    }
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub workers: Option<usize>,
    pub max_sessions: usize,
    pub landing_page: PathBuf,
    pub heartbeat: HeartbeatConfig,
    pub upgrade: UpgradeConfig,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::resolve(CliArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they point at.
    pub fn resolve(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let mut heartbeat = toml_config.heartbeat;
        if let Some(ms) = cli.heartbeat_interval_ms {
            heartbeat.interval_ms = ms;
        }
        if let Some(ms) = cli.probe_timeout_ms {
            heartbeat.probe_timeout_ms = ms;
        }
        if let Some(ms) = cli.ack_window_ms {
            heartbeat.ack_window_ms = ms;
        }
        if let Some(ms) = cli.write_timeout_ms {
            heartbeat.write_timeout_ms = ms;
        }
        let heartbeat = HeartbeatConfig::from(heartbeat);
        heartbeat.validate()?;

        let max_sessions = cli.max_sessions.unwrap_or(toml_config.server.max_sessions);
        if max_sessions == 0 {
            return Err(ConfigError::Invalid("max sessions must be non-zero".into()));
        }

        let workers = cli.workers.or(toml_config.server.workers);
        if workers == Some(0) {
            return Err(ConfigError::Invalid("workers must be non-zero".into()));
        }

        Ok(Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            workers,
            max_sessions,
            landing_page: cli
                .landing_page
                .unwrap_or(toml_config.server.landing_page),
            heartbeat,
            upgrade: toml_config.websocket.into(),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
