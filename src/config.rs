//! Configuration module for the netframe server.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values. All values are
//! validated before the server starts; a bad value never reaches the loop.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;

/// Log verbosity for the diagnostic output on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Filter directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Command-line arguments for the server.
#[derive(Parser, Debug, Default)]
#[command(name = "netframe")]
#[command(version = "0.1.0")]
#[command(about = "A non-blocking framed TCP command server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Listening port (1024..=65535)
    #[arg(long)]
    pub port: Option<u16>,

    /// Maximum concurrent client connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// listen() backlog (must not exceed max-connections)
    #[arg(long)]
    pub backlog: Option<u32>,

    /// Socket receive buffer size in bytes (>= 4096)
    #[arg(long)]
    pub recv_buffer: Option<usize>,

    /// Socket send buffer size in bytes (>= 4096)
    #[arg(long)]
    pub send_buffer: Option<usize>,

    /// Log level (debug, info, warn, error)
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,
}

/// TOML configuration file structure.
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    #[serde(default = "default_socket_buffer")]
    pub recv_buffer: usize,
    #[serde(default = "default_socket_buffer")]
    pub send_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            max_connections: default_max_connections(),
            backlog: default_backlog(),
            recv_buffer: default_socket_buffer(),
            send_buffer: default_socket_buffer(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
}

fn default_port() -> u16 {
    8080
}

fn default_max_connections() -> usize {
    10_000
}

fn default_backlog() -> u32 {
    1024
}

fn default_socket_buffer() -> usize {
    64 * 1024
}

/// Smallest accepted socket buffer size.
pub const MIN_SOCKET_BUFFER: usize = 4096;

/// Final resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub max_connections: usize,
    pub backlog: u32,
    pub recv_buffer: usize,
    pub send_buffer: usize,
    pub log_level: LogLevel,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::resolve(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence) and validate.
    pub fn resolve(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let config = Config {
            port: cli.port.unwrap_or(toml_config.server.port),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            recv_buffer: cli.recv_buffer.unwrap_or(toml_config.server.recv_buffer),
            send_buffer: cli.send_buffer.unwrap_or(toml_config.server.send_buffer),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.port < 1024 {
            return Err(ConfigError::PortTooLow(self.port));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::ZeroMaxConnections);
        }
        if self.backlog == 0 {
            return Err(ConfigError::ZeroBacklog);
        }
        if self.backlog as usize > self.max_connections {
            return Err(ConfigError::BacklogExceedsMaxConnections {
                backlog: self.backlog,
                max_connections: self.max_connections,
            });
        }
        if self.recv_buffer < MIN_SOCKET_BUFFER {
            return Err(ConfigError::SocketBufferTooSmall {
                which: "recv-buffer",
                bytes: self.recv_buffer,
            });
        }
        if self.send_buffer < MIN_SOCKET_BUFFER {
            return Err(ConfigError::SocketBufferTooSmall {
                which: "send-buffer",
                bytes: self.send_buffer,
            });
        }
        Ok(())
    }
}

/// Configuration loading errors.
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    PortTooLow(u16),
    ZeroMaxConnections,
    ZeroBacklog,
    BacklogExceedsMaxConnections { backlog: u32, max_connections: usize },
    SocketBufferTooSmall { which: &'static str, bytes: usize },
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
            ConfigError::PortTooLow(port) => {
                write!(f, "Invalid port {port}: must be >= 1024")
            }
            ConfigError::ZeroMaxConnections => {
                write!(f, "max-connections must be > 0")
            }
            ConfigError::ZeroBacklog => {
                write!(f, "backlog must be > 0")
            }
            ConfigError::BacklogExceedsMaxConnections {
                backlog,
                max_connections,
            } => {
                write!(
                    f,
                    "backlog {backlog} cannot exceed max-connections {max_connections}"
                )
            }
            ConfigError::SocketBufferTooSmall { which, bytes } => {
                write!(
                    f,
                    "{which} {bytes} too small: socket buffers must be >= {MIN_SOCKET_BUFFER} bytes"
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::resolve(CliArgs::default(), TomlConfig::default()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_connections, 10_000);
        assert_eq!(config.backlog, 1024);
        assert_eq!(config.recv_buffer, 64 * 1024);
        assert_eq!(config.send_buffer, 64 * 1024);
        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            port = 9090
            max_connections = 500
            backlog = 128

            [logging]
            level = "debug"
        "#;

        let toml_config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(toml_config.server.port, 9090);
        assert_eq!(toml_config.server.max_connections, 500);
        assert_eq!(toml_config.server.backlog, 128);
        assert_eq!(toml_config.logging.level, LogLevel::Debug);

        let config = Config::resolve(CliArgs::default(), toml_config).unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str("[server]\nport = 9090").unwrap();
        let cli = CliArgs::try_parse_from(["netframe", "--port", "10000"]).unwrap();

        let config = Config::resolve(cli, toml_config).unwrap();
        assert_eq!(config.port, 10000);
    }

    #[test]
    fn test_rejects_privileged_port() {
        let cli = CliArgs::try_parse_from(["netframe", "--port", "80"]).unwrap();
        match Config::resolve(cli, TomlConfig::default()) {
            Err(ConfigError::PortTooLow(80)) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_rejects_zero_max_connections() {
        let cli = CliArgs::try_parse_from(["netframe", "--max-connections", "0"]).unwrap();
        assert!(matches!(
            Config::resolve(cli, TomlConfig::default()),
            Err(ConfigError::ZeroMaxConnections)
        ));
    }

    #[test]
    fn test_rejects_backlog_above_max_connections() {
        let cli =
            CliArgs::try_parse_from(["netframe", "--max-connections", "10", "--backlog", "11"])
                .unwrap();
        assert!(matches!(
            Config::resolve(cli, TomlConfig::default()),
            Err(ConfigError::BacklogExceedsMaxConnections { .. })
        ));
    }

    #[test]
    fn test_rejects_tiny_socket_buffer() {
        let cli = CliArgs::try_parse_from(["netframe", "--recv-buffer", "1024"]).unwrap();
        assert!(matches!(
            Config::resolve(cli, TomlConfig::default()),
            Err(ConfigError::SocketBufferTooSmall {
                which: "recv-buffer",
                bytes: 1024,
            })
        ));
    }
}
