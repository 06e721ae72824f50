//! Configuration module for the echo server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::error::{BindError, ConfigError};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

/// I/O backend driving the listener and its connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// One tokio task per connection.
    #[default]
    Tokio,
    /// Single mio readiness loop with a slab connection registry.
    Mio,
}

/// Deepest recursion `--stack-probe` accepts.
pub const MAX_STACK_PROBE_DEPTH: i64 = 4096;

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "echo-server")]
#[command(version = "0.1.0")]
#[command(about = "An asynchronous TCP echo server", long_about = None)]
pub struct CliArgs {
    /// TCP port to listen on
    pub port: Option<u16>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Interface address to bind (defaults to all IPv4 interfaces)
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// I/O backend
    #[arg(short, long, value_enum)]
    pub runtime: Option<RuntimeType>,

    /// Number of tokio worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Capture and log a stack trace at the given recursion depth, then exit
    #[arg(
        long,
        value_name = "DEPTH",
        value_parser = clap::value_parser!(u16).range(..=MAX_STACK_PROBE_DEPTH)
    )]
    pub stack_probe: Option<u16>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: Option<u16>,
    #[serde(default)]
    pub runtime: RuntimeType,
    pub workers: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            runtime: RuntimeType::default(),
            workers: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
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

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub runtime: RuntimeType,
    pub workers: Option<usize>,
    pub log_level: String,
}

impl Config {
    /// Merge CLI args with an optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = match cli.config {
            Some(ref config_path) => {
                let contents = std::fs::read_to_string(config_path)
                    .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
                toml::from_str(&contents)
                    .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
            }
            None => TomlConfig::default(),
        };

        Self::merge(cli, toml_config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let port = cli
            .port
            .or(toml_config.server.port)
            .ok_or(ConfigError::MissingPort)?;

        Ok(Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port,
            runtime: cli.runtime.unwrap_or(toml_config.server.runtime),
            workers: cli.workers.or(toml_config.server.workers),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }

    /// Socket address the listener binds to.
    pub fn listen_addr(&self) -> Result<SocketAddr, BindError> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse()
            .map_err(|e| BindError::InvalidAddress(addr, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("echo-server").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, None);
        assert_eq!(config.server.runtime, RuntimeType::Tokio);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "127.0.0.1"
            port = 7000
            runtime = "mio"
            workers = 4

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, Some(7000));
        assert_eq!(config.server.runtime, RuntimeType::Mio);
        assert_eq!(config.server.workers, Some(4));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_positional_port() {
        let config = Config::merge(cli(&["7777"]), TomlConfig::default()).unwrap();
        assert_eq!(config.port, 7777);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.runtime, RuntimeType::Tokio);
        assert_eq!(config.listen_addr().unwrap().to_string(), "0.0.0.0:7777");
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: TomlConfig = toml::from_str(
            r#"
            [server]
            host = "127.0.0.1"
            port = 7000
            runtime = "mio"
            "#,
        )
        .unwrap();

        let config = Config::merge(cli(&["8000", "--runtime", "tokio"]), file).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.runtime, RuntimeType::Tokio);
    }

    #[test]
    fn test_missing_port() {
        let err = Config::merge(cli(&[]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingPort));
    }

    #[test]
    fn test_malformed_port_rejected() {
        let args = ["echo-server", "not-a-port"];
        assert!(CliArgs::try_parse_from(args).is_err());

        let args = ["echo-server", "70000"];
        assert!(CliArgs::try_parse_from(args).is_err());
    }

    #[test]
    fn test_stack_probe_depth_is_bounded() {
        assert_eq!(cli(&["--stack-probe", "3"]).stack_probe, Some(3));
        assert_eq!(cli(&["--stack-probe", "4096"]).stack_probe, Some(4096));

        let args = ["echo-server", "--stack-probe", "4097"];
        assert!(CliArgs::try_parse_from(args).is_err());

        let args = ["echo-server", "--stack-probe", "100000000"];
        assert!(CliArgs::try_parse_from(args).is_err());
    }

    #[test]
    fn test_invalid_host() {
        let config = Config::merge(cli(&["7000", "--host", "not a host"]), TomlConfig::default())
            .unwrap();
        assert!(matches!(
            config.listen_addr(),
            Err(BindError::InvalidAddress(_, _))
        ));
    }
}
