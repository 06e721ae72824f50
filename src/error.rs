//! Startup error types.
//!
//! Steady-state failures (accept, read, write) never leave the listener or
//! the connection they occur on, so only startup has an error channel.

use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    MissingPort,
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
            ConfigError::MissingPort => {
                write!(f, "Usage: echo-server [OPTIONS] <PORT>")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Failure to set up the listening endpoint.
#[derive(Debug)]
pub enum BindError {
    /// Host and port do not form a socket address.
    InvalidAddress(String, AddrParseError),
    /// The OS refused the socket, bind or listen call.
    Io(SocketAddr, std::io::Error),
}

impl std::fmt::Display for BindError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BindError::InvalidAddress(addr, e) => {
                write!(f, "Invalid listen address '{}': {}", addr, e)
            }
            BindError::Io(addr, e) => write!(f, "Failed to bind {}: {}", addr, e),
        }
    }
}

impl std::error::Error for BindError {}

/// Anything that stops the process before it starts serving.
#[derive(Debug)]
pub enum StartupError {
    Usage(clap::Error),
    Config(ConfigError),
    Bind(BindError),
    Runtime(std::io::Error),
}

impl StartupError {
    /// Every startup failure exits with the same status.
    pub const EXIT_CODE: u8 = 1;
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartupError::Usage(e) => write!(f, "{}", e.render().to_string().trim_end()),
            StartupError::Config(e) => write!(f, "{}", e),
            StartupError::Bind(e) => write!(f, "{}", e),
            StartupError::Runtime(e) => write!(f, "I/O runtime failed: {}", e),
        }
    }
}

impl std::error::Error for StartupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StartupError::Usage(e) => Some(e),
            StartupError::Config(e) => Some(e),
            StartupError::Bind(e) => Some(e),
            StartupError::Runtime(e) => Some(e),
        }
    }
}

impl From<clap::Error> for StartupError {
    fn from(e: clap::Error) -> Self {
        StartupError::Usage(e)
    }
}

impl From<ConfigError> for StartupError {
    fn from(e: ConfigError) -> Self {
        StartupError::Config(e)
    }
}

impl From<BindError> for StartupError {
    fn from(e: BindError) -> Self {
        StartupError::Bind(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_display() {
        let addr: SocketAddr = "127.0.0.1:7".parse().unwrap();
        let err = BindError::Io(
            addr,
            std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use"),
        );
        assert_eq!(err.to_string(), "Failed to bind 127.0.0.1:7: address in use");
    }

    #[test]
    fn test_startup_error_wraps_source() {
        let err: StartupError = ConfigError::MissingPort.into();
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().starts_with("Usage:"));
    }
}
