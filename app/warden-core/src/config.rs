//! Configuration management.
//!
//! Warden configuration is loaded from multiple sources with the following priority:
//!
//! 1. Environment variables (`WARDEN_*`, nested keys separated by `__`)
//! 2. User config file (`~/.config/warden/config.toml`)
//! 3. System config file (`/etc/warden/config.toml`)
//! 4. Default values
//!
//! ## Example Configuration File
//!
//! ```toml
//! [server]
//! listen = "unix:///run/warden.sock"
//!
//! [engine]
//! host = "unix:///var/run/docker.sock"
//! api_version = "1.41"
//! strict_version = false
//!
//! [identity]
//! cgroup_parent = ""
//! hostname = ""
//!
//! [shutdown]
//! stop_timeout_secs = 10
//!
//! [logging]
//! level = "info"
//! ```

use crate::error::{CoreError, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Engine API version the gateway is written against.
pub const TARGET_API_VERSION: &str = "1.41";

/// Warden configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listening endpoint.
    pub server: ServerConfig,
    /// Backend engine.
    pub engine: EngineConfig,
    /// Gateway identity overrides.
    pub identity: IdentityConfig,
    /// Coordinated shutdown.
    pub shutdown: ShutdownConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Config {
    /// Loads configuration from files and environment.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> std::result::Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(system_config_path()))
            .merge(Toml::file(user_config_path()))
            .merge(Env::prefixed("WARDEN_").split("__"))
            .extract()
    }

    /// Loads configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: impl AsRef<Path>) -> std::result::Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("WARDEN_").split("__"))
            .extract()
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// `tcp://host:port` or `unix:///path`.
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "tcp://0.0.0.0:2375".to_string(),
        }
    }
}

/// Backend engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// `unix:///path` or `tcp://host:port`.
    pub host: String,
    /// Minimum engine API version.
    pub api_version: String,
    /// Refuse to start against an older engine instead of warning.
    pub strict_version: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: "unix:///var/run/docker.sock".to_string(),
            api_version: TARGET_API_VERSION.to_string(),
            strict_version: false,
        }
    }
}

/// Identity overrides. Empty values are detected at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Cgroup every spawned container is placed under.
    pub cgroup_parent: String,
    /// Hostname containers may link to.
    pub hostname: String,
}

/// Shutdown configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Grace period given to each owned container on stop.
    pub stop_timeout_secs: u64,
}

impl ShutdownConfig {
    /// Stop grace period as a duration.
    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            stop_timeout_secs: 10,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// A socket address in Docker host syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Unix domain socket path.
    Unix(PathBuf),
    /// TCP `host:port`.
    Tcp(String),
}

impl Endpoint {
    /// Parses `unix:///path`, `tcp://host:port` or a bare absolute path.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for any other scheme or a TCP address
    /// without a port.
    pub fn parse(value: &str) -> Result<Self> {
        if value.starts_with('/') {
            return Ok(Self::Unix(PathBuf::from(value)));
        }
        let url =
            Url::parse(value).map_err(|e| CoreError::config(format!("invalid address {value}: {e}")))?;
        match url.scheme() {
            "unix" => {
                if url.path().is_empty() {
                    return Err(CoreError::config(format!("missing socket path in {value}")));
                }
                Ok(Self::Unix(PathBuf::from(url.path())))
            }
            "tcp" | "http" => {
                let host = url
                    .host_str()
                    .ok_or_else(|| CoreError::config(format!("missing host in {value}")))?;
                let port = url
                    .port()
                    .ok_or_else(|| CoreError::config(format!("missing port in {value}")))?;
                Ok(Self::Tcp(format!("{host}:{port}")))
            }
            other => Err(CoreError::config(format!(
                "unsupported scheme {other} in {value}"
            ))),
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}

fn system_config_path() -> PathBuf {
    PathBuf::from("/etc/warden/config.toml")
}

fn user_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("warden")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.listen, "tcp://0.0.0.0:2375");
        assert_eq!(config.engine.host, "unix:///var/run/docker.sock");
        assert_eq!(config.engine.api_version, TARGET_API_VERSION);
        assert!(!config.engine.strict_version);
        assert_eq!(config.shutdown.stop_timeout(), Duration::from_secs(10));
        assert!(config.identity.cgroup_parent.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
listen = "unix:///run/warden.sock"

[engine]
strict_version = true

[shutdown]
stop_timeout_secs = 3
"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.server.listen, "unix:///run/warden.sock");
        assert!(config.engine.strict_version);
        // Untouched keys keep their defaults.
        assert_eq!(config.engine.host, "unix:///var/run/docker.sock");
        assert_eq!(config.shutdown.stop_timeout_secs, 3);
    }

    #[test]
    fn test_endpoint_parse() {
        assert_eq!(
            Endpoint::parse("unix:///var/run/docker.sock").unwrap(),
            Endpoint::Unix(PathBuf::from("/var/run/docker.sock"))
        );
        assert_eq!(
            Endpoint::parse("tcp://127.0.0.1:2375").unwrap(),
            Endpoint::Tcp("127.0.0.1:2375".to_string())
        );
        assert_eq!(
            Endpoint::parse("/run/warden.sock").unwrap(),
            Endpoint::Unix(PathBuf::from("/run/warden.sock"))
        );
        assert!(Endpoint::parse("tcp://127.0.0.1").is_err());
        assert!(Endpoint::parse("ssh://host").is_err());
    }
}
