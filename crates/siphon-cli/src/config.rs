//! Server configuration: TOML file, then environment overrides

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Fatal startup conditions
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("unknown hosting mode '{0}' (expected 'self' or 'metered')")]
    UnknownMode(String),
    #[error("invalid port '{0}'")]
    InvalidPort(String),
    #[error("MCP_SERVER_TOKEN must be set in self-hosted mode")]
    MissingServerToken,
    #[error("BILLING_API_URL must be set in metered mode")]
    MissingBillingUrl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum HostingMode {
    /// Single shared bearer token
    #[default]
    #[serde(rename = "self")]
    SelfHosted,
    /// Per-caller credentials, every message charged
    #[serde(rename = "metered", alias = "maximo")]
    Metered,
}

impl FromStr for HostingMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "self" => Ok(Self::SelfHosted),
            "metered" | "maximo" => Ok(Self::Metered),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for HostingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelfHosted => f.write_str("self"),
            Self::Metered => f.write_str("metered"),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub hosting_mode: HostingMode,
    /// Shared secret for self-hosted stream auth
    #[serde(default)]
    pub server_token: Option<String>,
    #[serde(default)]
    pub billing_url: Option<String>,
    /// Unlocker API token used by the scraping tools
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_zone")]
    pub unlocker_zone: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_endpoint_delay_ms")]
    pub endpoint_delay_ms: u64,
}

fn default_zone() -> String {
    "mcp_unlocker".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    9000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_heartbeat_secs() -> u64 {
    25
}
fn default_endpoint_delay_ms() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hosting_mode: HostingMode::default(),
            server_token: None,
            billing_url: None,
            api_token: None,
            unlocker_zone: default_zone(),
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            heartbeat_secs: default_heartbeat_secs(),
            endpoint_delay_ms: default_endpoint_delay_ms(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("Config")
            .field("hosting_mode", &self.hosting_mode)
            .field("server_token", &redact(&self.server_token))
            .field("billing_url", &self.billing_url)
            .field("api_token", &redact(&self.api_token))
            .field("unlocker_zone", &self.unlocker_zone)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("log_level", &self.log_level)
            .finish_non_exhaustive()
    }
}

/// `~/.siphon/config.toml`
pub fn default_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".siphon").join("config.toml"))
}

impl Config {
    /// Load from `path`, else from the default location when it exists,
    /// else start from defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => match default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path),
                None => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply environment overrides. `lookup` is `std::env::var` in the
    /// binary; empty values count as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(mode) = get("HOSTING_MODE") {
            self.hosting_mode = mode.parse()?;
        }
        if let Some(token) = get("MCP_SERVER_TOKEN") {
            self.server_token = Some(token);
        }
        if let Some(url) = get("BILLING_API_URL").or_else(|| get("MAXIMO_API_URL")) {
            self.billing_url = Some(url);
        }
        if let Some(token) = get("API_TOKEN") {
            self.api_token = Some(token);
        }
        if let Some(zone) = get("WEB_UNLOCKER_ZONE") {
            self.unlocker_zone = zone;
        }
        if let Some(host) = get("HOST") {
            self.host = host;
        }
        if let Some(port) = get("PORT") {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPort(port.clone()))?;
        }
        if let Some(level) = get("LOG_LEVEL") {
            self.log_level = level;
        }
        Ok(())
    }

    /// Refuse to start when the selected mode lacks what it needs
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.hosting_mode {
            HostingMode::SelfHosted if self.server_token.is_none() => {
                Err(ConfigError::MissingServerToken)
            }
            HostingMode::Metered if self.billing_url.is_none() => {
                Err(ConfigError::MissingBillingUrl)
            }
            _ => Ok(()),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn endpoint_delay(&self) -> Duration {
        Duration::from_millis(self.endpoint_delay_ms)
    }
}
