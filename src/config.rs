//! Deployment configuration.
//!
//! Sites are configured in `~/.config/owh/config.toml`:
//!
//! ```toml
//! [retry]
//! max_attempts = 5
//! interval_ms = 1000
//! connect_timeout_secs = 10
//!
//! [[sites]]
//! name = "blog"
//! host = "ssh.cluster0.hosting.example"
//! user = "blog"
//! source = "public"
//! destination = "www"
//! ```
//!
//! Passwords may live in the file, but `OWH_SSH_PASSWORD` (and `OWH_SSH_USER`)
//! take precedence so CI jobs never have to write credentials to disk.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::remote::{ConnectionParams, RetryPolicy};

/// Overrides the SSH user of every site.
pub const ENV_SSH_USER: &str = "OWH_SSH_USER";
/// Overrides the SSH password of every site.
pub const ENV_SSH_PASSWORD: &str = "OWH_SSH_PASSWORD";

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("site {0:?} is defined more than once")]
    DuplicateSite(String),

    #[error("site {site:?} has no {field}")]
    MissingField { site: String, field: &'static str },

    #[error("no site named {0:?} in configuration")]
    UnknownSite(String),

    #[error("retry.max_attempts must be at least 1")]
    ZeroAttempts,
}

/// `[retry]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub interval_ms: u64,
    pub connect_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            interval_ms: policy.interval.as_millis() as u64,
            connect_timeout_secs: policy.connect_timeout.as_secs(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.max_attempts)
            .with_interval(Duration::from_millis(self.interval_ms))
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
    }
}

fn default_port() -> u16 {
    22
}

fn default_source() -> String {
    ".".to_string()
}

/// One `[[sites]]` entry: where to connect and what to mirror where.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default = "default_source")]
    pub source: String,
    pub destination: String,
}

impl fmt::Debug for SiteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteConfig")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("source", &self.source)
            .field("destination", &self.destination)
            .finish()
    }
}

impl SiteConfig {
    pub fn params(&self) -> ConnectionParams {
        ConnectionParams::new(&self.host, self.port, &self.user, &self.password)
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub retry: RetryConfig,
    pub sites: Vec<SiteConfig>,
}

impl Config {
    /// `$XDG_CONFIG_HOME/owh/config.toml` or the platform equivalent.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("owh").join("config.toml"))
    }

    /// Load and validate a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    /// Parse and validate TOML text. `origin` is only used in messages.
    pub fn parse(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }

        let mut seen = HashSet::new();
        for site in &self.sites {
            if !seen.insert(site.name.as_str()) {
                return Err(ConfigError::DuplicateSite(site.name.clone()));
            }
            if site.host.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    site: site.name.clone(),
                    field: "host",
                });
            }
            if site.destination.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    site: site.name.clone(),
                    field: "destination",
                });
            }
        }
        Ok(())
    }

    /// Apply `OWH_SSH_USER` / `OWH_SSH_PASSWORD` to every site.
    ///
    /// `lookup` is `std::env::var(..).ok()` in the binary.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let user = lookup(ENV_SSH_USER).filter(|v| !v.is_empty());
        let password = lookup(ENV_SSH_PASSWORD).filter(|v| !v.is_empty());

        for site in &mut self.sites {
            if let Some(user) = &user {
                site.user = user.clone();
            }
            if let Some(password) = &password {
                site.password = password.clone();
            }
        }
    }

    pub fn site(&self, name: &str) -> Result<&SiteConfig, ConfigError> {
        self.sites
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ConfigError::UnknownSite(name.to_string()))
    }
}
