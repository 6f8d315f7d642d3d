//! Configuration loading
//!
//! Resolution order (highest priority first):
//! 1. Command-line flags / environment variables (applied by the binary)
//! 2. TOML config file (`--config`, else `<config_dir>/studylink/config.toml`)
//! 3. Compiled defaults

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{Error, Result};

/// Default HTTP port of the coordination server
pub const DEFAULT_PORT: u16 = 8001;

/// Server configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    /// Namespace for participant identifiers; random per process if unset
    pub uuid_namespace: Option<Uuid>,
    /// Participant-facing static files
    pub public_dir: PathBuf,
    /// Lab-only static files, served behind the access gate
    pub private_dir: PathBuf,
    /// Redirect plain-http requests (as reported by a proxy) to https
    pub force_https: bool,
    pub auth: AuthConfig,
    pub store: StoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            uuid_namespace: None,
            public_dir: PathBuf::from("public"),
            private_dir: PathBuf::from("private"),
            force_https: false,
            auth: AuthConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

/// Shared credential for the `/private` area
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl AuthConfig {
    /// Both halves of the credential, if configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }
}

/// Where participant snapshots are written
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
    /// One `<id>.json` file per participant in a directory
    Directory { path: PathBuf },
    /// `PUT <url>/<id>.json` on a remote file store
    Http {
        url: String,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
    },
    /// `scp` of `<path>/<id>.json` to a remote host, password authentication
    Scp {
        host: String,
        #[serde(default = "default_ssh_port")]
        port: u16,
        username: String,
        password: String,
        /// Remote directory
        path: String,
    },
    /// Keep snapshots in memory only
    Memory,
}

fn default_ssh_port() -> u16 {
    22
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Directory {
            path: PathBuf::from("data"),
        }
    }
}

impl Config {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file that must exist
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load configuration
    ///
    /// An explicit path must exist. Without one, the per-user config file is
    /// used when present, otherwise compiled defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            info!("Loading config from {}", path.display());
            return Self::load_file(path);
        }

        match default_config_path() {
            Some(path) if path.exists() => {
                info!("Loading config from {}", path.display());
                Self::load_file(&path)
            }
            _ => {
                warn!("No config file found, using compiled defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.bind_addr.trim().is_empty() {
            return Err(Error::Config("bind_addr must not be empty".to_string()));
        }

        match (&self.auth.username, &self.auth.password) {
            (Some(_), None) | (None, Some(_)) => {
                return Err(Error::Config(
                    "auth.username and auth.password must be set together".to_string(),
                ));
            }
            _ => {}
        }

        match &self.store {
            StoreConfig::Http { url, .. } => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(Error::Config(format!(
                        "store.url must be an http(s) URL, got '{}'",
                        url
                    )));
                }
            }
            StoreConfig::Scp {
                host,
                username,
                path,
                ..
            } => {
                if host.trim().is_empty() || username.trim().is_empty() {
                    return Err(Error::Config(
                        "store.host and store.username must not be empty".to_string(),
                    ));
                }
                if path.trim().is_empty() {
                    return Err(Error::Config("store.path must not be empty".to_string()));
                }
            }
            _ => {}
        }

        Ok(())
    }
}

/// Per-user config file location for the platform
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("studylink").join("config.toml"))
}
