//! Layered gateway configuration.
//!
//! A [`Config`] is built exactly once at process start by resolving each
//! field through three layers: environment variables override values
//! from the TOML config file, which override built-in defaults. The
//! recipient map is the one exception: it only exists in the file layer.
//!
//! Resolution is a pure function over captured inputs
//! ([`Config::resolve`]) so that the precedence of every field can be
//! tested without touching the process environment.

use std::path::{Path, PathBuf};

use ahash::AHashMap;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("CONFIG_FILE points to non-existent file: {0}")]
    MissingFile(PathBuf),
}

/// Raw shape of the TOML config file. Every field is optional; absent
/// fields fall through to the environment/default layers.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub pushover: PushoverSection,
    pub rate_limit_per_minute: Option<usize>,
    pub queue_dir: Option<PathBuf>,
    pub max_inflight_pushes: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerSection {
    pub listen_host: Option<String>,
    pub listen_port: Option<u16>,
    pub allow_nonauth: Option<bool>,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
    pub tls_cert_file: Option<PathBuf>,
    pub tls_key_file: Option<PathBuf>,
    pub enable_starttls: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PushoverSection {
    pub api_token: Option<String>,
    pub default_user_key: Option<String>,
    #[serde(default)]
    pub recipient_map: AHashMap<String, String>,
    pub device: Option<String>,
}

/// Environment variables relevant to configuration, captured up front.
///
/// Tests construct this directly instead of mutating the process
/// environment.
#[derive(Debug, Default)]
pub struct EnvOverrides {
    pub smtp_host: Option<String>,
    pub listen_host: Option<String>,
    pub smtp_port: Option<String>,
    pub listen_port: Option<String>,
    pub allow_nonauth: Option<String>,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
    pub tls_cert_file: Option<String>,
    pub tls_key_file: Option<String>,
    pub enable_starttls: Option<String>,
    pub pushover_token: Option<String>,
    pub pushover_user_key: Option<String>,
    pub default_user_key: Option<String>,
    pub pushover_device: Option<String>,
    pub rate_limit_per_minute: Option<String>,
    pub queue_dir: Option<String>,
}

impl EnvOverrides {
    /// Capture the relevant variables from the process environment
    #[must_use]
    pub fn capture() -> Self {
        let var = |name: &str| std::env::var(name).ok();

        Self {
            smtp_host: var("SMTP_HOST"),
            listen_host: var("LISTEN_HOST"),
            smtp_port: var("SMTP_PORT"),
            listen_port: var("LISTEN_PORT"),
            allow_nonauth: var("SMTP_ALLOW_NOAUTH"),
            smtp_user: var("SMTP_USER"),
            smtp_pass: var("SMTP_PASS"),
            tls_cert_file: var("TLS_CERT_FILE"),
            tls_key_file: var("TLS_KEY_FILE"),
            enable_starttls: var("ENABLE_STARTTLS"),
            pushover_token: var("PUSHOVER_TOKEN"),
            pushover_user_key: var("PUSHOVER_USER_KEY"),
            default_user_key: var("DEFAULT_USER_KEY"),
            pushover_device: var("PUSHOVER_DEVICE"),
            rate_limit_per_minute: var("RATE_LIMIT_PER_MINUTE"),
            queue_dir: var("QUEUE_DIR"),
        }
    }
}

/// Fully resolved, read-only gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_host: String,
    pub listen_port: u16,
    pub allow_nonauth: bool,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
    pub tls_cert_file: Option<PathBuf>,
    pub tls_key_file: Option<PathBuf>,
    pub enable_starttls: bool,
    pub pushover_token: String,
    pub default_user_key: String,
    pub recipient_map: AHashMap<String, String>,
    pub pushover_device: Option<String>,
    pub rate_limit_per_minute: usize,
    pub queue_dir: Option<PathBuf>,
    pub max_inflight_pushes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_host: defaults::listen_host(),
            listen_port: defaults::listen_port(),
            allow_nonauth: defaults::allow_nonauth(),
            smtp_user: None,
            smtp_pass: None,
            tls_cert_file: None,
            tls_key_file: None,
            enable_starttls: false,
            pushover_token: String::new(),
            default_user_key: String::new(),
            recipient_map: AHashMap::new(),
            pushover_device: None,
            rate_limit_per_minute: defaults::rate_limit_per_minute(),
            queue_dir: None,
            max_inflight_pushes: defaults::max_inflight_pushes(),
        }
    }
}

impl Config {
    /// Load the configuration from the discovered config file and the
    /// process environment.
    ///
    /// # Errors
    /// If the config file cannot be read or parsed, or an environment
    /// override fails to parse.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match find_config_file()? {
            Some(path) => Some(read_config_file(&path)?),
            None => None,
        };

        Self::resolve(file, EnvOverrides::capture())
    }

    /// Resolve each field through the env > file > default layers.
    ///
    /// # Errors
    /// If a numeric environment override does not parse.
    pub fn resolve(file: Option<FileConfig>, env: EnvOverrides) -> Result<Self, ConfigError> {
        let file = file.unwrap_or_default();

        let listen_port = match env.smtp_port.or(env.listen_port) {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                field: "listen_port",
                reason: format!("not a valid port number: {raw}"),
            })?,
            None => file
                .server
                .listen_port
                .unwrap_or_else(defaults::listen_port),
        };

        let rate_limit_per_minute = match env.rate_limit_per_minute {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                field: "rate_limit_per_minute",
                reason: format!("not a valid count: {raw}"),
            })?,
            None => file
                .rate_limit_per_minute
                .unwrap_or_else(defaults::rate_limit_per_minute),
        };

        Ok(Self {
            listen_host: env
                .smtp_host
                .or(env.listen_host)
                .or(file.server.listen_host)
                .unwrap_or_else(defaults::listen_host),
            listen_port,
            allow_nonauth: env.allow_nonauth.as_deref().map_or_else(
                || {
                    file.server
                        .allow_nonauth
                        .unwrap_or_else(defaults::allow_nonauth)
                },
                truthy,
            ),
            smtp_user: env.smtp_user.or(file.server.smtp_user),
            smtp_pass: env.smtp_pass.or(file.server.smtp_pass),
            tls_cert_file: env
                .tls_cert_file
                .map(PathBuf::from)
                .or(file.server.tls_cert_file),
            tls_key_file: env
                .tls_key_file
                .map(PathBuf::from)
                .or(file.server.tls_key_file),
            enable_starttls: env
                .enable_starttls
                .as_deref()
                .map_or_else(|| file.server.enable_starttls.unwrap_or(false), truthy),
            pushover_token: env
                .pushover_token
                .or(file.pushover.api_token)
                .unwrap_or_default(),
            default_user_key: env
                .pushover_user_key
                .or(env.default_user_key)
                .or(file.pushover.default_user_key)
                .unwrap_or_default(),
            // The map has no environment layer; it exists only in the file.
            recipient_map: file.pushover.recipient_map,
            pushover_device: env.pushover_device.or(file.pushover.device),
            rate_limit_per_minute,
            queue_dir: env.queue_dir.map(PathBuf::from).or(file.queue_dir),
            max_inflight_pushes: file
                .max_inflight_pushes
                .unwrap_or_else(defaults::max_inflight_pushes),
        })
    }

    /// Cross-field validation, run once at startup so misconfiguration
    /// fails fast instead of surfacing per message.
    ///
    /// # Errors
    /// If STARTTLS is enabled without certificate material, or
    /// authentication is required without credentials.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enable_starttls && (self.tls_cert_file.is_none() || self.tls_key_file.is_none()) {
            return Err(ConfigError::Invalid {
                field: "enable_starttls",
                reason: "requires tls_cert_file and tls_key_file".to_string(),
            });
        }

        if !self.allow_nonauth && (self.smtp_user.is_none() || self.smtp_pass.is_none()) {
            return Err(ConfigError::Invalid {
                field: "allow_nonauth",
                reason: "authentication required but smtp_user/smtp_pass not set".to_string(),
            });
        }

        Ok(())
    }
}

/// The original accepted only the literal string "true" (any case) as
/// true; everything else, including "1", is false.
fn truthy(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}

fn read_config_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Find the configuration file using the following precedence:
/// 1. `CONFIG_FILE` environment variable (an error if it does not exist)
/// 2. ./pushgate.toml (current working directory)
/// 3. /etc/pushgate/pushgate.toml (system-wide config)
///
/// Returns `None` when no file exists anywhere; the gateway then runs
/// on environment variables and defaults alone.
///
/// # Errors
/// If `CONFIG_FILE` names a non-existent path.
pub fn find_config_file() -> Result<Option<PathBuf>, ConfigError> {
    if let Ok(env_path) = std::env::var("CONFIG_FILE") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(ConfigError::MissingFile(path));
    }

    let default_paths = [
        PathBuf::from("./pushgate.toml"),
        PathBuf::from("/etc/pushgate/pushgate.toml"),
    ];

    Ok(default_paths.into_iter().find(|path| path.exists()))
}

mod defaults {
    pub fn listen_host() -> String {
        "127.0.0.1".to_string()
    }

    pub const fn listen_port() -> u16 {
        2525
    }

    pub const fn allow_nonauth() -> bool {
        true
    }

    pub const fn rate_limit_per_minute() -> usize {
        120
    }

    pub const fn max_inflight_pushes() -> usize {
        8
    }
}
