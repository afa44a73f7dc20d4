use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_BACKEND: &str = "ws://127.0.0.1:4000/terminal";
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;
pub const DEFAULT_MAX_CONNECTIONS: usize = 256;

/// Relay settings as they appear in an optional TOML file.
///
/// Every key is optional; command-line flags and environment variables
/// take precedence over the file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub bind: Option<SocketAddr>,
    pub backend: Option<String>,
    pub password: Option<String>,
    pub reconnect_delay_ms: Option<u64>,
    pub max_connections: Option<usize>,
    pub allowed_origins: Option<Vec<String>>,
}

impl FileConfig {
    /// Load a TOML config file. The file must exist.
    ///
    /// Warns if the file is world-readable, since it may hold the password.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        check_config_permissions(path);
        toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }
}

/// Values supplied on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub bind: Option<SocketAddr>,
    pub backend: Option<String>,
    pub password: Option<String>,
    pub reconnect_delay_ms: Option<u64>,
    pub max_connections: Option<usize>,
    pub allowed_origins: Vec<String>,
}

/// Fully resolved relay configuration, read once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    pub bind: SocketAddr,
    /// Normalized `ws://` or `wss://` URL of the terminal backend.
    pub backend_url: String,
    pub password: String,
    pub reconnect_delay: Duration,
    pub max_connections: usize,
    pub allowed_origins: Vec<String>,
}

impl RelayConfig {
    /// Merge file values under overrides, apply defaults and validate.
    pub fn resolve(
        file: Option<FileConfig>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let file = file.unwrap_or_default();

        let bind = match overrides.bind.or(file.bind) {
            Some(bind) => bind,
            None => DEFAULT_BIND
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("bad default bind {DEFAULT_BIND}")))?,
        };

        let backend = overrides
            .backend
            .or(file.backend)
            .unwrap_or_else(|| DEFAULT_BACKEND.to_string());
        let backend_url = normalize_backend_url(&backend)?;

        let password = overrides
            .password
            .or(file.password)
            .ok_or(ConfigError::MissingPassword)?;
        if password.is_empty() {
            return Err(ConfigError::MissingPassword);
        }

        let reconnect_delay_ms = overrides
            .reconnect_delay_ms
            .or(file.reconnect_delay_ms)
            .unwrap_or(DEFAULT_RECONNECT_DELAY_MS);
        if reconnect_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "reconnect_delay_ms must be greater than zero".into(),
            ));
        }

        let max_connections = overrides
            .max_connections
            .or(file.max_connections)
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);
        if max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be greater than zero".into(),
            ));
        }

        let allowed_origins = if overrides.allowed_origins.is_empty() {
            file.allowed_origins.unwrap_or_default()
        } else {
            overrides.allowed_origins
        };

        Ok(Self {
            bind,
            backend_url,
            password,
            reconnect_delay: Duration::from_millis(reconnect_delay_ms),
            max_connections,
            allowed_origins,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {}", .0.display(), .1)]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse config {}: {}", .0.display(), .1)]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("no password configured (set --password or TTYRELAY_PASSWORD)")]
    MissingPassword,
    #[error("invalid backend address '{0}': {1}")]
    InvalidBackend(String, String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Turn a backend address into a WebSocket URL.
///
/// - `host:port` becomes `ws://host:port/`
/// - `http://` and `https://` map to `ws://` and `wss://`
/// - `ws://` and `wss://` pass through
/// - a missing path becomes `/`
pub fn normalize_backend_url(address: &str) -> Result<String, ConfigError> {
    let invalid = |detail: &str| ConfigError::InvalidBackend(address.to_string(), detail.into());

    let address = address.trim();
    if address.is_empty() {
        return Err(invalid("address must not be empty"));
    }

    let (scheme, rest) = match address.split_once("://") {
        Some(("ws", rest)) | Some(("http", rest)) => ("ws", rest),
        Some(("wss", rest)) | Some(("https", rest)) => ("wss", rest),
        Some((other, _)) => return Err(invalid(&format!("unsupported scheme '{other}'"))),
        None => ("ws", address),
    };

    let authority = rest.split('/').next().unwrap_or_default();
    if authority.is_empty() {
        return Err(invalid("address has no host"));
    }

    if rest.len() == authority.len() {
        Ok(format!("{scheme}://{rest}/"))
    } else {
        Ok(format!("{scheme}://{rest}"))
    }
}

/// Check file permissions on a config file and warn if world-readable.
#[cfg(unix)]
pub fn check_config_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return,
    };

    let mode = metadata.permissions().mode();
    if is_world_readable(mode) {
        tracing::warn!(
            "Relay config file {} is world-readable (mode {:o}). \
             It may contain the shared password -- consider restricting permissions to 600.",
            path.display(),
            mode & 0o7777,
        );
    }
}

#[cfg(not(unix))]
pub fn check_config_permissions(_path: &Path) {}

#[cfg(unix)]
pub fn is_world_readable(mode: u32) -> bool {
    mode & 0o004 != 0
}
