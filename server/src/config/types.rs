//! Configuration data types.
//!
//! Every field has a built-in default, so an empty set of layers still yields a complete
//! [`Settings`] value.

use std::{io, path::PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// Root of the typed configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub storage: StorageSettings,
}

/// HTTP listener and hosting configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Name reported by the public system info endpoint.
    pub server_name: String,
    /// Serve the web client from the web content directory.
    pub host_web_client: bool,
    /// Where `/` redirects to.
    pub default_redirect_path: String,
    /// Bind address for the TCP listener.
    pub bind_address: String,
    /// TCP port for the listener. `0` picks a free port.
    pub port: u16,
    /// Listen on a Unix socket instead of TCP.
    pub bind_to_unix_socket: bool,
    /// Socket path; defaults to `<data>/mediahost.sock`.
    pub unix_socket_path: Option<PathBuf>,
    /// Octal permissions applied to the socket after binding, e.g. `"660"`.
    pub unix_socket_permissions: Option<String>,
    /// URL under which clients reach the server.
    pub published_url: Option<String>,
    /// Upper bound for draining connections on shutdown.
    pub shutdown_timeout_secs: u64,
    /// Expose `POST /system/restart` and `POST /system/shutdown`.
    pub enable_control_endpoints: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            server_name: "mediahost".to_owned(),
            host_web_client: true,
            default_redirect_path: "web/".to_owned(),
            bind_address: "0.0.0.0".to_owned(),
            port: 8096,
            bind_to_unix_socket: false,
            unix_socket_path: None,
            unix_socket_permissions: None,
            published_url: None,
            shutdown_timeout_secs: 10,
            enable_control_endpoints: false,
        }
    }
}

impl ServerSettings {
    /// Parse [`Self::unix_socket_permissions`] as an octal mode; `None` when unset.
    ///
    /// # Errors
    ///
    /// Returns [`SocketModeError::InvalidMode`] if the value is not an octal mode.
    pub fn socket_mode(&self) -> Result<Option<u32>, SocketModeError> {
        let Some(raw) = self.unix_socket_permissions.as_deref() else {
            return Ok(None);
        };
        let raw = raw.trim();
        let digits = raw.strip_prefix("0o").unwrap_or(raw);
        u32::from_str_radix(digits, 8)
            .ok()
            .filter(|mode| *mode <= 0o7777)
            .map(Some)
            .ok_or_else(|| SocketModeError::InvalidMode(raw.to_owned()))
    }
}

#[derive(Debug, ThisError)]
pub enum SocketModeError {
    #[error("{0:?} is not an octal file mode; fix server.unix_socket_permissions (--socket-permissions)")]
    InvalidMode(String),
    #[error("Failed to set mode {mode:o} on {path:?}: {source}")]
    Apply {
        path: PathBuf,
        mode: u32,
        #[source]
        source: io::Error,
    },
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
    Pretty,
}

/// Logging configuration section, normally supplied by the logging files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `tracing` filter directive, e.g. `info,sqlx=warn`.
    pub filter: String,
    pub format: LogFormat,
    /// Also write plain-text logs to `<log>/mediahost.log`.
    pub write_file: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
            format: LogFormat::default(),
            write_file: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageEngine {
    #[default]
    Sqlite,
    /// Nothing is persisted; used for demos and tests.
    Memory,
}

/// Persistent storage configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub engine: StorageEngine,
    /// Database file name inside the data directory.
    pub file_name: String,
    /// Run the engine's optimize step during maintenance.
    pub optimize_on_shutdown: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            engine: StorageEngine::default(),
            file_name: "mediahost.db".to_owned(),
            optimize_on_shutdown: true,
        }
    }
}
