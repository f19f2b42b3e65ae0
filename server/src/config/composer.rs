//! Layered configuration composition.
//!
//! Layers, lowest precedence first: built-in defaults, the default logging file, the system
//! logging file, `MEDIAHOST_*` environment variables, command-line overrides. A run that does
//! not host the web client always redirects `/` to the API documentation.

use alloc::collections::BTreeMap;
use std::{io, path::PathBuf};

use figment::{
    Figment,
    providers::{Format as _, Serialized, Toml},
    value::Value,
};
use serde_json::Value as JsonValue;
use thiserror::Error as ThisError;

use super::Settings;
use crate::{cli::StartupOptions, env::EnvSnapshot, paths::ApplicationPaths};

/// Redirect target used when the web client is not hosted.
pub const SWAGGER_REDIRECT_PATH: &str = "api-docs/swagger";

#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("Required logging configuration {path:?} is missing")]
    Missing { path: PathBuf },
    #[error("Failed to write the default logging configuration to {path:?}: {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(#[source] Box<figment::Error>),
    #[error("Failed to flatten configuration: {0}")]
    Flatten(#[from] serde_json::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Invalid(Box::new(err))
    }
}

/// The final, read-only configuration of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfiguration {
    settings: Settings,
    flattened: BTreeMap<String, String>,
}

impl ResolvedConfiguration {
    /// Wrap typed settings, deriving the flattened view.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings cannot be represented as JSON.
    pub fn from_settings(settings: Settings) -> Result<Self, ConfigError> {
        let mut flattened = BTreeMap::new();
        flatten_into(&mut flattened, None, serde_json::to_value(&settings)?);
        Ok(Self {
            settings,
            flattened,
        })
    }

    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Look up a dotted key such as `server.host_web_client`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.flattened.get(key).map(String::as_str)
    }

    #[must_use]
    pub const fn entries(&self) -> &BTreeMap<String, String> {
        &self.flattened
    }

    /// The flattened view as JSON. Identical configurations produce identical bytes.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.flattened).unwrap_or_default()
    }

    #[must_use]
    pub const fn host_web_client(&self) -> bool {
        self.settings.server.host_web_client
    }
}

fn flatten_into(out: &mut BTreeMap<String, String>, prefix: Option<&str>, value: JsonValue) {
    let join = |key: &str| prefix.map_or_else(|| key.to_owned(), |p| format!("{p}.{key}"));
    match value {
        JsonValue::Object(map) => {
            for (key, nested) in map {
                flatten_into(out, Some(&join(&key)), nested);
            }
        }
        JsonValue::Null => {}
        JsonValue::String(text) => {
            if let Some(key) = prefix {
                out.insert(key.to_owned(), text);
            }
        }
        other => {
            if let Some(key) = prefix {
                out.insert(key.to_owned(), other.to_string());
            }
        }
    }
}

/// Command-line options that override configuration keys, as figment tuple providers.
fn cli_overrides(options: &StartupOptions) -> Vec<(&'static str, Value)> {
    let mut overrides = Vec::new();
    if options.nowebclient {
        overrides.push(("server.host_web_client", Value::from(false)));
    }
    if let Some(bind) = &options.bind {
        overrides.push(("server.bind_address", Value::from(bind.clone())));
    }
    if let Some(port) = options.port {
        overrides.push(("server.port", Value::from(port)));
    }
    if let Some(socket) = &options.socket {
        overrides.push((
            "server.unix_socket_path",
            Value::from(socket.to_string_lossy().into_owned()),
        ));
        overrides.push(("server.bind_to_unix_socket", Value::from(true)));
    }
    if let Some(mode) = &options.socket_permissions {
        overrides.push(("server.unix_socket_permissions", Value::from(mode.clone())));
    }
    if let Some(url) = &options.published_server_url {
        overrides.push(("server.published_url", Value::from(url.clone())));
    }
    if let Some(filter) = &options.log_filter {
        overrides.push(("logging.filter", Value::from(filter.clone())));
    }
    if let Some(format) = options.log_format {
        let name = match format {
            super::LogFormat::Compact => "compact",
            super::LogFormat::Json => "json",
            super::LogFormat::Pretty => "pretty",
        };
        overrides.push(("logging.format", Value::from(name)));
    }
    overrides
}

/// Build the layered figment without the web client redirect rule.
fn layered(options: &StartupOptions, paths: &ApplicationPaths, env: &EnvSnapshot) -> Figment {
    let mut figment = Figment::new()
        .merge(Serialized::defaults(Settings::default()))
        .merge(Toml::file(paths.default_logging_config()))
        .merge(Toml::file(paths.system_logging_config()));

    for (key, raw) in env.config_entries() {
        // Same value parsing as figment's own environment provider.
        let Ok(value) = raw.parse::<Value>();
        figment = figment.merge((key, value));
    }

    for (key, value) in cli_overrides(options) {
        figment = figment.merge((key, value));
    }
    figment
}

/// Compose the configuration of one run.
///
/// # Errors
///
/// Returns [`ConfigError::Missing`] if the default logging file does not exist, and
/// [`ConfigError::Invalid`] if a layer cannot be parsed or a value has the wrong type.
#[tracing::instrument(skip_all)]
pub fn compose(
    options: &StartupOptions,
    paths: &ApplicationPaths,
    env: &EnvSnapshot,
) -> Result<ResolvedConfiguration, ConfigError> {
    let default_logging = paths.default_logging_config();
    if !default_logging.is_file() {
        return Err(ConfigError::Missing {
            path: default_logging,
        });
    }

    let mut figment = layered(options, paths, env);
    let host_web_client: bool = figment.extract_inner("server.host_web_client")?;
    if !host_web_client {
        figment = figment.merge(("server.default_redirect_path", SWAGGER_REDIRECT_PATH));
    }

    let settings: Settings = figment.extract()?;
    ResolvedConfiguration::from_settings(settings)
}
