//! Application directory resolution.
//!
//! [`resolve`] is a pure function of the startup options, the environment snapshot and the
//! platform defaults. Creating the directories is a separate step,
//! [`ApplicationPaths::create_writable_dirs`], run by the lifecycle controller.

use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error as ThisError;

use crate::{
    cli::StartupOptions,
    env::{CACHE_DIR_VAR, CONFIG_DIR_VAR, DATA_DIR_VAR, EnvSnapshot, LOG_DIR_VAR, WEB_DIR_VAR},
};

pub const APP_DIR_NAME: &str = "mediahost";
pub const DEFAULT_LOGGING_FILE: &str = "logging.default.toml";
pub const SYSTEM_LOGGING_FILE: &str = "logging.toml";
pub const SYSTEM_CONFIG_FILE: &str = "system.toml";
pub const MIGRATION_LEDGER_FILE: &str = "migrations.json";
pub const LOG_FILE: &str = "mediahost.log";
pub const SOCKET_FILE: &str = "mediahost.sock";

/// Directories used by one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationPaths {
    pub data_dir: PathBuf,
    pub config_dir: PathBuf,
    pub log_dir: PathBuf,
    pub cache_dir: PathBuf,
    /// Web client content. Read-only; never created by the server.
    pub web_dir: PathBuf,
}

#[derive(Debug, ThisError)]
#[error("Failed to create directory {path:?}: {source}")]
pub struct CreateDirError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl ApplicationPaths {
    /// Default logging configuration, materialized from the built-in template.
    #[must_use]
    pub fn default_logging_config(&self) -> PathBuf {
        self.config_dir.join(DEFAULT_LOGGING_FILE)
    }

    /// Optional operator-maintained logging configuration.
    #[must_use]
    pub fn system_logging_config(&self) -> PathBuf {
        self.config_dir.join(SYSTEM_LOGGING_FILE)
    }

    #[must_use]
    pub fn system_config(&self) -> PathBuf {
        self.config_dir.join(SYSTEM_CONFIG_FILE)
    }

    #[must_use]
    pub fn migration_ledger(&self) -> PathBuf {
        self.config_dir.join(MIGRATION_LEDGER_FILE)
    }

    #[must_use]
    pub fn temp_dir(&self) -> PathBuf {
        self.cache_dir.join("temp")
    }

    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.log_dir.join(LOG_FILE)
    }

    #[must_use]
    pub fn default_socket(&self) -> PathBuf {
        self.data_dir.join(SOCKET_FILE)
    }

    #[must_use]
    pub fn database_file(&self, file_name: &str) -> PathBuf {
        self.data_dir.join(file_name)
    }

    /// Directories the server writes to, in creation order.
    #[must_use]
    pub fn writable_dirs(&self) -> [PathBuf; 5] {
        [
            self.data_dir.clone(),
            self.config_dir.clone(),
            self.log_dir.clone(),
            self.cache_dir.clone(),
            self.temp_dir(),
        ]
    }

    /// Create every writable directory. Existing directories are left alone.
    ///
    /// # Errors
    ///
    /// Returns the first directory that could not be created.
    pub fn create_writable_dirs(&self) -> Result<(), CreateDirError> {
        for dir in self.writable_dirs() {
            fs::create_dir_all(&dir).map_err(|source| CreateDirError { path: dir, source })?;
        }
        Ok(())
    }
}

/// Platform locations used when neither an option nor an environment variable names a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathDefaults {
    pub data_home: PathBuf,
    pub config_home: PathBuf,
    pub cache_home: PathBuf,
    /// Directory of the installed executable; the web client ships next to it.
    pub install_dir: PathBuf,
}

impl PathDefaults {
    /// Detect the platform defaults for the current user.
    #[must_use]
    pub fn detect() -> Self {
        let fallback = || PathBuf::from(".");
        Self {
            data_home: dirs::data_local_dir()
                .unwrap_or_else(fallback)
                .join(APP_DIR_NAME),
            config_home: dirs::config_dir()
                .unwrap_or_else(fallback)
                .join(APP_DIR_NAME),
            cache_home: dirs::cache_dir()
                .unwrap_or_else(fallback)
                .join(APP_DIR_NAME),
            install_dir: env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf))
                .unwrap_or_else(fallback),
        }
    }

    /// Defaults rooted in a single directory; handy for tests and portable installs.
    #[must_use]
    pub fn rooted(root: &Path) -> Self {
        Self {
            data_home: root.join("data"),
            config_home: root.join("config"),
            cache_home: root.join("cache"),
            install_dir: root.join("install"),
        }
    }
}

/// Resolve the application directories.
///
/// Each directory comes from its command-line option, then its environment variable, then
/// a default. The data directory anchors two defaults: when it was chosen explicitly the
/// configuration lives in `<data>/config`, otherwise in the platform config home; logs
/// default to `<data>/log` either way.
#[must_use]
pub fn resolve(
    options: &StartupOptions,
    env: &EnvSnapshot,
    defaults: &PathDefaults,
) -> ApplicationPaths {
    let explicit_data = options
        .datadir
        .clone()
        .or_else(|| env.get_path(DATA_DIR_VAR));
    let data_dir_given = explicit_data.is_some();
    let data_dir = explicit_data.unwrap_or_else(|| defaults.data_home.clone());

    let config_dir = options
        .configdir
        .clone()
        .or_else(|| env.get_path(CONFIG_DIR_VAR))
        .unwrap_or_else(|| {
            if data_dir_given {
                data_dir.join("config")
            } else {
                defaults.config_home.clone()
            }
        });

    let log_dir = options
        .logdir
        .clone()
        .or_else(|| env.get_path(LOG_DIR_VAR))
        .unwrap_or_else(|| data_dir.join("log"));

    let cache_dir = options
        .cachedir
        .clone()
        .or_else(|| env.get_path(CACHE_DIR_VAR))
        .unwrap_or_else(|| defaults.cache_home.clone());

    let web_dir = options
        .webdir
        .clone()
        .or_else(|| env.get_path(WEB_DIR_VAR))
        .unwrap_or_else(|| defaults.install_dir.join("web"));

    ApplicationPaths {
        data_dir,
        config_dir,
        log_dir,
        cache_dir,
        web_dir,
    }
}
