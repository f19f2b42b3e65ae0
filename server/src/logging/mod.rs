//! Logging bootstrap: the default logging configuration file, subscriber setup, and the
//! single sink for fatal errors.

pub mod telemetry;

use core::error::Error;
use std::{
    fs,
    io::{self, ErrorKind, Write as _},
};

use tracing::{error, info};

use crate::{config::ConfigError, paths::ApplicationPaths};

/// Built-in contents of `logging.default.toml`.
pub const DEFAULT_LOGGING_TEMPLATE: &str = include_str!("../../resources/logging.default.toml");

/// Target of every fatal error event.
pub const FATAL_TARGET: &str = "mediahost::fatal";

/// Write the default logging configuration from the template if it does not exist yet.
///
/// Returns whether the file was created. An existing file is never touched, so operators
/// can inspect it, but local changes belong in the system logging file.
///
/// # Errors
///
/// Returns [`ConfigError::Template`] if the file is missing and cannot be written.
pub fn materialize_default_config(paths: &ApplicationPaths) -> Result<bool, ConfigError> {
    let path = paths.default_logging_config();
    if path.is_file() {
        return Ok(false);
    }
    let write = || -> io::Result<()> {
        fs::create_dir_all(&paths.config_dir)?;
        // create_new so a concurrently started instance keeps the copy written first
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => file.write_all(DEFAULT_LOGGING_TEMPLATE.as_bytes()),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(err) => Err(err),
        }
    };
    write().map_err(|source| ConfigError::Template {
        path: path.clone(),
        source,
    })?;
    info!(?path, "Wrote default logging configuration");
    Ok(true)
}

/// Report an error that ends the run.
///
/// Before the subscriber is installed the message goes to stderr, afterwards it is logged
/// on [`FATAL_TARGET`]. No backtrace is printed either way.
pub fn report_fatal(err: &(dyn Error + 'static), exit_code: u8) {
    if !telemetry::is_initialized() {
        eprintln!("mediahost: fatal: {err}");
        return;
    }
    let mut causes = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        causes.push(cause.to_string());
        source = cause.source();
    }
    error!(
        target: FATAL_TARGET,
        fatal = true,
        exit_code,
        error = %err,
        ?causes,
        "Fatal error, the run cannot continue"
    );
}
