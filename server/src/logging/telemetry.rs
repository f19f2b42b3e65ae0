//! Tracing subscriber setup.
//!
//! The global subscriber can only be installed once per process, but a restart composes a
//! fresh configuration. The first run installs the subscriber; later runs and the logging
//! file watcher only swap the filter through a reload handle. Format and log file are fixed
//! by the first run.

use std::{
    fs::{File, OpenOptions},
    io,
    panic,
    path::{Path, PathBuf},
    sync::{Mutex, Once, OnceLock},
};

use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, time::ChronoLocal},
    layer::{Layered, SubscriberExt as _},
    reload,
    util::SubscriberInitExt as _,
};

use super::FATAL_TARGET;
use crate::config::{LogFormat, LoggingSettings};

type FilteredRegistry = Layered<reload::Layer<EnvFilter, Registry>, Registry>;

struct Telemetry {
    filter: reload::Handle<EnvFilter, Registry>,
    format: LogFormat,
    log_file: Option<PathBuf>,
    /// False when another subscriber already owned the global dispatcher.
    installed: bool,
}

static TELEMETRY: OnceLock<Telemetry> = OnceLock::new();
static PANIC_HOOK: Once = Once::new();

/// What [`init`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// Installed the global subscriber.
    Installed,
    /// A subscriber from an earlier run exists; its filter was replaced.
    Reloaded,
    /// Another subscriber owns the global dispatcher; events go there.
    External,
}

/// Build the filter: `RUST_LOG` when set and valid, else the configured directive, else `info`.
#[must_use]
pub fn build_filter(settings: &LoggingSettings, rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .or_else(|| EnvFilter::try_new(&settings.filter).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn open_log_file(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn install(settings: &LoggingSettings, rust_log: Option<&str>, log_file: Option<&Path>) -> Telemetry {
    let (filter_layer, filter) = reload::Layer::new(build_filter(settings, rust_log));

    let stderr_layer: Box<dyn Layer<FilteredRegistry> + Send + Sync> = match settings.format {
        LogFormat::Compact => fmt::layer()
            .with_writer(io::stderr)
            .with_timer(ChronoLocal::rfc_3339())
            .compact()
            .boxed(),
        LogFormat::Json => fmt::layer()
            .with_writer(io::stderr)
            .with_timer(ChronoLocal::rfc_3339())
            .json()
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_writer(io::stderr)
            .with_timer(ChronoLocal::rfc_3339())
            .pretty()
            .boxed(),
    };

    let (file_layer, file_error) = match log_file.map(open_log_file).transpose() {
        Ok(file) => (
            file.map(|file| {
                fmt::layer()
                    .with_ansi(false)
                    .with_timer(ChronoLocal::rfc_3339())
                    .with_writer(Mutex::new(file))
            }),
            None,
        ),
        Err(err) => (None, Some(err)),
    };

    let installed = tracing_subscriber::registry()
        .with(filter_layer)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .is_ok();

    if let Some(err) = file_error {
        warn!(?log_file, %err, "Failed to open log file, logging to stderr only");
    }

    Telemetry {
        filter,
        format: settings.format,
        log_file: log_file.map(Path::to_path_buf),
        installed,
    }
}

/// Set up logging for a run.
///
/// `log_file` is only honoured by the first call in a process.
pub fn init(settings: &LoggingSettings, rust_log: Option<&str>, log_file: Option<&Path>) -> InitOutcome {
    let mut first = false;
    let telemetry = TELEMETRY.get_or_init(|| {
        first = true;
        install(settings, rust_log, log_file)
    });

    if !telemetry.installed {
        return InitOutcome::External;
    }
    if first {
        info!(format = ?settings.format, ?log_file, "Logging initialized");
        return InitOutcome::Installed;
    }

    reload_filter(settings, rust_log);
    if telemetry.format != settings.format || telemetry.log_file.as_deref() != log_file {
        info!(
            active_format = ?telemetry.format,
            active_log_file = ?telemetry.log_file,
            "Log format and log file changes take effect after a process restart"
        );
    }
    InitOutcome::Reloaded
}

/// Replace the active filter. Does nothing before [`init`].
pub fn reload_filter(settings: &LoggingSettings, rust_log: Option<&str>) {
    let Some(telemetry) = TELEMETRY.get() else {
        return;
    };
    match telemetry.filter.reload(build_filter(settings, rust_log)) {
        Ok(()) => info!(filter = %settings.filter, "Log filter applied"),
        Err(err) => warn!(%err, "Failed to reload log filter"),
    }
}

/// Whether [`init`] has run in this process.
#[must_use]
pub fn is_initialized() -> bool {
    TELEMETRY.get().is_some()
}

/// Log panics as fatal errors before the previous hook runs.
pub fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            error!(target: FATAL_TARGET, fatal = true, panic = %info, "Unhandled panic");
            previous(info);
        }));
    });
}
