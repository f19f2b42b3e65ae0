//! Filesystem migrations recorded in `migrations.json` in the config directory.
//!
//! `system.toml` is kept for reference only: configuration is composed from the logging
//! files and the environment, so whatever remains in it after the `[logging]` table is
//! extracted has no effect.

use core::error::Error;
use std::{
    fs, io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::MigrationError;
use crate::paths::ApplicationPaths;

/// Former location of the system configuration, directly in the data directory.
pub const LEGACY_SYSTEM_CONFIG_FILE: &str = "mediahost.toml";

type StepError = Box<dyn Error + Send + Sync>;
/// A step reports whether it changed anything.
type StepFn = fn(&ApplicationPaths) -> Result<bool, StepError>;

pub(super) struct Step {
    pub id: &'static str,
    apply: StepFn,
}

/// Every step, in application order. Never reorder or remove entries.
pub(super) const PRE_STARTUP_STEPS: [Step; 2] = [
    Step {
        id: "relocate-legacy-system-config",
        apply: relocate_legacy_system_config,
    },
    Step {
        id: "extract-logging-section",
        apply: extract_logging_section,
    },
];

#[derive(Debug, Default, Serialize, Deserialize)]
struct Ledger {
    applied: Vec<AppliedStep>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AppliedStep {
    id: String,
    applied_at: DateTime<Local>,
}

impl Ledger {
    fn load(path: &Path) -> Result<Self, MigrationError> {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).map_err(|source| {
                MigrationError::LedgerFormat {
                    path: path.to_path_buf(),
                    source,
                }
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(MigrationError::LedgerIo {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.applied.iter().any(|step| step.id == id)
    }

    /// A crash never leaves a truncated ledger.
    fn store(&self, path: &Path) -> Result<(), MigrationError> {
        let io_err = |source| MigrationError::LedgerIo {
            path: path.to_path_buf(),
            source,
        };
        let content = serde_json::to_string_pretty(self).map_err(|source| {
            MigrationError::LedgerFormat {
                path: path.to_path_buf(),
                source,
            }
        })?;
        write_replacing(path, &content).map_err(io_err)
    }
}

/// Write `contents` to a sibling temp file, then rename it over `path`.
fn write_replacing(path: &Path, contents: &str) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

/// Apply every step of `steps` not yet recorded in the ledger.
///
/// Each applied step is recorded before the next one starts.
pub(super) fn run(paths: &ApplicationPaths, steps: &[Step]) -> Result<Vec<String>, MigrationError> {
    let ledger_path = paths.migration_ledger();
    let mut ledger = Ledger::load(&ledger_path)?;
    let mut applied = Vec::new();

    for step in steps {
        if ledger.contains(step.id) {
            continue;
        }
        let changed = (step.apply)(paths).map_err(|source| MigrationError::Step {
            id: step.id,
            source,
        })?;
        info!(id = step.id, changed, "Applied pre-startup migration");
        ledger.applied.push(AppliedStep {
            id: step.id.to_owned(),
            applied_at: Local::now(),
        });
        ledger.store(&ledger_path)?;
        applied.push(step.id.to_owned());
    }
    Ok(applied)
}

/// Move a file, falling back to copy and delete across filesystems.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to)?;
    fs::remove_file(from)
}

/// Moves `<data>/mediahost.toml` to `<config>/system.toml` if the new file doesn't exist yet.
fn relocate_legacy_system_config(paths: &ApplicationPaths) -> Result<bool, StepError> {
    let old_location = paths.data_dir.join(LEGACY_SYSTEM_CONFIG_FILE);
    let new_location = paths.system_config();
    if !old_location.is_file() || new_location.exists() {
        return Ok(false);
    }
    fs::create_dir_all(&paths.config_dir)?;
    move_file(&old_location, &new_location)?;
    info!(from = ?old_location, to = ?new_location, "Moved system configuration");
    Ok(true)
}

/// Top-level tables of a system configuration that nothing reads any more.
fn unused_tables(table: &toml::Table) -> Vec<&str> {
    table.keys().map(String::as_str).collect()
}

/// Moves a `[logging]` table out of `system.toml` into `logging.toml`.
///
/// An existing `logging.toml` is kept unless it holds exactly the extracted table, which
/// means an earlier attempt stopped before rewriting `system.toml`.
fn extract_logging_section(paths: &ApplicationPaths) -> Result<bool, StepError> {
    let system_config = paths.system_config();
    let logging_config = paths.system_logging_config();
    if !system_config.is_file() {
        return Ok(false);
    }

    let mut table: toml::Table = fs::read_to_string(&system_config)?.parse()?;
    let Some(logging) = table.remove("logging") else {
        return Ok(false);
    };
    let mut extracted = toml::Table::new();
    extracted.insert("logging".to_owned(), logging);
    let extracted = toml::to_string(&extracted)?;

    match fs::read_to_string(&logging_config) {
        Ok(existing) if existing == extracted => {}
        Ok(_) => return Ok(false),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            write_replacing(&logging_config, &extracted)?;
        }
        Err(err) => return Err(err.into()),
    }
    write_replacing(&system_config, &toml::to_string(&table)?)?;
    info!(from = ?system_config, to = ?logging_config, "Moved logging section");

    let unused = unused_tables(&table);
    if !unused.is_empty() {
        warn!(
            path = ?system_config,
            ?unused,
            "These settings are no longer read; set them in logging.toml or through MEDIAHOST_ variables"
        );
    }
    Ok(true)
}
