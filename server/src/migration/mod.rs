//! Migrations, in two named phases.
//!
//! Pre-startup migrations move files around before anything opens them. Post-startup
//! migrations run against the constructed service graph, before the listener starts.
//! Both are forward-only, idempotent, and fatal to the run on failure.

mod database;
mod pre_startup;

use core::error::Error;
use std::{io, path::PathBuf};

use thiserror::Error as ThisError;
use tracing::{debug, info};

use crate::{config::ResolvedConfiguration, paths::ApplicationPaths, services::ServiceGraph};

pub use pre_startup::LEGACY_SYSTEM_CONFIG_FILE;
use pre_startup::PRE_STARTUP_STEPS;

#[derive(Debug, ThisError)]
pub enum MigrationError {
    #[error("Failed to access migration ledger {path:?}: {source}")]
    LedgerIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Migration ledger {path:?} is corrupt: {source}")]
    LedgerFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Migration step {id} failed: {source}")]
    Step {
        id: &'static str,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    #[error("Database migration failed: {0}")]
    Database(#[from] sqlx::migrate::MigrateError),
}

/// Runs migrations at the two points of a run where they are allowed.
pub trait MigrationRunner: Send + Sync {
    /// Filesystem migrations, after preflight and before service construction.
    ///
    /// Returns the ids of the steps applied by this call.
    ///
    /// # Errors
    ///
    /// Returns the first failing step; later steps are not attempted.
    fn run_pre_startup(
        &self,
        paths: &ApplicationPaths,
        config: &ResolvedConfiguration,
    ) -> Result<Vec<String>, MigrationError>;

    /// Migrations that need the constructed services, before the listener starts.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration cannot be applied.
    fn run_post_startup(
        &self,
        graph: &ServiceGraph,
    ) -> impl Future<Output = Result<Vec<String>, MigrationError>> + Send;
}

/// The production migrations: the filesystem ledger and the embedded SQL migrations.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultMigrationRunner;

impl MigrationRunner for DefaultMigrationRunner {
    #[tracing::instrument(skip_all)]
    fn run_pre_startup(
        &self,
        paths: &ApplicationPaths,
        _config: &ResolvedConfiguration,
    ) -> Result<Vec<String>, MigrationError> {
        let applied = pre_startup::run(paths, &PRE_STARTUP_STEPS)?;
        info!(?applied, "Pre-startup migrations complete");
        Ok(applied)
    }

    async fn run_post_startup(&self, graph: &ServiceGraph) -> Result<Vec<String>, MigrationError> {
        let Some(pool) = graph.storage().sqlite_pool() else {
            debug!(engine = ?graph.storage().engine(), "No SQL storage, skipping database migrations");
            return Ok(Vec::new());
        };
        let applied = database::apply(pool).await?;
        info!(?applied, "Database migrations complete");
        Ok(applied)
    }
}
