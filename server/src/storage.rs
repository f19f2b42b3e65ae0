//! Persistent storage engines.
//!
//! The lifecycle only needs a few capabilities from storage: optional maintenance on shutdown
//! and an orderly close. Engines describe what they support instead of the caller checking
//! engine types.

use alloc::sync::Arc;
use core::fmt::Debug;
use std::path::{Path, PathBuf};

use futures::{FutureExt as _, future::BoxFuture};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use thiserror::Error as ThisError;
use tracing::info;

use crate::{
    config::{StorageEngine, StorageSettings},
    paths::ApplicationPaths,
};

#[derive(Debug, ThisError)]
pub enum StorageError {
    #[error("Failed to open database at {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },
    #[error("Database maintenance failed: {0}")]
    Maintenance(#[source] sqlx::Error),
}

/// A storage engine as seen by the lifecycle.
pub trait StorageBackend: Send + Sync + Debug {
    fn engine(&self) -> StorageEngine;

    /// Whether [`Self::optimize`] does anything for this engine and configuration.
    fn supports_optimize(&self) -> bool;

    /// Engine-specific maintenance, run after serving ends.
    fn optimize(&self) -> BoxFuture<'_, Result<(), StorageError>>;

    /// Release every resource. Called exactly once per run.
    fn close(&self) -> BoxFuture<'_, ()>;

    /// The SQL pool, for engines that have one.
    fn sqlite_pool(&self) -> Option<&SqlitePool> {
        None
    }
}

/// `SQLite` database in the data directory, in WAL mode.
#[derive(Debug)]
pub struct SqliteStorage {
    pool: SqlitePool,
    path: PathBuf,
    optimize_on_shutdown: bool,
}

impl SqliteStorage {
    /// Open (and create if missing) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub async fn open(path: &Path, optimize_on_shutdown: bool) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|source| StorageError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        info!(
            ?path,
            "Database opened (note: WAL mode creates .db-wal and .db-shm files alongside)"
        );
        Ok(Self {
            pool,
            path: path.to_path_buf(),
            optimize_on_shutdown,
        })
    }
}

impl StorageBackend for SqliteStorage {
    fn engine(&self) -> StorageEngine {
        StorageEngine::Sqlite
    }

    fn supports_optimize(&self) -> bool {
        self.optimize_on_shutdown
    }

    fn optimize(&self) -> BoxFuture<'_, Result<(), StorageError>> {
        async move {
            sqlx::query("PRAGMA optimize")
                .execute(&self.pool)
                .await
                .map_err(StorageError::Maintenance)?;
            info!(path = ?self.path, "Database optimized");
            Ok(())
        }
        .boxed()
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        async move {
            self.pool.close().await;
            info!(path = ?self.path, "Database closed");
        }
        .boxed()
    }

    fn sqlite_pool(&self) -> Option<&SqlitePool> {
        Some(&self.pool)
    }
}

/// Keeps nothing; for demos and tests.
#[derive(Debug, Default)]
pub struct MemoryStorage;

impl StorageBackend for MemoryStorage {
    fn engine(&self) -> StorageEngine {
        StorageEngine::Memory
    }

    fn supports_optimize(&self) -> bool {
        false
    }

    fn optimize(&self) -> BoxFuture<'_, Result<(), StorageError>> {
        futures::future::ready(Ok(())).boxed()
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        futures::future::ready(()).boxed()
    }
}

/// Open the engine selected by `settings`.
///
/// # Errors
///
/// Returns an error if the selected engine cannot be opened.
#[tracing::instrument(skip_all, fields(engine = ?settings.engine))]
pub async fn open(
    settings: &StorageSettings,
    paths: &ApplicationPaths,
) -> Result<Arc<dyn StorageBackend>, StorageError> {
    Ok(match settings.engine {
        StorageEngine::Sqlite => {
            let path = paths.database_file(&settings.file_name);
            Arc::new(SqliteStorage::open(&path, settings.optimize_on_shutdown).await?)
        }
        StorageEngine::Memory => {
            info!("Storage is in memory, nothing will be persisted");
            Arc::new(MemoryStorage)
        }
    })
}
