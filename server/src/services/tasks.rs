//! One-time tasks that run after the listener is live.

use core::error::Error;
use std::{fs, io};

use eyre::WrapErr as _;
use futures::{FutureExt as _, future::BoxFuture};
use thiserror::Error as ThisError;
use tracing::{info, warn};

use super::ServiceGraph;

/// A task registered by the hosted application.
pub trait StartupTask: Send + Sync {
    fn name(&self) -> &'static str;

    /// A failing critical task aborts the run; other failures are only logged.
    fn is_critical(&self) -> bool {
        false
    }

    fn run<'graph>(&'graph self, graph: &'graph ServiceGraph) -> BoxFuture<'graph, eyre::Result<()>>;
}

#[derive(Debug, ThisError)]
#[error("Critical startup task {name} failed: {source}")]
pub struct CriticalTaskFailed {
    pub name: &'static str,
    #[source]
    pub source: Box<dyn Error + Send + Sync>,
}

/// Run every registered task in order.
///
/// Returns the number of non-critical failures.
///
/// # Errors
///
/// Returns the first critical task that fails; later tasks are not run.
#[tracing::instrument(skip_all, fields(service_graph_id = graph.id()))]
pub async fn run_all(graph: &ServiceGraph) -> Result<usize, CriticalTaskFailed> {
    let mut failed = 0;
    for task in graph.tasks() {
        match task.run(graph).await {
            Ok(()) => info!(task = task.name(), "Startup task finished"),
            Err(err) if task.is_critical() => {
                return Err(CriticalTaskFailed {
                    name: task.name(),
                    source: err.into(),
                });
            }
            Err(err) => {
                warn!(task = task.name(), error = ?err, "Startup task failed");
                failed += 1;
            }
        }
    }
    Ok(failed)
}

/// Empties the temporary directory left over from earlier runs.
#[derive(Debug, Clone, Copy)]
pub struct ClearTemporaryFiles;

impl StartupTask for ClearTemporaryFiles {
    fn name(&self) -> &'static str {
        "clear-temporary-files"
    }

    fn run<'graph>(&'graph self, graph: &'graph ServiceGraph) -> BoxFuture<'graph, eyre::Result<()>> {
        async move {
            let temp_dir = graph.paths().temp_dir();
            let entries = match fs::read_dir(&temp_dir) {
                Ok(entries) => entries,
                Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
                Err(err) => {
                    return Err(err).wrap_err(format!("Failed to list {}", temp_dir.display()));
                }
            };
            let mut removed = 0_usize;
            for entry in entries {
                let path = entry?.path();
                let result = if path.is_dir() {
                    fs::remove_dir_all(&path)
                } else {
                    fs::remove_file(&path)
                };
                result.wrap_err(format!("Failed to remove {}", path.display()))?;
                removed += 1;
            }
            info!(removed, ?temp_dir, "Cleared temporary files");
            Ok(())
        }
        .boxed()
    }
}

/// Records the run in the database, for engines that have one.
#[derive(Debug, Clone, Copy)]
pub struct RecordServerStart;

impl StartupTask for RecordServerStart {
    fn name(&self) -> &'static str {
        "record-server-start"
    }

    fn run<'graph>(&'graph self, graph: &'graph ServiceGraph) -> BoxFuture<'graph, eyre::Result<()>> {
        async move {
            let Some(pool) = graph.storage().sqlite_pool() else {
                return Ok(());
            };
            let graph_id = i64::try_from(graph.id()).wrap_err("Service graph id out of range")?;
            sqlx::query(
                "INSERT INTO server_starts (service_graph_id, version, started_at) VALUES (?, ?, ?)",
            )
            .bind(graph_id)
            .bind(env!("CARGO_PKG_VERSION"))
            .bind(graph.started_at().to_rfc3339())
            .execute(pool)
            .await
            .wrap_err("Failed to record server start")?;
            Ok(())
        }
        .boxed()
    }
}
