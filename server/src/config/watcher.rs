//! Logging configuration file watching.
//!
//! Adapted to watch several files in one directory: the watcher observes the parent directory
//! and matches events by path or file name, so atomic replacements by editors are noticed too.

use std::{
    fs,
    path::{Path, PathBuf},
};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::{sync::mpsc::unbounded_channel, task::JoinHandle};
use tracing::{Instrument as _, debug, error, info};

/// Running watch over the logging configuration files. Stops when dropped.
#[derive(Debug)]
pub struct LoggingConfigWatcher {
    task: JoinHandle<()>,
    watched: Vec<PathBuf>,
}

fn event_matches(event_path: &Path, watched: &Path) -> bool {
    if event_path == watched {
        return true;
    }
    if let (Ok(canonical_event), Ok(canonical_watched)) =
        (fs::canonicalize(event_path), fs::canonicalize(watched))
        && canonical_event == canonical_watched
    {
        return true;
    }
    // atomic writes go through a temp file and a rename onto the watched name
    event_path.file_name().is_some() && event_path.file_name() == watched.file_name()
}

impl LoggingConfigWatcher {
    /// Watch `files` and call `on_change` after any of them is created or modified.
    ///
    /// All files are expected to share one parent directory, which must exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform watcher cannot be created or the directory cannot be watched.
    pub fn spawn<F>(files: Vec<PathBuf>, on_change: F) -> notify::Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let (raw_tx, mut raw_rx) = unbounded_channel::<Event>();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                if let Ok(event) = res
                    && raw_tx.send(event).is_err()
                {
                    debug!("Logging config watcher channel closed");
                }
            },
            notify::Config::default(),
        )?;

        let mut parents: Vec<&Path> = files.iter().filter_map(|file| file.parent()).collect();
        parents.dedup();
        for dir in parents {
            watcher.watch(dir, RecursiveMode::NonRecursive)?;
        }

        let watched = files.clone();
        let task = tokio::spawn(
            async move {
                // keeps the OS watch alive for as long as the task runs
                let _watcher = watcher;
                while let Some(event) = raw_rx.recv().await {
                    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        continue;
                    }
                    let changed = files.iter().find(|file| {
                        event
                            .paths
                            .iter()
                            .any(|event_path| event_matches(event_path, file))
                    });
                    if let Some(file) = changed {
                        info!(path = ?file, "Logging configuration changed. Reloading...");
                        on_change();
                    }
                }
                error!("Logging config watcher stopped receiving events");
            }
            .in_current_span(),
        );

        Ok(Self { task, watched })
    }

    /// The files this watcher reacts to.
    #[must_use]
    pub fn watched_paths(&self) -> &[PathBuf] {
        &self.watched
    }
}

impl Drop for LoggingConfigWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}
