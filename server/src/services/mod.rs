//! The per-run service graph and the host that constructs it.

pub mod tasks;

use alloc::sync::Arc;
use core::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Local};
use thiserror::Error as ThisError;
use tracing::info;

use crate::{
    config::ResolvedConfiguration,
    http::{HttpListener, Listener},
    lifecycle::RunControl,
    paths::ApplicationPaths,
    storage::{self, StorageBackend, StorageError},
};
use tasks::{ClearTemporaryFiles, RecordServerStart, StartupTask};

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, ThisError)]
pub enum ServiceError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Everything one run constructs: shared configuration, storage, startup tasks, and the
/// handle through which hosted code asks for a shutdown or restart.
///
/// Built once per run and disposed exactly once, by value.
pub struct ServiceGraph {
    id: u64,
    config: Arc<ResolvedConfiguration>,
    paths: Arc<ApplicationPaths>,
    storage: Arc<dyn StorageBackend>,
    tasks: Vec<Box<dyn StartupTask>>,
    control: RunControl,
    started_at: DateTime<Local>,
}

impl ServiceGraph {
    /// Assemble a graph. Each graph gets an id unique within the process.
    #[must_use]
    pub fn new(
        config: Arc<ResolvedConfiguration>,
        paths: Arc<ApplicationPaths>,
        storage: Arc<dyn StorageBackend>,
        control: RunControl,
        started_at: DateTime<Local>,
    ) -> Self {
        Self {
            id: NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed),
            config,
            paths,
            storage,
            tasks: Vec::new(),
            control,
            started_at,
        }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub const fn config(&self) -> &Arc<ResolvedConfiguration> {
        &self.config
    }

    #[must_use]
    pub const fn paths(&self) -> &Arc<ApplicationPaths> {
        &self.paths
    }

    #[must_use]
    pub fn storage(&self) -> &dyn StorageBackend {
        self.storage.as_ref()
    }

    #[must_use]
    pub const fn control(&self) -> &RunControl {
        &self.control
    }

    #[must_use]
    pub const fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Register a task to run once the listener is live. Tasks run in registration order.
    pub fn register_task(&mut self, task: Box<dyn StartupTask>) {
        self.tasks.push(task);
    }

    #[must_use]
    pub fn tasks(&self) -> &[Box<dyn StartupTask>] {
        &self.tasks
    }

    /// Release the graph's resources.
    pub async fn dispose(self) {
        self.storage.close().await;
        info!(service_graph_id = self.id, "Service graph disposed");
    }
}

impl fmt::Debug for ServiceGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceGraph")
            .field("id", &self.id)
            .field("storage", &self.storage)
            .field(
                "tasks",
                &self.tasks.iter().map(|task| task.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

/// Constructs the service graph and its listener for a run.
pub trait ServiceHost: Send + Sync {
    type Listener: Listener;

    /// Build the graph and the (not yet started) listener. Both share `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if a service cannot be constructed.
    fn construct(
        &self,
        config: Arc<ResolvedConfiguration>,
        paths: Arc<ApplicationPaths>,
        control: RunControl,
        started_at: DateTime<Local>,
    ) -> impl Future<Output = Result<(ServiceGraph, Self::Listener), ServiceError>> + Send;
}

/// Production services: configured storage, the built-in startup tasks, the HTTP listener.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultServiceHost;

impl ServiceHost for DefaultServiceHost {
    type Listener = HttpListener;

    #[tracing::instrument(skip_all)]
    async fn construct(
        &self,
        config: Arc<ResolvedConfiguration>,
        paths: Arc<ApplicationPaths>,
        control: RunControl,
        started_at: DateTime<Local>,
    ) -> Result<(ServiceGraph, HttpListener), ServiceError> {
        let storage = storage::open(&config.settings().storage, &paths).await?;
        let mut graph = ServiceGraph::new(config, paths, storage, control, started_at);
        graph.register_task(Box::new(ClearTemporaryFiles));
        graph.register_task(Box::new(RecordServerStart));
        let listener = HttpListener::for_graph(&graph);
        info!(service_graph_id = graph.id(), "Service graph constructed");
        Ok((graph, listener))
    }
}
