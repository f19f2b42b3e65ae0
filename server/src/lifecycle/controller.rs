//! The state machine of one run.

use alloc::sync::Arc;
use core::{any::Any, panic::AssertUnwindSafe};
use std::{
    env::{args, consts},
    path::PathBuf,
    thread,
    time::Instant,
};

use chrono::{DateTime, Local};
use futures::{FutureExt as _, future::BoxFuture};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{
    control::{RunControl, StopReason},
    error::{EXIT_OK, LifecycleError},
    platform, signals,
    state::LifecycleState,
};
use crate::{
    cli::StartupOptions,
    config::{self, LoggingConfigWatcher, ResolvedConfiguration},
    env::{EnvSnapshot, Environment, LOG_DIR_VAR, RUST_LOG_VAR},
    http::{BoundEndpoint, Listener},
    logging::{self, telemetry},
    migration::MigrationRunner,
    paths::{self, ApplicationPaths, PathDefaults},
    preflight,
    services::{ServiceGraph, ServiceHost, tasks},
};

/// What happened during a run.
#[derive(Debug)]
pub struct RunReport {
    pub started_at: DateTime<Local>,
    /// Every state entered, in order.
    pub history: Vec<LifecycleState>,
    pub configuration: Option<Arc<ResolvedConfiguration>>,
    pub service_graph_id: Option<u64>,
    pub watched_files: Vec<PathBuf>,
    pub endpoint: Option<BoundEndpoint>,
    /// Whether the storage optimize step ran successfully during maintenance.
    pub storage_optimized: bool,
    pub error: Option<LifecycleError>,
}

impl RunReport {
    #[must_use]
    pub fn reached(&self, state: LifecycleState) -> bool {
        self.history.contains(&state)
    }
}

/// The result of a run, consumed by [`super::drive`].
#[derive(Debug)]
pub struct RunOutcome {
    pub should_restart: bool,
    pub exit_code: u8,
    pub report: RunReport,
}

/// Owns the constructed services of a run, so teardown happens exactly once.
struct ServiceScope<L> {
    graph: ServiceGraph,
    listener: L,
}

impl<L: Listener> ServiceScope<L> {
    /// Engine maintenance. Failures are logged and never end the run differently.
    async fn maintain(&self) -> bool {
        let storage = self.graph.storage();
        if !storage.supports_optimize() {
            debug!(engine = ?storage.engine(), "Storage has no maintenance step");
            return false;
        }
        match storage.optimize().await {
            Ok(()) => {
                info!("Storage optimized");
                true
            }
            Err(err) => {
                warn!(%err, "Storage maintenance failed");
                false
            }
        }
    }

    async fn dispose(self) {
        self.listener.shutdown().await;
        self.graph.dispose().await;
    }
}

struct Prepared {
    paths: Arc<ApplicationPaths>,
    config: Arc<ResolvedConfiguration>,
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|msg| (*msg).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic with a non-string payload".to_owned())
}

/// Drives one run from bootstrapping to disposal.
///
/// A controller is used for exactly one run; a restart builds a new one.
pub struct LifecycleController<H, M, E> {
    options: Arc<StartupOptions>,
    host: H,
    migrations: M,
    environment: E,
    path_defaults: Option<PathDefaults>,
    shutdown_signal: Option<BoxFuture<'static, ()>>,
    control: RunControl,
    state: watch::Sender<LifecycleState>,
    started: Instant,
    report: RunReport,
    watcher: Option<LoggingConfigWatcher>,
}

impl<H, M, E> LifecycleController<H, M, E>
where
    H: ServiceHost,
    M: MigrationRunner,
    E: Environment,
{
    #[must_use]
    pub fn new(options: Arc<StartupOptions>, host: H, migrations: M, environment: E) -> Self {
        let (state, _) = watch::channel(LifecycleState::Bootstrapping);
        Self {
            options,
            host,
            migrations,
            environment,
            path_defaults: None,
            shutdown_signal: None,
            control: RunControl::new(),
            state,
            started: Instant::now(),
            report: RunReport {
                started_at: Local::now(),
                history: vec![LifecycleState::Bootstrapping],
                configuration: None,
                service_graph_id: None,
                watched_files: Vec::new(),
                endpoint: None,
                storage_optimized: false,
                error: None,
            },
            watcher: None,
        }
    }

    /// Use these platform defaults instead of detecting them.
    #[must_use]
    pub fn with_path_defaults(mut self, defaults: PathDefaults) -> Self {
        self.path_defaults = Some(defaults);
        self
    }

    /// End serving when `signal` resolves instead of on SIGTERM / SIGINT.
    #[must_use]
    pub fn with_shutdown_signal<F>(mut self, signal: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.shutdown_signal = Some(signal.boxed());
        self
    }

    /// A handle to request a shutdown or restart of this run.
    #[must_use]
    pub fn control(&self) -> RunControl {
        self.control.clone()
    }

    /// Follow the state of this run.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    fn transition(&mut self, next: LifecycleState) {
        let previous = self.state.send_replace(next);
        debug_assert!(previous < next, "{previous} -> {next} goes backwards");
        self.report.history.push(next);
        info!(from = %previous, to = %next, "Lifecycle state changed");
    }

    /// Execute the run and return what should happen next.
    pub async fn run(mut self) -> RunOutcome {
        let mut scope = None;
        let result = self.execute(&mut scope).await;
        if let Err(err) = &result {
            logging::report_fatal(err, err.exit_code());
        }

        if let Some(scope) = scope {
            self.transition(LifecycleState::Maintenance);
            self.report.storage_optimized = scope.maintain().await;
            self.transition(LifecycleState::Disposed);
            scope.dispose().await;
        } else {
            self.transition(LifecycleState::Disposed);
        }
        if let Some(watcher) = self.watcher.take() {
            drop(watcher);
            debug!("Logging config watcher stopped");
        }

        let (exit_code, error) = match result {
            Ok(()) => (EXIT_OK, None),
            Err(err) => (err.exit_code(), Some(err)),
        };
        // a faulted run may still restart when the restart was asked for first
        let should_restart = self.control.restart_requested()
            && matches!(error, None | Some(LifecycleError::UnhandledRuntimeFault(_)));
        self.report.error = error;
        info!(exit_code, should_restart, "Run finished");

        RunOutcome {
            should_restart,
            exit_code,
            report: self.report,
        }
    }

    /// Panics anywhere in the run become [`LifecycleError::UnhandledRuntimeFault`].
    async fn execute(
        &mut self,
        scope: &mut Option<ServiceScope<H::Listener>>,
    ) -> Result<(), LifecycleError> {
        AssertUnwindSafe(self.execute_steps(scope))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(LifecycleError::UnhandledRuntimeFault(panic_message(
                    panic.as_ref(),
                )))
            })
    }

    async fn execute_steps(
        &mut self,
        scope: &mut Option<ServiceScope<H::Listener>>,
    ) -> Result<(), LifecycleError> {
        let Prepared { paths, config } = self.prepare()?;

        let (graph, listener) = self
            .host
            .construct(
                Arc::clone(&config),
                Arc::clone(&paths),
                self.control.clone(),
                self.report.started_at,
            )
            .await?;
        self.report.service_graph_id = Some(graph.id());
        let scope = scope.insert(ServiceScope { graph, listener });
        self.transition(LifecycleState::Initialized);

        self.start_and_serve(scope).await
    }

    /// Everything before the service graph exists: nothing here needs teardown.
    fn prepare(&mut self) -> Result<Prepared, LifecycleError> {
        let env = self.environment.snapshot();
        let defaults = self.path_defaults.take().unwrap_or_else(PathDefaults::detect);
        let paths = Arc::new(paths::resolve(&self.options, &env, &defaults));

        platform::apply_umask();
        paths.create_writable_dirs()?;
        self.environment
            .export(LOG_DIR_VAR, &paths.log_dir.to_string_lossy());

        logging::materialize_default_config(&paths)?;
        let config = Arc::new(config::compose(&self.options, &paths, &env)?);
        self.report.configuration = Some(Arc::clone(&config));

        let logging_settings = &config.settings().logging;
        let rust_log = env.get(RUST_LOG_VAR).map(str::to_owned);
        let log_file = logging_settings.write_file.then(|| paths.log_file());
        telemetry::init(logging_settings, rust_log.as_deref(), log_file.as_deref());
        telemetry::install_panic_hook();
        self.watch_logging_files(&paths, &env, rust_log);
        self.transition(LifecycleState::LoggingReady);
        self.log_environment(&paths, &env, &config);

        preflight::validate(&paths, &config)?;
        self.transition(LifecycleState::Validated);

        let applied = self.migrations.run_pre_startup(&paths, &config)?;
        debug!(?applied, "Pre-startup migrations applied");
        self.transition(LifecycleState::PreMigrated);

        Ok(Prepared { paths, config })
    }

    fn watch_logging_files(
        &mut self,
        paths: &Arc<ApplicationPaths>,
        env: &EnvSnapshot,
        rust_log: Option<String>,
    ) {
        let files = vec![paths.default_logging_config(), paths.system_logging_config()];
        let options = Arc::clone(&self.options);
        let watched_paths = Arc::clone(paths);
        let env = env.clone();
        let on_change = move || match config::compose(&options, &watched_paths, &env) {
            Ok(config) => telemetry::reload_filter(&config.settings().logging, rust_log.as_deref()),
            Err(err) => warn!(%err, "Ignoring invalid logging configuration, keeping the current filter"),
        };

        match LoggingConfigWatcher::spawn(files, on_change) {
            Ok(watcher) => {
                self.report.watched_files = watcher.watched_paths().to_vec();
                self.watcher = Some(watcher);
            }
            Err(err) => warn!(%err, "Failed to watch logging configuration, changes need a restart"),
        }
    }

    fn log_environment(&self, paths: &ApplicationPaths, env: &EnvSnapshot, config: &ResolvedConfiguration) {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            os = consts::OS,
            arch = consts::ARCH,
            cpus = thread::available_parallelism().map_or(1, usize::from),
            args = ?args().skip(1).collect::<Vec<_>>(),
            "Starting mediahost"
        );
        for (key, value) in env.prefixed() {
            info!(key, value, "Environment variable");
        }
        info!(
            data_dir = ?paths.data_dir,
            config_dir = ?paths.config_dir,
            log_dir = ?paths.log_dir,
            cache_dir = ?paths.cache_dir,
            temp_dir = ?paths.temp_dir(),
            web_dir = ?paths.web_dir,
            "Application paths"
        );
        debug!(configuration = %config.to_json(), "Resolved configuration");
    }

    async fn start_and_serve(
        &mut self,
        scope: &mut ServiceScope<H::Listener>,
    ) -> Result<(), LifecycleError> {
        self.transition(LifecycleState::Starting);
        let applied = self.migrations.run_post_startup(&scope.graph).await?;
        debug!(?applied, "Post-startup migrations applied");
        let endpoint = scope.listener.start().await?;
        self.report.endpoint = Some(endpoint.clone());

        self.transition(LifecycleState::PlatformSetup);
        match platform::apply_socket_permissions(&endpoint, &scope.graph.config().settings().server) {
            Ok(Some(mode)) => info!(mode = format!("{mode:o}"), %endpoint, "Applied socket permissions"),
            Ok(None) => {}
            Err(err) => warn!(%err, "Failed to apply socket permissions"),
        }

        self.transition(LifecycleState::RunningTasks);
        let failed = tasks::run_all(&scope.graph).await?;
        if failed > 0 {
            warn!(failed, "Some startup tasks failed");
        }

        self.transition(LifecycleState::Serving);
        info!(elapsed = ?self.started.elapsed(), %endpoint, "Startup complete");

        let signal = self
            .shutdown_signal
            .take()
            .unwrap_or_else(|| signals::shutdown_signal().boxed());
        tokio::select! {
            () = signal => info!("Shutting down"),
            reason = self.control.wait() => match reason {
                StopReason::Shutdown => info!("Shutdown requested"),
                StopReason::Restart => info!("Restart requested"),
            },
            exit = scope.listener.stopped() => {
                return Err(LifecycleError::UnhandledRuntimeFault(format!(
                    "Listener stopped unexpectedly: {exit}"
                )));
            }
        }
        Ok(())
    }
}
