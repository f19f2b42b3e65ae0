//! The network listener of a run.
//!
//! A listener is constructed unbound. [`Listener::start`] binds and begins serving in a
//! background task; [`Listener::shutdown`] stops accepting and drains connections for at most
//! the configured shutdown timeout.

use core::{
    fmt, future,
    net::{AddrParseError, IpAddr, SocketAddr},
    time::Duration,
};
use std::{
    fs, io,
    path::{Path, PathBuf},
};

use axum::{Router, serve::Listener as ServeListener};
use thiserror::Error as ThisError;
use tokio::{
    net::TcpListener,
    sync::oneshot,
    task::JoinHandle,
    time::timeout,
};
use tracing::{Instrument as _, info, warn};
#[cfg(unix)]
use std::os::unix::{fs::FileTypeExt as _, net::UnixStream};

#[cfg(unix)]
use tokio::net::UnixListener;

use super::router::{self, AppState};
use crate::{config::ServerSettings, paths::ApplicationPaths, services::ServiceGraph};

/// Where a listener binds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindTarget {
    Tcp { address: String, port: u16 },
    Unix(PathBuf),
}

impl BindTarget {
    #[must_use]
    pub fn from_settings(server: &ServerSettings, paths: &ApplicationPaths) -> Self {
        if server.bind_to_unix_socket {
            Self::Unix(
                server
                    .unix_socket_path
                    .clone()
                    .unwrap_or_else(|| paths.default_socket()),
            )
        } else {
            Self::Tcp {
                address: server.bind_address.clone(),
                port: server.port,
            }
        }
    }

    /// What an operator can change when binding fails.
    #[must_use]
    pub fn remediation(&self) -> String {
        match self {
            Self::Tcp { address, port } => format!(
                "check that no other process listens on {address}:{port}, \
                 or change server.bind_address / server.port (--bind / --port)"
            ),
            Self::Unix(path) => format!(
                "check that the directory of {} is writable, \
                 or change server.unix_socket_path (--socket)",
                path.display()
            ),
        }
    }
}

impl fmt::Display for BindTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { address, port } => write!(f, "{address}:{port}"),
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// The endpoint a started listener is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundEndpoint {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl fmt::Display for BoundEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "http://{addr}"),
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

#[derive(Debug, ThisError)]
pub enum ListenerError {
    #[error("Invalid bind address {address:?}: {source}; change server.bind_address (--bind)")]
    InvalidAddress {
        address: String,
        #[source]
        source: AddrParseError,
    },
    #[error("Failed to bind {target}: {source}; {hint}")]
    Bind {
        target: BindTarget,
        hint: String,
        #[source]
        source: io::Error,
    },
    #[error("{} exists and is not a socket; remove it or change server.unix_socket_path (--socket)", path.display())]
    NotASocket { path: PathBuf },
    #[error("Another process is serving on {}; stop it or change server.unix_socket_path (--socket)", path.display())]
    SocketInUse { path: PathBuf },
    #[error("Listener was already started")]
    AlreadyStarted,
}

/// How a serving listener ended without being asked to.
#[derive(Debug)]
pub enum ListenerExit {
    Completed,
    Failed(String),
}

impl fmt::Display for ListenerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("serve loop returned"),
            Self::Failed(reason) => write!(f, "serve loop failed: {reason}"),
        }
    }
}

/// Network-facing host of a run.
pub trait Listener: Send {
    /// Bind and begin serving.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails; nothing is served then.
    fn start(&mut self) -> impl Future<Output = Result<BoundEndpoint, ListenerError>> + Send;

    /// Resolves if serving ends on its own. Pending forever while not started.
    fn stopped(&mut self) -> impl Future<Output = ListenerExit> + Send;

    /// Stop serving and release the endpoint.
    fn shutdown(self) -> impl Future<Output = ()> + Send;
}

struct Running {
    task: JoinHandle<io::Result<()>>,
    stop: oneshot::Sender<()>,
    endpoint: BoundEndpoint,
}

/// Serves the router over TCP or a Unix socket with `axum`.
pub struct HttpListener {
    router: Option<Router>,
    target: BindTarget,
    shutdown_timeout: Duration,
    running: Option<Running>,
}

impl fmt::Debug for HttpListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpListener")
            .field("target", &self.target)
            .field("running", &self.running.as_ref().map(|running| &running.endpoint))
            .finish_non_exhaustive()
    }
}

impl HttpListener {
    #[must_use]
    pub const fn new(router: Router, target: BindTarget, shutdown_timeout: Duration) -> Self {
        Self {
            router: Some(router),
            target,
            shutdown_timeout,
            running: None,
        }
    }

    /// A listener serving the application routes for `graph`.
    #[must_use]
    pub fn for_graph(graph: &ServiceGraph) -> Self {
        let server = &graph.config().settings().server;
        Self::new(
            router::create_app(AppState::for_graph(graph)),
            BindTarget::from_settings(server, graph.paths()),
            Duration::from_secs(server.shutdown_timeout_secs),
        )
    }

    #[must_use]
    pub const fn target(&self) -> &BindTarget {
        &self.target
    }
}

fn spawn_serve<L>(listener: L, router: Router) -> (JoinHandle<io::Result<()>>, oneshot::Sender<()>)
where
    L: ServeListener,
    L::Addr: fmt::Debug,
{
    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(
        async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    drop(stopped.await);
                })
                .await
        }
        .in_current_span(),
    );
    (task, stop)
}

#[cfg(unix)]
enum StaleSocket {
    NotASocket,
    InUse,
    Io(io::Error),
}

/// Remove a socket file left behind by an unclean exit.
///
/// Anything that is not a socket, or a socket something still accepts on, is left alone.
#[cfg(unix)]
fn clear_stale_socket(path: &Path) -> Result<(), StaleSocket> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(StaleSocket::Io(err)),
    };
    if !metadata.file_type().is_socket() {
        return Err(StaleSocket::NotASocket);
    }
    match UnixStream::connect(path) {
        Ok(_stream) => Err(StaleSocket::InUse),
        Err(err)
            if matches!(
                err.kind(),
                io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
            ) =>
        {
            info!(?path, "Removing stale socket file");
            fs::remove_file(path).map_err(StaleSocket::Io)
        }
        Err(err) => Err(StaleSocket::Io(err)),
    }
}

impl Listener for HttpListener {
    async fn start(&mut self) -> Result<BoundEndpoint, ListenerError> {
        let Some(router) = self.router.take() else {
            return Err(ListenerError::AlreadyStarted);
        };
        let bind_err = |source| ListenerError::Bind {
            target: self.target.clone(),
            hint: self.target.remediation(),
            source,
        };

        let (task, stop, endpoint) = match &self.target {
            BindTarget::Tcp { address, port } => {
                let ip: IpAddr =
                    address
                        .parse()
                        .map_err(|source| ListenerError::InvalidAddress {
                            address: address.clone(),
                            source,
                        })?;
                let listener = TcpListener::bind(SocketAddr::from((ip, *port)))
                    .await
                    .map_err(bind_err)?;
                let local = listener.local_addr().map_err(bind_err)?;
                let (task, stop) = spawn_serve(listener, router);
                (task, stop, BoundEndpoint::Tcp(local))
            }
            #[cfg(unix)]
            BindTarget::Unix(path) => {
                clear_stale_socket(path).map_err(|err| match err {
                    StaleSocket::NotASocket => ListenerError::NotASocket { path: path.clone() },
                    StaleSocket::InUse => ListenerError::SocketInUse { path: path.clone() },
                    StaleSocket::Io(source) => bind_err(source),
                })?;
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).map_err(bind_err)?;
                }
                let listener = UnixListener::bind(path).map_err(bind_err)?;
                let (task, stop) = spawn_serve(listener, router);
                (task, stop, BoundEndpoint::Unix(path.clone()))
            }
            #[cfg(not(unix))]
            BindTarget::Unix(_) => {
                return Err(bind_err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "Unix sockets are not supported on this platform",
                )));
            }
        };

        info!(%endpoint, "Listening");
        self.running = Some(Running {
            task,
            stop,
            endpoint: endpoint.clone(),
        });
        Ok(endpoint)
    }

    async fn stopped(&mut self) -> ListenerExit {
        let Some(running) = self.running.as_mut() else {
            return future::pending().await;
        };
        let exit = match (&mut running.task).await {
            Ok(Ok(())) => ListenerExit::Completed,
            Ok(Err(err)) => ListenerExit::Failed(err.to_string()),
            Err(err) => ListenerExit::Failed(err.to_string()),
        };
        // the task is finished; shutdown must not poll it again
        self.running = None;
        exit
    }

    async fn shutdown(self) {
        let Some(Running {
            mut task,
            stop,
            endpoint,
        }) = self.running
        else {
            return;
        };
        drop(stop.send(()));
        match timeout(self.shutdown_timeout, &mut task).await {
            Ok(Ok(Ok(()))) => info!(%endpoint, "Listener stopped"),
            Ok(Ok(Err(err))) => warn!(%endpoint, %err, "Listener stopped with an error"),
            Ok(Err(err)) => warn!(%endpoint, %err, "Listener task failed"),
            Err(_) => {
                warn!(
                    %endpoint,
                    timeout_secs = self.shutdown_timeout.as_secs(),
                    "Graceful shutdown timed out, dropping open connections"
                );
                task.abort();
            }
        }
        if let BoundEndpoint::Unix(path) = &endpoint
            && let Err(err) = fs::remove_file(path)
            && err.kind() != io::ErrorKind::NotFound
        {
            warn!(?path, %err, "Failed to remove socket file");
        }
    }
}
