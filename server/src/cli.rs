//! Command-line interface definitions for the server.
//!
//! The parsed [`StartupOptions`] are the operator's intent for one process. They are read,
//! never mutated, by every lifecycle run; a restart reuses the same value.

use std::path::PathBuf;

use clap::Parser;

use crate::config::LogFormat;

/// Options accepted on the command line.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "mediahost")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct StartupOptions {
    /// Directory holding the database and other persistent state
    #[arg(short = 'd', long)]
    pub datadir: Option<PathBuf>,

    /// Directory holding the configuration files
    #[arg(short = 'c', long)]
    pub configdir: Option<PathBuf>,

    /// Directory the log file is written to
    #[arg(short = 'l', long)]
    pub logdir: Option<PathBuf>,

    /// Directory for caches and temporary files
    #[arg(short = 'C', long)]
    pub cachedir: Option<PathBuf>,

    /// Directory containing the web client content
    #[arg(short = 'w', long)]
    pub webdir: Option<PathBuf>,

    /// Do not host the web client; `/` redirects to the API documentation instead
    #[arg(long)]
    pub nowebclient: bool,

    /// Override for the bind address (overrides `server.bind_address`)
    #[arg(long)]
    pub bind: Option<String>,

    /// Override for the listen port (overrides `server.port`)
    #[arg(long)]
    pub port: Option<u16>,

    /// Listen on this Unix socket instead of a TCP port
    #[arg(long)]
    pub socket: Option<PathBuf>,

    /// Octal permissions applied to the Unix socket after binding, e.g. `660`
    #[arg(long)]
    pub socket_permissions: Option<String>,

    /// URL under which clients reach this server
    #[arg(long)]
    pub published_server_url: Option<String>,

    /// Log filter directive (overrides `logging.filter`)
    #[arg(long)]
    pub log_filter: Option<String>,

    /// Log output format (overrides `logging.format`)
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,
}
