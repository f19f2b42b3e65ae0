//! Library entry for the `mediahost` server.
//!
//! Exposes `inner_main` so the workspace-level shim binary can call into the server logic.
//!
//! A process runs one or more lifecycle runs: each run composes configuration, validates
//! preconditions, migrates, constructs the service graph, serves, and tears down again.
//! A restart request ends the current run and starts a fresh one.
#![cfg_attr(
    test,
    expect(clippy::indexing_slicing, reason = "This is not problematic in tests",)
)]

extern crate alloc;
extern crate core;

pub mod cli;
pub mod config;
pub mod env;
pub mod http;
pub mod lifecycle;
pub mod logging;
pub mod migration;
pub mod paths;
pub mod preflight;
pub mod services;
pub mod storage;

use alloc::sync::Arc;
use std::process::ExitCode;

use clap::Parser as _;

use cli::StartupOptions;
use env::ProcessEnvironment;
use lifecycle::{LifecycleController, LifecycleError};
use migration::DefaultMigrationRunner;
use services::DefaultServiceHost;

/// The server's main function; can be called from a shim binary.
///
/// Parses the command line before anything else. On a parse failure the message is
/// printed and the process exits with code 1 without touching the filesystem or logging.
/// Otherwise lifecycle runs are driven until one ends without a restart request.
pub async fn inner_main() -> ExitCode {
    let options = match StartupOptions::try_parse() {
        Ok(options) => Arc::new(options),
        Err(err) => {
            // --help and --version are reported through the same error path
            let code = if err.use_stderr() {
                LifecycleError::ArgumentParse(err.kind().to_string()).exit_code()
            } else {
                0
            };
            drop(err.print());
            return ExitCode::from(code);
        }
    };

    let status = lifecycle::drive(|attempt| {
        let options = Arc::clone(&options);
        async move {
            tracing::debug!(attempt, "Starting lifecycle run");
            LifecycleController::new(
                options,
                DefaultServiceHost,
                DefaultMigrationRunner,
                ProcessEnvironment,
            )
            .run()
            .await
        }
    })
    .await;

    ExitCode::from(status)
}
