//! Shim binary that calls into the `mediahost_server` library's `inner_main`.
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    mediahost_server::inner_main().await
}
