//! Lifecycle of the server process.
//!
//! A [`LifecycleController`] takes one run through its [`LifecycleState`]s:
//!
//! 1. bootstrapping: paths, directories, platform flags
//! 2. logging: default logging file, configuration, subscriber, file watcher
//! 3. preflight checks and pre-startup migrations
//! 4. service construction, after which teardown always happens
//! 5. post-startup migrations, listener start, socket permissions, startup tasks
//! 6. serving until a signal, a [`RunControl`] request or a listener fault
//! 7. storage maintenance and disposal
//!
//! [`drive`] repeats runs for as long as they end with a restart request.

mod control;
mod controller;
mod driver;
mod error;
pub mod platform;
mod signals;
mod state;

pub use control::{RunControl, StopReason};
pub use controller::{LifecycleController, RunOutcome, RunReport};
pub use driver::drive;
pub use error::*;
pub use signals::shutdown_signal;
pub use state::LifecycleState;
