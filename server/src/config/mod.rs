//! Configuration: typed settings, layered composition, and watching of the logging files.
//!
//! This module provides a unified interface to all configuration-related functionality.

mod composer;
mod types;
mod watcher;

pub use composer::*;
pub use types::*;
pub use watcher::*;
