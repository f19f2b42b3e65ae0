//! HTTP surface: the listener collaborator and the routes the lifecycle needs.

mod listener;
mod middleware;
pub mod router;

pub use listener::*;
