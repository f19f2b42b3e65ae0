use thiserror::Error as ThisError;

use crate::{
    config::ConfigError, http::ListenerError, migration::MigrationError, paths::CreateDirError,
    preflight::PreflightError, services::ServiceError, services::tasks::CriticalTaskFailed,
};

/// Exit status for a run that ended normally.
pub const EXIT_OK: u8 = 0;
/// Bad command line or failed preflight check.
pub const EXIT_USAGE: u8 = 1;
/// Listener could not bind.
pub const EXIT_UNAVAILABLE: u8 = 69;
/// Migration, construction, startup task or runtime failure.
pub const EXIT_SOFTWARE: u8 = 70;
/// Filesystem failure while bootstrapping.
pub const EXIT_OS: u8 = 71;
/// Configuration could not be composed.
pub const EXIT_CONFIG: u8 = 78;

/// Why a run ended abnormally.
#[derive(Debug, ThisError)]
pub enum LifecycleError {
    #[error("Invalid command line: {0}")]
    ArgumentParse(String),
    #[error(transparent)]
    Environment(#[from] CreateDirError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Preflight check failed: {0}")]
    PreflightFailed(#[from] PreflightError),
    #[error(transparent)]
    MigrationFailed(#[from] MigrationError),
    #[error("Failed to construct services: {0}")]
    Initialization(#[from] ServiceError),
    #[error(transparent)]
    ListenerBindFailed(#[from] ListenerError),
    #[error(transparent)]
    StartupTaskFailed(#[from] CriticalTaskFailed),
    #[error("Unhandled runtime fault: {0}")]
    UnhandledRuntimeFault(String),
}

impl LifecycleError {
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::ArgumentParse(_) | Self::PreflightFailed(_) => EXIT_USAGE,
            Self::Config(_) => EXIT_CONFIG,
            Self::Environment(_) => EXIT_OS,
            Self::ListenerBindFailed(_) => EXIT_UNAVAILABLE,
            Self::MigrationFailed(_)
            | Self::Initialization(_)
            | Self::StartupTaskFailed(_)
            | Self::UnhandledRuntimeFault(_) => EXIT_SOFTWARE,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(LifecycleError::ArgumentParse("x".to_owned()).exit_code(), 1);
        assert_eq!(
            LifecycleError::from(PreflightError::MissingWebContent {
                path: PathBuf::from("/srv/web")
            })
            .exit_code(),
            1
        );
        assert_eq!(
            LifecycleError::from(ConfigError::Missing {
                path: PathBuf::from("/etc/mediahost/logging.default.toml")
            })
            .exit_code(),
            78
        );
        assert_eq!(
            LifecycleError::from(ListenerError::AlreadyStarted).exit_code(),
            69
        );
        assert_eq!(
            LifecycleError::UnhandledRuntimeFault("boom".to_owned()).exit_code(),
            70
        );
    }
}
