//! Checks that run before migrations or service construction.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error as ThisError;
use tracing::debug;

use crate::{config::ResolvedConfiguration, paths::ApplicationPaths};

const REMEDIATION: &str = "install the web client there, point --webdir or MEDIAHOST_WEB_DIR at it, \
     or disable hosting with --nowebclient or server.host_web_client = false";

#[derive(Debug, ThisError)]
pub enum PreflightError {
    #[error("Web client content directory {path:?} does not exist; {REMEDIATION}")]
    MissingWebContent { path: PathBuf },
    #[error("Web client content directory {path:?} is empty; {REMEDIATION}")]
    EmptyWebContent { path: PathBuf },
    #[error("Web client content directory {path:?} cannot be read: {source}")]
    UnreadableWebContent {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn check_web_content(path: &Path) -> Result<(), PreflightError> {
    if !path.is_dir() {
        return Err(PreflightError::MissingWebContent {
            path: path.to_path_buf(),
        });
    }
    let mut entries = fs::read_dir(path).map_err(|source| PreflightError::UnreadableWebContent {
        path: path.to_path_buf(),
        source,
    })?;
    if entries.next().is_none() {
        return Err(PreflightError::EmptyWebContent {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

/// Validate the preconditions of a run.
///
/// When the web client is hosted, its content directory must exist and contain at least one
/// entry. Without web client hosting nothing is checked.
///
/// # Errors
///
/// Returns the first failed check, with a message an operator can act on.
pub fn validate(
    paths: &ApplicationPaths,
    config: &ResolvedConfiguration,
) -> Result<(), PreflightError> {
    if config.host_web_client() {
        check_web_content(&paths.web_dir)?;
    } else {
        debug!("Web client hosting disabled, skipping content check");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn config(host_web_client: bool) -> ResolvedConfiguration {
        let mut settings = Settings::default();
        settings.server.host_web_client = host_web_client;
        ResolvedConfiguration::from_settings(settings).unwrap()
    }

    fn paths_with_web(web_dir: PathBuf) -> ApplicationPaths {
        ApplicationPaths {
            data_dir: PathBuf::from("/unused/data"),
            config_dir: PathBuf::from("/unused/config"),
            log_dir: PathBuf::from("/unused/log"),
            cache_dir: PathBuf::from("/unused/cache"),
            web_dir,
        }
    }

    #[test]
    fn missing_web_dir_fails() {
        let root = tempfile::tempdir().unwrap();
        let paths = paths_with_web(root.path().join("web"));
        let err = validate(&paths, &config(true)).unwrap_err();
        assert!(
            matches!(err, PreflightError::MissingWebContent { .. }),
            "unexpected error: {err}"
        );
        let message = err.to_string();
        assert!(message.contains("--nowebclient"), "names the flag: {message}");
        assert!(
            message.contains("server.host_web_client"),
            "names the key: {message}"
        );
    }

    #[test]
    fn empty_web_dir_fails() {
        let root = tempfile::tempdir().unwrap();
        let paths = paths_with_web(root.path().to_path_buf());
        assert!(
            matches!(
                validate(&paths, &config(true)),
                Err(PreflightError::EmptyWebContent { .. })
            ),
            "empty directory must be rejected"
        );
    }

    #[test]
    fn populated_web_dir_passes() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("index.html"), "<html></html>").unwrap();
        let paths = paths_with_web(root.path().to_path_buf());
        validate(&paths, &config(true)).unwrap();
    }

    #[test]
    fn no_web_client_skips_the_check() {
        let paths = paths_with_web(PathBuf::from("/definitely/not/there"));
        validate(&paths, &config(false)).unwrap();
    }
}
