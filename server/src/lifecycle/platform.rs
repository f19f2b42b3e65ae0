//! Process-level platform setup.

use crate::{
    config::{ServerSettings, SocketModeError},
    http::BoundEndpoint,
};

/// Restrict the permissions of everything the process creates to `rwxr-x---`.
#[cfg(unix)]
pub fn apply_umask() {
    use nix::sys::stat::{Mode, umask};

    let previous = umask(Mode::S_IWGRP | Mode::S_IRWXO);
    tracing::debug!(previous = format!("{:o}", previous.bits()), "Applied umask 027");
}

#[cfg(not(unix))]
pub fn apply_umask() {}

/// Apply the configured permissions to a Unix socket endpoint.
///
/// Returns the applied mode, or `None` when there is nothing to do.
///
/// # Errors
///
/// Returns an error if the mode is invalid or cannot be applied.
pub fn apply_socket_permissions(
    endpoint: &BoundEndpoint,
    server: &ServerSettings,
) -> Result<Option<u32>, SocketModeError> {
    let BoundEndpoint::Unix(path) = endpoint else {
        return Ok(None);
    };
    let Some(mode) = server.socket_mode()? else {
        return Ok(None);
    };
    set_mode(path, mode).map_err(|source| SocketModeError::Apply {
        path: path.clone(),
        mode,
        source,
    })?;
    Ok(Some(mode))
}

#[cfg(unix)]
fn set_mode(path: &std::path::Path, mode: u32) -> std::io::Result<()> {
    use std::{fs, os::unix::fs::PermissionsExt as _};

    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_: &std::path::Path, _: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use std::{fs, os::unix::fs::PermissionsExt as _};

    use super::*;

    #[test]
    fn socket_mode_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mediahost.sock");
        fs::write(&path, "").unwrap();
        let server = ServerSettings {
            unix_socket_permissions: Some("660".to_owned()),
            ..ServerSettings::default()
        };

        let applied =
            apply_socket_permissions(&BoundEndpoint::Unix(path.clone()), &server).unwrap();
        assert_eq!(applied, Some(0o660));
        assert_eq!(
            fs::metadata(&path).unwrap().permissions().mode() & 0o7777,
            0o660
        );
    }

    #[test]
    fn tcp_endpoints_and_unset_modes_are_skipped() {
        let server = ServerSettings {
            unix_socket_permissions: Some("660".to_owned()),
            ..ServerSettings::default()
        };
        let tcp = BoundEndpoint::Tcp("127.0.0.1:8096".parse().unwrap());
        assert_eq!(apply_socket_permissions(&tcp, &server).unwrap(), None);

        let unix = BoundEndpoint::Unix("/nonexistent/mediahost.sock".into());
        assert_eq!(
            apply_socket_permissions(&unix, &ServerSettings::default()).unwrap(),
            None
        );
    }

    #[test]
    fn invalid_mode_is_an_error() {
        let server = ServerSettings {
            unix_socket_permissions: Some("rw-rw----".to_owned()),
            ..ServerSettings::default()
        };
        let unix = BoundEndpoint::Unix("/nonexistent/mediahost.sock".into());
        assert!(matches!(
            apply_socket_permissions(&unix, &server),
            Err(SocketModeError::InvalidMode(_))
        ));
    }

    #[test]
    fn missing_socket_file_is_an_apply_error() {
        let server = ServerSettings {
            unix_socket_permissions: Some("660".to_owned()),
            ..ServerSettings::default()
        };
        let unix = BoundEndpoint::Unix("/nonexistent/mediahost.sock".into());
        let err = apply_socket_permissions(&unix, &server).unwrap_err();
        assert!(
            matches!(err, SocketModeError::Apply { mode: 0o660, .. }),
            "unexpected error: {err}"
        );
    }
}
