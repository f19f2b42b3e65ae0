//! Process environment access.
//!
//! Every run captures one [`EnvSnapshot`] during bootstrapping and passes it explicitly to
//! path resolution and configuration composition, so both stay pure functions of their
//! inputs. Variables the server sets for its own collaborators go through [`Environment::export`].

use alloc::sync::Arc;
use std::{collections::BTreeMap, env, path::PathBuf, sync::Mutex};

/// Prefix of every variable the server reads.
pub const ENV_PREFIX: &str = "MEDIAHOST_";
/// Separator between nesting levels in configuration variables, e.g. `MEDIAHOST_SERVER__PORT`.
pub const NESTING_SEPARATOR: &str = "__";

pub const DATA_DIR_VAR: &str = "MEDIAHOST_DATA_DIR";
pub const CONFIG_DIR_VAR: &str = "MEDIAHOST_CONFIG_DIR";
pub const LOG_DIR_VAR: &str = "MEDIAHOST_LOG_DIR";
pub const CACHE_DIR_VAR: &str = "MEDIAHOST_CACHE_DIR";
pub const WEB_DIR_VAR: &str = "MEDIAHOST_WEB_DIR";
/// Standard `tracing` filter override, honoured on top of `logging.filter`.
pub const RUST_LOG_VAR: &str = "RUST_LOG";

/// Sorted copy of the environment variables relevant to the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    /// Capture the current process environment.
    ///
    /// Only prefixed variables and `RUST_LOG` are kept; variables that are not valid
    /// unicode are skipped.
    #[must_use]
    pub fn capture() -> Self {
        Self::from_pairs(
            env::vars_os().filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?))),
        )
    }

    /// Build a snapshot from explicit pairs, applying the same filtering as [`Self::capture`].
    #[must_use]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars = pairs
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .filter(|&(ref key, _)| key.starts_with(ENV_PREFIX) || key == RUST_LOG_VAR)
            .collect();
        Self { vars }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// A non-empty variable interpreted as a path.
    #[must_use]
    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get(key)
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
    }

    /// All prefixed variables, sorted by name.
    pub fn prefixed(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars
            .iter()
            .filter(|&(key, _)| key.starts_with(ENV_PREFIX))
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Prefixed variables that address configuration keys, as `(dotted.key, raw value)`.
    ///
    /// `MEDIAHOST_SERVER__BIND_ADDRESS` becomes `server.bind_address`. Variables without the
    /// nesting separator (such as the directory overrides) are not configuration keys.
    pub fn config_entries(&self) -> impl Iterator<Item = (String, &str)> {
        self.prefixed().filter_map(|(key, value)| {
            let rest = key.strip_prefix(ENV_PREFIX)?;
            if !rest.contains(NESTING_SEPARATOR) {
                return None;
            }
            let dotted = rest
                .split(NESTING_SEPARATOR)
                .map(str::to_ascii_lowercase)
                .collect::<Vec<_>>()
                .join(".");
            Some((dotted, value))
        })
    }
}

/// Access to the process environment, replaceable in tests.
pub trait Environment: Send + Sync {
    /// Capture the variables for one run.
    fn snapshot(&self) -> EnvSnapshot;

    /// Make a variable visible to the rest of the process and to child processes.
    fn export(&self, key: &str, value: &str);
}

impl<E: Environment + ?Sized> Environment for Arc<E> {
    fn snapshot(&self) -> EnvSnapshot {
        (**self).snapshot()
    }

    fn export(&self, key: &str, value: &str) {
        (**self).export(key, value);
    }
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnvironment;

impl Environment for ProcessEnvironment {
    fn snapshot(&self) -> EnvSnapshot {
        EnvSnapshot::capture()
    }

    fn export(&self, key: &str, value: &str) {
        // SAFETY: exports happen only during bootstrapping, before the run spawns any task
        // and while no other thread of this process reads the environment.
        unsafe { env::set_var(key, value) };
    }
}

/// An environment with fixed contents that records exports instead of applying them.
#[derive(Debug, Default)]
pub struct FixedEnvironment {
    snapshot: EnvSnapshot,
    exported: Mutex<Vec<(String, String)>>,
}

impl FixedEnvironment {
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            snapshot: EnvSnapshot::from_pairs(pairs),
            exported: Mutex::default(),
        }
    }

    /// Variables exported so far, in order.
    #[must_use]
    pub fn exported(&self) -> Vec<(String, String)> {
        self.exported
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl Environment for FixedEnvironment {
    fn snapshot(&self) -> EnvSnapshot {
        self.snapshot.clone()
    }

    fn export(&self, key: &str, value: &str) {
        if let Ok(mut guard) = self.exported.lock() {
            guard.push((key.to_owned(), value.to_owned()));
        }
    }
}
