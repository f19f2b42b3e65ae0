use core::fmt;

/// The phases of one run, in the order they are entered.
///
/// A run only moves forward; teardown enters [`Self::Maintenance`] and [`Self::Disposed`]
/// from whichever phase it was in once the service graph existed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    Bootstrapping,
    LoggingReady,
    Validated,
    PreMigrated,
    Initialized,
    Starting,
    PlatformSetup,
    RunningTasks,
    Serving,
    Maintenance,
    Disposed,
}

impl LifecycleState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bootstrapping => "bootstrapping",
            Self::LoggingReady => "logging-ready",
            Self::Validated => "validated",
            Self::PreMigrated => "pre-migrated",
            Self::Initialized => "initialized",
            Self::Starting => "starting",
            Self::PlatformSetup => "platform-setup",
            Self::RunningTasks => "running-tasks",
            Self::Serving => "serving",
            Self::Maintenance => "maintenance",
            Self::Disposed => "disposed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
