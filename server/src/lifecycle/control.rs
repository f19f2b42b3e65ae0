use alloc::sync::Arc;

use tokio::sync::watch;

/// What the hosted application asked the run to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Shutdown,
    Restart,
}

/// Per-run handle through which hosted code asks the run to end.
///
/// Clones share one request. A restart request is never downgraded by a later shutdown
/// request.
#[derive(Debug, Clone)]
pub struct RunControl {
    tx: Arc<watch::Sender<Option<StopReason>>>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn request_shutdown(&self) {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(StopReason::Shutdown);
                true
            } else {
                false
            }
        });
    }

    pub fn request_restart(&self) {
        self.tx.send_if_modified(|current| {
            if *current == Some(StopReason::Restart) {
                false
            } else {
                *current = Some(StopReason::Restart);
                true
            }
        });
    }

    #[must_use]
    pub fn requested(&self) -> Option<StopReason> {
        *self.tx.borrow()
    }

    #[must_use]
    pub fn restart_requested(&self) -> bool {
        self.requested() == Some(StopReason::Restart)
    }

    /// Resolves once a request was made, immediately if one already was.
    pub async fn wait(&self) -> StopReason {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            // the sender lives in `self`, so the channel cannot close while we wait
            if rx.changed().await.is_err() {
                return core::future::pending().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use super::*;

    #[test]
    fn restart_wins_over_shutdown() {
        let control = RunControl::new();
        assert_eq!(control.requested(), None);
        control.request_restart();
        control.request_shutdown();
        assert!(control.restart_requested());

        let control = RunControl::new();
        control.request_shutdown();
        control.request_restart();
        assert_eq!(control.requested(), Some(StopReason::Restart));
    }

    #[tokio::test]
    async fn wait_sees_requests_from_clones() {
        let control = RunControl::new();
        let clone = control.clone();
        let waiter = tokio::spawn(async move { control.wait().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        clone.request_shutdown();
        assert_eq!(waiter.await.unwrap(), StopReason::Shutdown);
        assert_eq!(clone.wait().await, StopReason::Shutdown, "already requested");
    }
}
