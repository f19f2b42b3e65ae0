use tracing::info;

use super::controller::RunOutcome;

/// Run `next_run` until an outcome does not ask for a restart; return its exit code.
///
/// `next_run` receives the attempt number, starting at 1, and must build a fresh
/// controller each time.
pub async fn drive<F, Fut>(mut next_run: F) -> u8
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = RunOutcome>,
{
    let mut attempt = 1_u32;
    loop {
        let outcome = next_run(attempt).await;
        if !outcome.should_restart {
            return outcome.exit_code;
        }
        info!(attempt, "Restarting");
        attempt = attempt.saturating_add(1);
    }
}
