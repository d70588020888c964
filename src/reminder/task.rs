use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A background task that repeatedly waits and fires until cancelled.
///
/// Each spawn yields its own handle, so every chain can be stopped on its own.
/// Dropping the handle cancels the chain.
pub struct RecurringTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl RecurringTask {
    /// `next_delay` is asked before every wait; `on_fire` runs after each one.
    pub fn spawn<N, F>(mut next_delay: N, mut on_fire: F) -> Self
    where
        N: FnMut() -> Duration + Send + 'static,
        F: FnMut() + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let handle = tokio::spawn(async move {
            loop {
                let delay = next_delay();
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = tokio::time::sleep(delay) => on_fire(),
                }
            }
        });

        Self { token, handle }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for RecurringTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
