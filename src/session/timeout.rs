//! Cancellable one-shot session timeout
//!
//! The timer never touches the session directly: when it elapses it sends
//! the armed token back into the driver queue, where it is serialized with
//! every other finalize trigger.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::driver::SessionCommand;
use super::machine::TimeoutToken;

/// Owns at most one pending timeout task
#[derive(Default)]
pub struct TimeoutTimer {
    pending: Option<JoinHandle<()>>,
}

impl TimeoutTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `token` to be delivered after `after`, replacing any pending timeout
    pub fn arm(&mut self, after: Duration, token: TimeoutToken, tx: mpsc::Sender<SessionCommand>) {
        self.cancel();
        debug!(?token, after_ms = after.as_millis() as u64, "timeout armed");

        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            // The driver may already be gone during shutdown
            let _ = tx.send(SessionCommand::TimeoutElapsed(token)).await;
        }));
    }

    /// Cancel the pending timeout, if any
    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
            debug!("timeout cancelled");
        }
    }

    /// Whether a timeout task is scheduled and has not finished
    #[cfg(test)]
    fn is_armed(&self) -> bool {
        self.pending.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for TimeoutTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
