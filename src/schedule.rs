//! One-shot delayed work on the Tokio runtime.
//!
//! The deadline is fixed when the task is spawned, not when it is first
//! polled. Cancelling wins over a deadline that has already passed but whose
//! task has not run yet, so nothing runs after `cancel` returns.

use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct DelayedTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
    deadline: Instant,
}

impl DelayedTask {
    /// Run `task` once after `delay` unless cancelled first. Returns `None`
    /// when called outside a Tokio runtime.
    pub fn spawn<F>(delay: Duration, task: F) -> Option<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("No runtime to schedule delayed task on: {}", e);
                return None;
            }
        };

        let deadline = Instant::now() + delay;
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let handle = runtime.spawn(async move {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => debug!("Delayed task cancelled"),
                _ = sleep_until(deadline) => task(),
            }
        });

        Some(Self {
            token,
            handle,
            deadline,
        })
    }

    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            self.token.cancel();
            debug!("Cancelled delayed task due at {:?}", self.deadline);
        }
    }

    /// Neither cancelled nor finished
    pub fn is_pending(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl Drop for DelayedTask {
    fn drop(&mut self) {
        self.cancel();
    }
}
