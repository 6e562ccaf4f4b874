// =============================================================================
// Debouncer — cancellable, restartable one-shot timer
// =============================================================================
//
// `schedule` (re)arms the timer; only the most recent deadline can fire.
// `fired` is meant to sit in a `tokio::select!` loop: when no deadline is
// armed it never completes, and dropping it before the deadline leaves the
// timer armed, so it is cancellation-safe.
// =============================================================================

use std::time::Duration;

use tokio::time::{sleep_until, Instant};

#[derive(Debug, Default)]
pub struct Debouncer {
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self { deadline: None }
    }

    /// Arm (or re-arm) the timer to fire `delay` from now, replacing any
    /// earlier deadline.
    pub fn schedule(&mut self, delay: Duration) {
        self.deadline = Some(Instant::now() + delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolve once the armed deadline passes, disarming the timer.
    pub async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending::<()>().await,
        }
    }
}
