//! Flip timer
//!
//! Bounds the running phase. The timer is a deadline owned by the
//! coordinator rather than a spawned task: the host polls the coordinator
//! when the deadline passes, and `cancel()` clears it in the same call that
//! leaves the running phase, so a stale expiry can never reach a later cycle.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Default)]
pub struct FlipTimer {
    deadline: Option<Instant>,
    duration: Duration,
}

impl FlipTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer, replacing any previous deadline
    pub fn start(&mut self, now: Instant, duration: Duration) {
        tracing::debug!("Flip timer started ({:.1}s)", duration.as_secs_f64());
        self.duration = duration;
        self.deadline = now.checked_add(duration);
        if self.deadline.is_none() {
            tracing::warn!("Flip timer duration out of range, running without a deadline");
        }
    }

    /// Disarm the timer. Calling it on a disarmed timer does nothing.
    pub fn cancel(&mut self) {
        if self.deadline.take().is_some() {
            tracing::debug!("Flip timer cancelled");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Duration the timer was last started with
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// True if armed and the deadline has passed
    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(deadline) if now >= deadline)
    }
}
