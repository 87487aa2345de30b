//! Capture interlock
//!
//! Handshake with the optional capture module. When a flip is requested the
//! capture side is told once; it finishes or aborts its exposure and then
//! acknowledges. There is no internal timeout here: exposures can be very
//! long, so the ceiling belongs to the host (see the service).

use tokio::time::Instant;

#[derive(Debug, Clone, Default)]
pub struct CaptureInterlock {
    requested_at: Option<Instant>,
    acknowledged: bool,
}

impl CaptureInterlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a request. Returns false if one is already outstanding, in which
    /// case no second notification must be sent.
    pub fn request(&mut self, now: Instant) -> bool {
        if self.requested_at.is_some() {
            return false;
        }
        self.requested_at = Some(now);
        self.acknowledged = false;
        true
    }

    /// Record the acknowledgment. Returns true only for the first
    /// acknowledgment of an outstanding request.
    pub fn acknowledge(&mut self) -> bool {
        if self.requested_at.is_none() || self.acknowledged {
            return false;
        }
        self.acknowledged = true;
        true
    }

    /// Request outstanding and not yet acknowledged
    pub fn is_pending(&self) -> bool {
        self.requested_at.is_some() && !self.acknowledged
    }

    /// When the outstanding request was opened
    pub fn pending_since(&self) -> Option<Instant> {
        if self.is_pending() {
            self.requested_at
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        self.requested_at = None;
        self.acknowledged = false;
    }
}
