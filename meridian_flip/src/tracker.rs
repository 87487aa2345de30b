//! Position tracker
//!
//! Single point of truth for where the mount is. Keeps the latest snapshot
//! and turns status reports into edge events.

use crate::mount::{range_ha, MountSnapshot, PositionSample, TrackingStatus};

/// A change of the mount's tracking status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub previous: TrackingStatus,
    pub current: TrackingStatus,
}

impl StatusChange {
    /// Slew finished and the mount is tracking again
    pub fn is_slew_completed(&self) -> bool {
        self.previous == TrackingStatus::Slewing && self.current == TrackingStatus::Tracking
    }
}

#[derive(Debug, Clone, Default)]
pub struct PositionTracker {
    snapshot: MountSnapshot,
    has_position: bool,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the position part of the snapshot.
    ///
    /// The hour angle is wrapped into (-12, 12]; nothing else is validated,
    /// sanity of the values is the driver's business.
    pub fn update(&mut self, sample: PositionSample) -> MountSnapshot {
        self.snapshot = MountSnapshot {
            position: sample.position,
            hour_angle: range_ha(sample.hour_angle),
            pier_side: sample.pier_side,
            tracking_status: self.snapshot.tracking_status,
        };
        self.has_position = true;
        self.snapshot
    }

    /// Replace the tracking status. Returns the edge if the value changed.
    pub fn update_status(&mut self, status: TrackingStatus) -> Option<StatusChange> {
        let previous = self.snapshot.tracking_status;
        self.snapshot.tracking_status = status;
        if previous == status {
            return None;
        }
        tracing::debug!("Mount status changed from {} to {}", previous, status);
        Some(StatusChange { previous, current: status })
    }

    /// Overwrite the tracking status without reporting an edge.
    ///
    /// A slew to the position already being tracked can finish before the
    /// driver ever reports slewing; forcing the status when the slew is
    /// commanded makes the next tracking report an edge.
    pub fn force_status(&mut self, status: TrackingStatus) {
        self.snapshot.tracking_status = status;
    }

    pub fn snapshot(&self) -> &MountSnapshot {
        &self.snapshot
    }

    /// True once the driver has reported at least one position
    pub fn has_position(&self) -> bool {
        self.has_position
    }

    /// Forget everything, e.g. after the mount disconnected
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
