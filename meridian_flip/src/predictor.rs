//! Flip predictor
//!
//! Decides whether a flip is due from the hour angle, the pier side and the
//! configuration alone. Holds no state.
//!
//! The pier side tells which meridian crossing is next:
//! - West: normal case, tracking from east to west, flip near HA 0
//!   (upper culmination).
//! - East: below-the-pole case, flip near HA 12 (lower culmination), so the
//!   hour angle is shifted by 12h before comparing.
//!
//! Mounts may flip before the meridian, so an adjusted hour angle of 9h or
//! more is treated as up to 3h before the crossing rather than far past it.

use crate::config::FlipConfig;
use crate::mount::{range_ha, EquatorialCoords, MountSnapshot, PierSide, TrackingStatus};
use serde::{Deserialize, Serialize};

/// Solar seconds per hour of hour angle (one sidereal hour)
pub const SOLAR_SECONDS_PER_SIDEREAL_HOUR: f64 = 3600.0 / 1.002_737_909_35;

/// Adjusted hour angles at or beyond this are wrapped into early-flip territory
const EARLY_FLIP_WRAP_HOURS: f64 = 9.0;

/// A flip that has been found due, frozen by the coordinator once planned
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlipPlan {
    /// Seconds until the flip should start, never negative
    pub due_in_seconds: f64,
    pub target_pier_side_after_flip: PierSide,
    pub initial_pier_side: PierSide,
    /// Coordinates being tracked when the plan was made; the flip slews here
    pub target: EquatorialCoords,
    /// Hour angle at planning time
    pub hour_angle: f64,
}

/// Hours until the flip for the given pier side, negative when overdue.
/// None if the pier side is unknown.
pub fn hours_to_flip(hour_angle: f64, pier_side: PierSide, offset_hours: f64) -> Option<f64> {
    let mut ha = match pier_side {
        PierSide::West => range_ha(hour_angle),
        PierSide::East => range_ha(hour_angle + 12.0),
        PierSide::Unknown => return None,
    };
    if ha >= EARLY_FLIP_WRAP_HOURS {
        ha -= 24.0;
    }
    Some(offset_hours - ha)
}

/// Signed seconds until the flip on the application clock, negative when overdue
pub fn seconds_to_flip(hour_angle: f64, pier_side: PierSide, config: &FlipConfig) -> Option<f64> {
    hours_to_flip(hour_angle, pier_side, config.offset_hours())
        .map(|hours| hours * SOLAR_SECONDS_PER_SIDEREAL_HOUR / config.clock_scale)
}

/// Evaluate a snapshot. Returns a plan when the flip is due within the
/// planning lead time.
pub fn evaluate(snapshot: &MountSnapshot, config: &FlipConfig) -> Option<FlipPlan> {
    if snapshot.tracking_status != TrackingStatus::Tracking {
        return None;
    }

    let seconds = seconds_to_flip(snapshot.hour_angle, snapshot.pier_side, config)?;
    tracing::debug!(
        "Flip prediction: HA={:.4}h, pier={}, offset={:.2}min, {:.1}s to flip",
        snapshot.hour_angle,
        snapshot.pier_side,
        config.offset_minutes,
        seconds
    );

    if seconds > config.planning_lead_secs {
        return None;
    }

    Some(FlipPlan {
        due_in_seconds: seconds.max(0.0),
        target_pier_side_after_flip: snapshot.pier_side.opposite(),
        initial_pier_side: snapshot.pier_side,
        target: snapshot.position,
        hour_angle: snapshot.hour_angle,
    })
}

/// Countdown text, e.g. "Meridian flip in 01:05:30"
pub fn format_countdown(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    let hh = total / 3600;
    let mm = (total % 3600) / 60;
    let ss = total % 60;
    format!("Meridian flip in {:02}:{:02}:{:02}", hh, mm, ss)
}
