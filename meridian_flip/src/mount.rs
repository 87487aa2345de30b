//! Mount value types and the mount collaborator interface
//!
//! The engine never talks to hardware itself. Position and status samples
//! come in from whatever driver layer owns the mount, and the only command
//! going back out is a slew to the coordinates already being tracked.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Result type for mount collaborator calls
pub type MountResult<T> = Result<T, String>;

/// Pier side enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PierSide {
    East = 0,
    West = 1,
    Unknown = -1,
}

impl PierSide {
    /// The pier side the mount ends up on after a flip.
    /// `Unknown` has no complement.
    pub fn opposite(self) -> Self {
        match self {
            PierSide::East => PierSide::West,
            PierSide::West => PierSide::East,
            PierSide::Unknown => PierSide::Unknown,
        }
    }

    pub fn is_known(self) -> bool {
        self != PierSide::Unknown
    }
}

impl Default for PierSide {
    fn default() -> Self {
        PierSide::Unknown
    }
}

impl From<i32> for PierSide {
    fn from(value: i32) -> Self {
        match value {
            0 => PierSide::East,
            1 => PierSide::West,
            _ => PierSide::Unknown,
        }
    }
}

impl std::fmt::Display for PierSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PierSide::East => write!(f, "East"),
            PierSide::West => write!(f, "West"),
            PierSide::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Mount motion status as reported by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingStatus {
    Idle,
    Slewing,
    Tracking,
    Parked,
}

impl Default for TrackingStatus {
    fn default() -> Self {
        TrackingStatus::Idle
    }
}

impl std::fmt::Display for TrackingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackingStatus::Idle => write!(f, "Idle"),
            TrackingStatus::Slewing => write!(f, "Slewing"),
            TrackingStatus::Tracking => write!(f, "Tracking"),
            TrackingStatus::Parked => write!(f, "Parked"),
        }
    }
}

/// Equatorial coordinates, current epoch (RA in hours, Dec in degrees)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EquatorialCoords {
    pub ra_hours: f64,
    pub dec_degrees: f64,
}

impl EquatorialCoords {
    pub fn new(ra_hours: f64, dec_degrees: f64) -> Self {
        Self { ra_hours, dec_degrees }
    }
}

/// One position report from the mount driver
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub position: EquatorialCoords,
    /// Hour angle in hours; normalized by the tracker
    pub hour_angle: f64,
    pub pier_side: PierSide,
}

impl PositionSample {
    pub fn new(position: EquatorialCoords, hour_angle: f64, pier_side: PierSide) -> Self {
        Self { position, hour_angle, pier_side }
    }
}

/// Latest known mount state, replaced wholesale on every update
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MountSnapshot {
    pub position: EquatorialCoords,
    /// Signed hours in (-12, 12]
    pub hour_angle: f64,
    pub pier_side: PierSide,
    pub tracking_status: TrackingStatus,
}

/// Wrap an hour angle into the (-12, 12] range
pub fn range_ha(hours: f64) -> f64 {
    let mut wrapped = hours % 24.0;
    if wrapped <= -12.0 {
        wrapped += 24.0;
    } else if wrapped > 12.0 {
        wrapped -= 24.0;
    }
    wrapped
}

/// Mount commands the flip engine needs
///
/// Implemented by whatever owns the mount driver. The engine calls these
/// without knowing how the slew is realized.
#[async_trait]
pub trait MountOps: Send + Sync {
    /// Slew to coordinates (RA in hours, Dec in degrees).
    /// For a flip these are the coordinates already tracked; the driver
    /// recomputes the pier side.
    async fn slew_to_coordinates(&self, ra_hours: f64, dec_degrees: f64) -> MountResult<()>;

    /// Abort a slew in progress
    async fn abort_slew(&self) -> MountResult<()>;
}

/// Shared mount operations handle
pub type SharedMountOps = Arc<dyn MountOps>;
