//! Meridian flip configuration
//!
//! Set by the surrounding application before coordination starts. The
//! coordinator freezes a copy when a flip cycle begins, so changes made
//! mid-flip only apply to the next cycle.

use crate::error::{FlipError, FlipResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Maximum offset from the meridian, in minutes (flips may be up to 3h early or late)
pub const MAX_OFFSET_MINUTES: f64 = 180.0;

/// Upper bound for `flip_timeout_factor`
pub const MAX_FLIP_TIMEOUT_FACTOR: f64 = 100.0;

/// Upper bound for `planning_lead_secs` (one day)
pub const MAX_PLANNING_LEAD_SECS: f64 = 86_400.0;

/// Configuration for meridian flip coordination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlipConfig {
    /// Master switch. When false the coordinator never leaves `None`.
    #[serde(default)]
    pub enabled: bool,

    /// Minutes past (positive) or before (negative) the meridian at which
    /// the flip should happen
    #[serde(default)]
    pub offset_minutes: f64,

    /// Whether a capture module must acknowledge the flip before the slew
    #[serde(default)]
    pub has_capture_interface: bool,

    /// Lower bound on the flip duration (seconds); scaled by
    /// `flip_timeout_factor` to get the running timeout
    #[serde(default = "default_min_flip_duration_secs")]
    pub min_flip_duration_secs: u32,

    /// Scale for `min_flip_duration_secs`. A full 180° pier reversal takes
    /// considerably longer than a re-slew; mount speeds vary.
    #[serde(default = "default_flip_timeout_factor")]
    pub flip_timeout_factor: f64,

    /// How far ahead of the due time a flip is planned (seconds)
    #[serde(default = "default_planning_lead_secs")]
    pub planning_lead_secs: f64,

    /// Time scale of the application clock (1.0 = real time)
    #[serde(default = "default_clock_scale")]
    pub clock_scale: f64,

    /// Ceiling on how long a flip request may wait for the capture
    /// acknowledgment before the service aborts it. None disables it.
    #[serde(default = "default_acknowledgment_timeout_secs")]
    pub acknowledgment_timeout_secs: Option<u64>,

    /// Buffer size of the event broadcast channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_min_flip_duration_secs() -> u32 {
    30
}

fn default_flip_timeout_factor() -> f64 {
    2.0
}

fn default_planning_lead_secs() -> f64 {
    60.0
}

fn default_clock_scale() -> f64 {
    1.0
}

fn default_acknowledgment_timeout_secs() -> Option<u64> {
    Some(1800)
}

fn default_event_buffer() -> usize {
    256
}

impl Default for FlipConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            offset_minutes: 0.0,
            has_capture_interface: false,
            min_flip_duration_secs: default_min_flip_duration_secs(),
            flip_timeout_factor: default_flip_timeout_factor(),
            planning_lead_secs: default_planning_lead_secs(),
            clock_scale: default_clock_scale(),
            acknowledgment_timeout_secs: default_acknowledgment_timeout_secs(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl FlipConfig {
    /// Parse and validate a JSON settings document
    pub fn from_json_str(json: &str) -> FlipResult<Self> {
        let config: FlipConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON settings file
    pub fn load_json(path: impl AsRef<Path>) -> FlipResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        tracing::debug!("Loading meridian flip settings from {}", path.display());
        Self::from_json_str(&contents)
    }

    /// Check value ranges
    pub fn validate(&self) -> FlipResult<()> {
        Self::check_offset(self.offset_minutes)?;
        Self::check_min_flip_duration(self.min_flip_duration_secs)?;
        if !self.flip_timeout_factor.is_finite()
            || !(1.0..=MAX_FLIP_TIMEOUT_FACTOR).contains(&self.flip_timeout_factor)
        {
            return Err(FlipError::invalid(
                "flip_timeout_factor",
                format!(
                    "{} is outside 1.0..={}",
                    self.flip_timeout_factor, MAX_FLIP_TIMEOUT_FACTOR
                ),
            ));
        }
        if !self.planning_lead_secs.is_finite()
            || !(0.0..=MAX_PLANNING_LEAD_SECS).contains(&self.planning_lead_secs)
        {
            return Err(FlipError::invalid(
                "planning_lead_secs",
                format!("must be within 0..={} seconds", MAX_PLANNING_LEAD_SECS),
            ));
        }
        if !self.clock_scale.is_finite() || self.clock_scale <= 0.0 {
            return Err(FlipError::invalid("clock_scale", "must be positive"));
        }
        if self.event_buffer == 0 {
            return Err(FlipError::invalid("event_buffer", "must be positive"));
        }
        Ok(())
    }

    /// Range check for an offset, shared with the runtime setter
    pub fn check_offset(minutes: f64) -> FlipResult<()> {
        if !minutes.is_finite() || minutes.abs() > MAX_OFFSET_MINUTES {
            return Err(FlipError::invalid(
                "offset_minutes",
                format!("{} is outside ±{} minutes", minutes, MAX_OFFSET_MINUTES),
            ));
        }
        Ok(())
    }

    /// Range check for the minimum flip duration, shared with the runtime setter
    pub fn check_min_flip_duration(secs: u32) -> FlipResult<()> {
        if secs == 0 {
            return Err(FlipError::invalid("min_flip_duration_secs", "must be positive"));
        }
        Ok(())
    }

    /// How long a running flip may take before it is declared failed
    ///
    /// An out-of-range factor in an unvalidated config falls back to the
    /// largest allowed factor.
    pub fn flip_timeout(&self) -> Duration {
        let secs = f64::from(self.min_flip_duration_secs) * self.flip_timeout_factor;
        match Duration::try_from_secs_f64(secs) {
            Ok(timeout) if self.flip_timeout_factor <= MAX_FLIP_TIMEOUT_FACTOR => timeout,
            _ => Duration::from_secs(
                u64::from(self.min_flip_duration_secs) * MAX_FLIP_TIMEOUT_FACTOR as u64,
            ),
        }
    }

    /// Offset converted to hours of hour angle
    pub fn offset_hours(&self) -> f64 {
        self.offset_minutes / 60.0
    }

    /// Acknowledgment ceiling as a Duration
    pub fn acknowledgment_timeout(&self) -> Option<Duration> {
        self.acknowledgment_timeout_secs.map(Duration::from_secs)
    }
}
