//! Error types for the meridian flip engine
//!
//! Two families live here:
//!
//! - [`FlipError`]: failures of the surrounding plumbing (configuration,
//!   service channels, mount commands). These are returned as `Err`.
//! - [`FlipFailure`]: the reason a flip cycle ended in the `Error` phase.
//!   These never propagate as `Err`; the coordinator resolves them to a
//!   phase and uses the `Display` text as the status string.

use crate::mount::PierSide;
use thiserror::Error;

/// Result alias for fallible engine operations
pub type FlipResult<T> = Result<T, FlipError>;

/// Errors raised outside the flip state machine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlipError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================

    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    #[error("Configuration file error: {0}")]
    ConfigIo(String),

    #[error("Configuration parse error: {0}")]
    ConfigParse(String),

    // =========================================================================
    // Service Errors
    // =========================================================================

    /// The coordinator task is gone; commands can no longer be delivered
    #[error("Meridian flip service stopped")]
    ServiceStopped,

    #[error("Mount command failed: {0}")]
    MountCommand(String),
}

impl FlipError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        FlipError::InvalidConfig {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for FlipError {
    fn from(err: std::io::Error) -> Self {
        FlipError::ConfigIo(err.to_string())
    }
}

impl From<serde_json::Error> for FlipError {
    fn from(err: serde_json::Error) -> Self {
        FlipError::ConfigParse(err.to_string())
    }
}

/// Why a flip cycle ended in the `Error` phase
#[derive(Error, Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum FlipFailure {
    /// Mount resumed tracking but is not on the predicted pier side
    #[error("Meridian flip failed: pier side mismatch (expected {expected}, mount reports {actual})")]
    PierMismatch {
        expected: PierSide,
        actual: PierSide,
    },

    /// Tracking did not resume before the flip timer expired
    #[error("Meridian flip timed out after {after_secs:.0}s")]
    Timeout {
        after_secs: f64,
    },

    /// The mount refused the flip slew
    #[error("Meridian flip failed: slew rejected ({0})")]
    SlewRejected(String),
}
