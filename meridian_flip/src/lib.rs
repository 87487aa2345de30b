//! Meridian Flip Coordination
//!
//! Watches an equatorial mount's hour angle and pier side, decides when the
//! mount must flip to the other side of the pier, optionally waits for the
//! capture module to pause, commands the flip slew and checks that the mount
//! ended up on the expected side.
//!
//! [`MeridianFlipCoordinator`] is the synchronous state machine; it can be
//! driven directly by a host that already has its own event loop.
//! [`FlipService`] runs it on a tokio task and talks to the mount through
//! [`MountOps`].

mod config;
mod coordinator;
mod error;
mod interlock;
mod mount;
pub mod predictor;
mod service;
mod timer;
mod tracker;

pub use config::*;
pub use coordinator::*;
pub use error::*;
pub use interlock::*;
pub use mount::*;
pub use predictor::FlipPlan;
pub use service::*;
pub use timer::*;
pub use tracker::*;

pub use async_trait::async_trait;
