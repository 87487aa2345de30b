//! Meridian flip coordinator
//!
//! Owns the flip lifecycle:
//!
//! ```text
//! None -> Planned -> (Requested -> Accepted) -> Running -> Completed | Error
//! ```
//!
//! The coordinator is synchronous and single threaded. Every input takes the
//! current instant; deadline driven transitions (countdown reaching zero,
//! flip timer expiry) happen in [`MeridianFlipCoordinator::poll`], and
//! [`MeridianFlipCoordinator::next_deadline`] tells the host when to call it.
//! Outputs are queued as [`FlipEvent`]s and collected with
//! [`MeridianFlipCoordinator::drain_events`].

use crate::config::FlipConfig;
use crate::error::{FlipFailure, FlipResult};
use crate::interlock::CaptureInterlock;
use crate::mount::{MountSnapshot, PierSide, PositionSample, TrackingStatus};
use crate::predictor::{self, FlipPlan};
use crate::timer::FlipTimer;
use crate::tracker::PositionTracker;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Phase of the current flip cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlipPhase {
    None,
    Planned,
    Requested,
    Accepted,
    Running,
    Completed,
    Error,
}

impl FlipPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, FlipPhase::Completed | FlipPhase::Error)
    }
}

impl std::fmt::Display for FlipPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FlipPhase::None => "None",
            FlipPhase::Planned => "Planned",
            FlipPhase::Requested => "Requested",
            FlipPhase::Accepted => "Accepted",
            FlipPhase::Running => "Running",
            FlipPhase::Completed => "Completed",
            FlipPhase::Error => "Error",
        };
        write!(f, "{}", name)
    }
}

/// Slew issued to the mount to perform the flip
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlewCommand {
    pub ra_hours: f64,
    pub dec_degrees: f64,
    /// Flip cycle the slew belongs to; failures are reported against it
    pub cycle: u64,
}

/// Output of the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FlipEvent {
    PhaseChanged { phase: FlipPhase, timestamp: i64 },
    StatusText(String),
    /// Capture module must pause and call `acknowledge_flip`
    FlipRequested,
    Slew(SlewCommand),
    /// A running flip was cancelled; stop the mount
    AbortSlew,
}

/// Point-in-time view for UIs and queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlipStatus {
    pub phase: FlipPhase,
    /// Unclamped seconds to the next flip, if it can be predicted
    pub seconds_to_flip: Option<f64>,
    /// Remaining countdown while planned
    pub seconds_until_planned_flip: Option<f64>,
    pub pier_side: PierSide,
    pub tracking_status: TrackingStatus,
    pub mount_connected: bool,
    pub failure: Option<FlipFailure>,
}

/// Why no flip is being predicted while in `None`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InactiveReason {
    Disabled,
    NotConnected,
    Parked,
    PierSideUnknown,
}

impl InactiveReason {
    fn status_text(self) -> &'static str {
        match self {
            InactiveReason::Disabled => "Status: inactive (flip not requested)",
            InactiveReason::NotConnected => "Status: inactive (no scope connected)",
            InactiveReason::Parked => "Status: inactive (parked)",
            InactiveReason::PierSideUnknown => "Status: inactive (pier side unknown)",
        }
    }
}

/// Cycle state; the frozen plan lives inside the phases that need it
#[derive(Debug, Clone)]
enum Cycle {
    Idle,
    Planned { plan: FlipPlan, due_at: Instant },
    Requested { plan: FlipPlan },
    Accepted { plan: FlipPlan },
    /// `slew_done` is set once the mount went from slewing back to tracking
    Running { plan: FlipPlan, slew_done: bool },
    Completed,
    Failed(FlipFailure),
}

impl Cycle {
    fn phase(&self) -> FlipPhase {
        match self {
            Cycle::Idle => FlipPhase::None,
            Cycle::Planned { .. } => FlipPhase::Planned,
            Cycle::Requested { .. } => FlipPhase::Requested,
            Cycle::Accepted { .. } => FlipPhase::Accepted,
            Cycle::Running { .. } => FlipPhase::Running,
            Cycle::Completed => FlipPhase::Completed,
            Cycle::Failed(_) => FlipPhase::Error,
        }
    }

    fn plan(&self) -> Option<&FlipPlan> {
        match self {
            Cycle::Planned { plan, .. }
            | Cycle::Requested { plan }
            | Cycle::Accepted { plan }
            | Cycle::Running { plan, .. } => Some(plan),
            _ => None,
        }
    }
}

pub struct MeridianFlipCoordinator {
    /// Live settings, applied at the start of the next cycle
    config: FlipConfig,
    /// Settings frozen when the current cycle left `None`
    cycle_config: FlipConfig,
    cycle: Cycle,
    cycle_id: u64,
    /// Cycle for which a slew was already issued
    slew_cycle: Option<u64>,
    tracker: PositionTracker,
    interlock: CaptureInterlock,
    timer: FlipTimer,
    mount_connected: bool,
    inactive_reason: Option<InactiveReason>,
    outbox: Vec<FlipEvent>,
}

impl MeridianFlipCoordinator {
    pub fn new(config: FlipConfig) -> Self {
        tracing::debug!(
            "Meridian flip coordinator created: enabled={}, offset={:.2}min, capture={}",
            config.enabled,
            config.offset_minutes,
            config.has_capture_interface
        );
        Self {
            cycle_config: config.clone(),
            config,
            cycle: Cycle::Idle,
            cycle_id: 0,
            slew_cycle: None,
            tracker: PositionTracker::new(),
            interlock: CaptureInterlock::new(),
            timer: FlipTimer::new(),
            mount_connected: false,
            inactive_reason: None,
            outbox: Vec::new(),
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn phase(&self) -> FlipPhase {
        self.cycle.phase()
    }

    /// The frozen plan of the in-flight cycle
    pub fn plan(&self) -> Option<&FlipPlan> {
        self.cycle.plan()
    }

    pub fn failure(&self) -> Option<&FlipFailure> {
        match &self.cycle {
            Cycle::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn config(&self) -> &FlipConfig {
        &self.config
    }

    pub fn snapshot(&self) -> &MountSnapshot {
        self.tracker.snapshot()
    }

    pub fn is_mount_connected(&self) -> bool {
        self.mount_connected
    }

    /// Next instant at which `poll` has work to do
    pub fn next_deadline(&self) -> Option<Instant> {
        match &self.cycle {
            Cycle::Planned { due_at, .. } => Some(*due_at),
            Cycle::Running { .. } => self.timer.deadline(),
            _ => None,
        }
    }

    /// When the outstanding capture request was sent, if still unacknowledged
    pub fn pending_request_since(&self) -> Option<Instant> {
        match self.cycle {
            Cycle::Requested { .. } => self.interlock.pending_since(),
            _ => None,
        }
    }

    pub fn status(&self, now: Instant) -> FlipStatus {
        let snapshot = self.tracker.snapshot();
        let seconds_to_flip = if self.tracker.has_position() {
            predictor::seconds_to_flip(snapshot.hour_angle, snapshot.pier_side, &self.config)
        } else {
            None
        };
        let seconds_until_planned_flip = match &self.cycle {
            Cycle::Planned { due_at, .. } => Some(due_at.saturating_duration_since(now).as_secs_f64()),
            _ => None,
        };
        FlipStatus {
            phase: self.phase(),
            seconds_to_flip,
            seconds_until_planned_flip,
            pier_side: snapshot.pier_side,
            tracking_status: snapshot.tracking_status,
            mount_connected: self.mount_connected,
            failure: self.failure().cloned(),
        }
    }

    /// Take all events queued since the last call
    pub fn drain_events(&mut self) -> Vec<FlipEvent> {
        std::mem::take(&mut self.outbox)
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    pub fn set_enabled(&mut self, enabled: bool) {
        tracing::info!("Meridian flip {}", if enabled { "enabled" } else { "disabled" });
        self.config.enabled = enabled;
        if !enabled {
            self.reset_cycle("Meridian flip disabled", true);
        }
    }

    /// Rejects out-of-range values and keeps the previous offset
    pub fn set_offset(&mut self, minutes: f64) -> FlipResult<()> {
        if let Err(e) = FlipConfig::check_offset(minutes) {
            tracing::warn!("Rejected meridian flip offset: {}", e);
            return Err(e);
        }
        tracing::debug!("Meridian flip offset set to {:.2} min", minutes);
        self.config.offset_minutes = minutes;
        Ok(())
    }

    pub fn set_has_capture_interface(&mut self, present: bool) {
        tracing::debug!("Capture interface present: {}", present);
        self.config.has_capture_interface = present;
    }

    /// Rejects zero and keeps the previous duration
    pub fn set_min_flip_duration(&mut self, secs: u32) -> FlipResult<()> {
        if let Err(e) = FlipConfig::check_min_flip_duration(secs) {
            tracing::warn!("Rejected minimum flip duration: {}", e);
            return Err(e);
        }
        tracing::debug!("Minimum flip duration set to {}s", secs);
        self.config.min_flip_duration_secs = secs;
        Ok(())
    }

    // =========================================================================
    // Mount inputs
    // =========================================================================

    /// Primary driver input: a new position report
    pub fn on_mount_position(&mut self, sample: PositionSample, now: Instant) {
        self.mount_connected = true;
        self.tracker.update(sample);

        // a finished cycle ends with the next report
        if matches!(self.cycle, Cycle::Completed) {
            self.transition(Cycle::Idle);
        }

        match &self.cycle {
            Cycle::Idle => self.evaluate(now),
            Cycle::Planned { due_at, .. } => {
                let remaining = due_at.saturating_duration_since(now).as_secs_f64();
                self.emit_status(predictor::format_countdown(remaining));
            }
            Cycle::Running { plan, slew_done: true } => {
                let plan = *plan;
                self.settle_flip(plan, true);
            }
            _ => {}
        }
        self.poll(now);
    }

    /// Tracking status report; detects the end of the flip slew
    pub fn on_mount_status(&mut self, status: TrackingStatus, now: Instant) {
        self.mount_connected = true;
        let Some(change) = self.tracker.update_status(status) else {
            return;
        };

        if change.is_slew_completed() {
            if let Cycle::Running { plan, slew_done } = &mut self.cycle {
                *slew_done = true;
                let plan = *plan;
                self.settle_flip(plan, false);
            }
        }
        self.poll(now);
    }

    /// Mount connection state. A disconnect abandons the cycle without error.
    pub fn set_mount_connected(&mut self, connected: bool) {
        if connected {
            self.mount_connected = true;
            return;
        }
        if self.mount_connected {
            tracing::warn!("Mount disconnected");
        }
        self.mount_connected = false;
        self.reset_cycle("Meridian flip aborted: mount disconnected", false);
        self.tracker.reset();
        self.set_inactive(Some(InactiveReason::NotConnected));
    }

    /// The application slewed to a different target
    pub fn on_target_changed(&mut self) {
        self.reset_cycle("Meridian flip reset: target changed", false);
    }

    /// The mount refused the flip slew issued for `cycle`
    pub fn on_slew_failed(&mut self, cycle: u64, reason: impl Into<String>) {
        let reason = reason.into();
        if cycle != self.cycle_id {
            tracing::debug!("Ignoring slew failure from earlier flip cycle {}: {}", cycle, reason);
            return;
        }
        if matches!(self.cycle, Cycle::Running { .. }) {
            self.fail(FlipFailure::SlewRejected(reason));
        } else {
            tracing::debug!("Ignoring slew failure in phase {}: {}", self.phase(), reason);
        }
    }

    // =========================================================================
    // Capture inputs
    // =========================================================================

    /// Called by the capture module once its exposure is paused.
    /// Only meaningful while requested; otherwise ignored.
    pub fn acknowledge_flip(&mut self, now: Instant) {
        if !self.tracker.has_position() {
            tracing::warn!("Flip acknowledged before the mount reported any position, ignoring");
            return;
        }
        let plan = match &self.cycle {
            Cycle::Requested { plan } => *plan,
            _ => {
                tracing::warn!("Ignoring flip acknowledgment in phase {}", self.phase());
                return;
            }
        };
        if !self.interlock.acknowledge() {
            return;
        }
        tracing::info!("Meridian flip accepted by capture");
        self.transition(Cycle::Accepted { plan });
        self.start_flip(plan, now);
    }

    /// The capture module is finishing its exposure before pausing
    pub fn on_capture_waiting(&mut self) {
        if matches!(self.cycle, Cycle::Requested { .. }) {
            tracing::info!("Meridian flip waiting for capture");
            self.emit_status("Meridian flip waiting...");
        } else {
            tracing::debug!("Ignoring capture waiting report in phase {}", self.phase());
        }
    }

    /// Abandon the in-flight cycle and return to `None`. Idempotent.
    pub fn abort_flip(&mut self) {
        self.reset_cycle("Meridian flip aborted", true);
    }

    // =========================================================================
    // Deadlines
    // =========================================================================

    /// Process deadline driven transitions
    pub fn poll(&mut self, now: Instant) {
        match &self.cycle {
            Cycle::Planned { .. } => self.advance_planned(now),
            Cycle::Running { .. } if self.timer.is_expired(now) => {
                let after_secs = self.timer.duration().as_secs_f64();
                self.fail(FlipFailure::Timeout { after_secs });
            }
            _ => {}
        }
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    fn evaluate(&mut self, now: Instant) {
        let snapshot = *self.tracker.snapshot();

        let inactive = if !self.config.enabled {
            Some(InactiveReason::Disabled)
        } else if !self.mount_connected {
            Some(InactiveReason::NotConnected)
        } else if snapshot.tracking_status == TrackingStatus::Parked {
            Some(InactiveReason::Parked)
        } else if !snapshot.pier_side.is_known() {
            Some(InactiveReason::PierSideUnknown)
        } else {
            None
        };
        self.set_inactive(inactive);
        if inactive.is_some() {
            return;
        }

        let Some(plan) = predictor::evaluate(&snapshot, &self.config) else {
            if let Some(seconds) =
                predictor::seconds_to_flip(snapshot.hour_angle, snapshot.pier_side, &self.config)
            {
                self.emit_status(predictor::format_countdown(seconds));
            }
            return;
        };

        let Some(due_at) = Duration::try_from_secs_f64(plan.due_in_seconds)
            .ok()
            .and_then(|due_in| now.checked_add(due_in))
        else {
            tracing::warn!("Flip due time {}s is out of range, not planning", plan.due_in_seconds);
            return;
        };
        self.cycle_config = self.config.clone();
        self.cycle_id += 1;
        tracing::info!(
            "Meridian flip planned: HA={:.4}h, pier {} -> {}, due in {:.1}s, offset={:.2}min",
            plan.hour_angle,
            plan.initial_pier_side,
            plan.target_pier_side_after_flip,
            plan.due_in_seconds,
            self.cycle_config.offset_minutes
        );
        self.transition(Cycle::Planned { plan, due_at });
        self.emit_status(format!("Meridian flip planned in {:.0} seconds", plan.due_in_seconds));
    }

    fn advance_planned(&mut self, now: Instant) {
        let (plan, due_at) = match &self.cycle {
            Cycle::Planned { plan, due_at } => (*plan, *due_at),
            _ => return,
        };
        if now < due_at {
            return;
        }

        if self.cycle_config.has_capture_interface {
            if self.interlock.request(now) {
                tracing::info!("Meridian flip due, requesting capture to pause");
                self.transition(Cycle::Requested { plan });
                self.outbox.push(FlipEvent::FlipRequested);
                self.emit_status("Meridian flip requested, waiting for capture to pause");
            }
            return;
        }

        if self.tracker.snapshot().tracking_status != TrackingStatus::Tracking {
            tracing::debug!("Meridian flip due but mount is not tracking, waiting");
            return;
        }
        self.start_flip(plan, now);
    }

    fn start_flip(&mut self, plan: FlipPlan, now: Instant) {
        if self.slew_cycle == Some(self.cycle_id) {
            tracing::warn!("Flip slew already issued for this cycle, not slewing again");
            return;
        }
        self.slew_cycle = Some(self.cycle_id);

        tracing::info!(
            "Meridian flip: slewing to RA={:.4}h, Dec={:.4}° (pier {} -> {})",
            plan.target.ra_hours,
            plan.target.dec_degrees,
            plan.initial_pier_side,
            plan.target_pier_side_after_flip
        );
        self.transition(Cycle::Running { plan, slew_done: false });
        self.timer.start(now, self.cycle_config.flip_timeout());
        // the next tracking report ends the slew even if slewing is never reported
        self.tracker.force_status(TrackingStatus::Slewing);
        self.outbox.push(FlipEvent::Slew(SlewCommand {
            ra_hours: plan.target.ra_hours,
            dec_degrees: plan.target.dec_degrees,
            cycle: self.cycle_id,
        }));
        self.emit_status("Meridian flip running...");
    }

    /// Decide a running flip whose slew has ended. Drivers may report the
    /// new pier side after the status, so a mismatch is only declared on a
    /// position reported after the slew ended.
    fn settle_flip(&mut self, plan: FlipPlan, position_after_slew: bool) {
        let expected = plan.target_pier_side_after_flip;
        let actual = self.tracker.snapshot().pier_side;
        if actual == expected {
            self.complete(plan.initial_pier_side, actual);
        } else if position_after_slew {
            self.fail(FlipFailure::PierMismatch { expected, actual });
        } else {
            tracing::debug!("Flip slew finished, waiting for pier side report (currently {})", actual);
        }
    }

    fn complete(&mut self, from: PierSide, to: PierSide) {
        tracing::info!("Meridian flip completed OK (pier side {} -> {})", from, to);
        self.transition(Cycle::Completed);
        self.emit_status("Meridian flip completed");
    }

    fn fail(&mut self, failure: FlipFailure) {
        tracing::warn!("{}", failure);
        let text = failure.to_string();
        self.transition(Cycle::Failed(failure));
        self.emit_status(text);
    }

    /// Return to `None`, discarding the frozen plan. No-op when already there.
    fn reset_cycle(&mut self, reason: &str, abort_running_slew: bool) {
        if matches!(self.cycle, Cycle::Idle) {
            return;
        }
        if abort_running_slew && matches!(self.cycle, Cycle::Running { .. }) {
            self.outbox.push(FlipEvent::AbortSlew);
        }
        tracing::info!("{} (phase was {})", reason, self.phase());
        self.transition(Cycle::Idle);
        self.emit_status(reason);
    }

    fn transition(&mut self, next: Cycle) {
        let previous = self.cycle.phase();
        if !matches!(next, Cycle::Running { .. }) {
            self.timer.cancel();
        }
        if !matches!(next, Cycle::Requested { .. } | Cycle::Accepted { .. } | Cycle::Running { .. }) {
            self.interlock.reset();
        }
        self.cycle = next;

        let phase = self.cycle.phase();
        if phase != previous {
            tracing::debug!("Meridian flip phase {} -> {}", previous, phase);
            self.outbox.push(FlipEvent::PhaseChanged {
                phase,
                timestamp: chrono::Utc::now().timestamp(),
            });
        }
    }

    /// Report the inactivity reason once per change
    fn set_inactive(&mut self, reason: Option<InactiveReason>) {
        if reason == self.inactive_reason {
            return;
        }
        self.inactive_reason = reason;
        if let Some(reason) = reason {
            self.emit_status(reason.status_text());
        }
    }

    fn emit_status(&mut self, text: impl Into<String>) {
        self.outbox.push(FlipEvent::StatusText(text.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount::EquatorialCoords;

    const TARGET: EquatorialCoords = EquatorialCoords { ra_hours: 14.25, dec_degrees: 38.5 };

    fn config(capture: bool) -> FlipConfig {
        FlipConfig {
            enabled: true,
            has_capture_interface: capture,
            min_flip_duration_secs: 10,
            ..Default::default()
        }
    }

    fn sample(hour_angle: f64, pier_side: PierSide) -> PositionSample {
        PositionSample::new(TARGET, hour_angle, pier_side)
    }

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    fn phases(events: &[FlipEvent]) -> Vec<FlipPhase> {
        events
            .iter()
            .filter_map(|e| match e {
                FlipEvent::PhaseChanged { phase, .. } => Some(*phase),
                _ => None,
            })
            .collect()
    }

    fn slews(events: &[FlipEvent]) -> Vec<SlewCommand> {
        events
            .iter()
            .filter_map(|e| match e {
                FlipEvent::Slew(cmd) => Some(*cmd),
                _ => None,
            })
            .collect()
    }

    fn status_texts(events: &[FlipEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                FlipEvent::StatusText(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Tracking on the west side, a few seconds before upper culmination
    fn tracking_before_meridian(coordinator: &mut MeridianFlipCoordinator, t0: Instant) {
        coordinator.on_mount_status(TrackingStatus::Tracking, t0);
        coordinator.on_mount_position(sample(-0.5, PierSide::West), t0);
        coordinator.on_mount_position(sample(-0.005, PierSide::West), t0);
    }

    #[test]
    fn test_disabled_never_leaves_none() {
        let t0 = Instant::now();
        let mut coordinator = MeridianFlipCoordinator::new(FlipConfig::default());
        let mut events = Vec::new();

        coordinator.on_mount_status(TrackingStatus::Tracking, t0);
        for step in 0..200 {
            let ha = -0.5 + step as f64 * 0.01;
            let now = t0 + secs(step as f64 * 30.0);
            coordinator.on_mount_position(sample(ha, PierSide::West), now);
            coordinator.poll(now);
            events.extend(coordinator.drain_events());
        }
        coordinator.on_mount_status(TrackingStatus::Slewing, t0 + secs(7000.0));
        coordinator.on_mount_status(TrackingStatus::Tracking, t0 + secs(7001.0));
        events.extend(coordinator.drain_events());

        assert_eq!(coordinator.phase(), FlipPhase::None);
        assert!(phases(&events).is_empty());
        assert!(slews(&events).is_empty());
        assert_eq!(
            status_texts(&events),
            vec!["Status: inactive (flip not requested)".to_string()],
            "inactive reason reported once"
        );
    }

    #[test]
    fn test_successful_flip_end_to_end() {
        let t0 = Instant::now();
        let mut coordinator = MeridianFlipCoordinator::new(config(false));

        tracking_before_meridian(&mut coordinator, t0);
        assert_eq!(coordinator.phase(), FlipPhase::Planned);
        let plan = *coordinator.plan().unwrap();
        assert_eq!(plan.target_pier_side_after_flip, PierSide::East);
        assert!((plan.due_in_seconds - 17.95).abs() < 0.1);

        // hour angle crosses 0
        coordinator.on_mount_position(sample(0.0001, PierSide::West), t0 + secs(18.0));
        assert_eq!(coordinator.phase(), FlipPhase::Running);

        coordinator.on_mount_status(TrackingStatus::Slewing, t0 + secs(19.0));
        coordinator.on_mount_position(sample(0.002, PierSide::East), t0 + secs(25.0));
        coordinator.on_mount_status(TrackingStatus::Tracking, t0 + secs(26.0));
        assert_eq!(coordinator.phase(), FlipPhase::Completed);
        assert!(coordinator.plan().is_none());
        assert!(coordinator.next_deadline().is_none(), "timer cancelled");

        let events = coordinator.drain_events();
        assert_eq!(
            phases(&events),
            vec![FlipPhase::Planned, FlipPhase::Running, FlipPhase::Completed]
        );
        assert_eq!(
            slews(&events),
            vec![SlewCommand {
                ra_hours: TARGET.ra_hours,
                dec_degrees: TARGET.dec_degrees,
                cycle: 1,
            }]
        );
        assert!(!events.contains(&FlipEvent::FlipRequested));
        let texts = status_texts(&events);
        assert!(texts.iter().any(|t| t.starts_with("Meridian flip planned in")));
        assert!(texts.iter().any(|t| t == "Meridian flip completed"));

        // next report starts a new cycle; no re-flip on the east side
        coordinator.on_mount_position(sample(0.003, PierSide::East), t0 + secs(30.0));
        assert_eq!(coordinator.phase(), FlipPhase::None);
        assert_eq!(phases(&coordinator.drain_events()), vec![FlipPhase::None]);
    }

    #[test]
    fn test_pier_mismatch_is_error() {
        let t0 = Instant::now();
        let mut coordinator = MeridianFlipCoordinator::new(config(false));

        tracking_before_meridian(&mut coordinator, t0);
        coordinator.poll(t0 + secs(18.0));
        assert_eq!(coordinator.phase(), FlipPhase::Running);

        coordinator.on_mount_status(TrackingStatus::Slewing, t0 + secs(19.0));
        coordinator.on_mount_position(sample(0.002, PierSide::West), t0 + secs(25.0));
        coordinator.on_mount_status(TrackingStatus::Tracking, t0 + secs(26.0));
        // the new pier side may still be on its way
        assert_eq!(coordinator.phase(), FlipPhase::Running);

        coordinator.on_mount_position(sample(0.003, PierSide::West), t0 + secs(27.0));
        assert_eq!(coordinator.phase(), FlipPhase::Error);
        assert_eq!(
            coordinator.failure(),
            Some(&FlipFailure::PierMismatch { expected: PierSide::East, actual: PierSide::West })
        );
        let texts = status_texts(&coordinator.drain_events());
        assert!(texts.iter().any(|t| t.contains("pier side mismatch")));

        // no automatic retry
        coordinator.on_mount_position(sample(0.01, PierSide::West), t0 + secs(60.0));
        coordinator.poll(t0 + secs(600.0));
        assert_eq!(coordinator.phase(), FlipPhase::Error);
        assert!(slews(&coordinator.drain_events()).is_empty());
    }

    #[test]
    fn test_running_times_out() {
        let t0 = Instant::now();
        let mut coordinator = MeridianFlipCoordinator::new(config(false));

        tracking_before_meridian(&mut coordinator, t0);
        let start = t0 + secs(18.0);
        coordinator.poll(start);
        assert_eq!(coordinator.phase(), FlipPhase::Running);
        // 10s minimum duration scaled by the default factor of 2
        assert_eq!(coordinator.next_deadline(), Some(start + secs(20.0)));

        coordinator.on_mount_status(TrackingStatus::Slewing, start + secs(1.0));
        coordinator.poll(start + secs(19.0));
        assert_eq!(coordinator.phase(), FlipPhase::Running);

        coordinator.poll(start + secs(20.0));
        assert_eq!(coordinator.phase(), FlipPhase::Error);
        assert_eq!(coordinator.failure(), Some(&FlipFailure::Timeout { after_secs: 20.0 }));
        assert!(coordinator.next_deadline().is_none());

        // late tracking report does not revive the cycle
        coordinator.on_mount_status(TrackingStatus::Tracking, start + secs(30.0));
        assert_eq!(coordinator.phase(), FlipPhase::Error);
    }

    #[test]
    fn test_capture_gating_waits_for_acknowledgment() {
        let t0 = Instant::now();
        let mut coordinator = MeridianFlipCoordinator::new(config(true));

        tracking_before_meridian(&mut coordinator, t0);
        coordinator.poll(t0 + secs(18.0));
        assert_eq!(coordinator.phase(), FlipPhase::Requested);
        assert_eq!(coordinator.pending_request_since(), Some(t0 + secs(18.0)));

        // no amount of time or mount input advances it
        for hour in 1..=12 {
            let now = t0 + secs(hour as f64 * 3600.0);
            coordinator.on_mount_position(sample(hour as f64 * 0.1, PierSide::West), now);
            coordinator.poll(now);
        }
        assert_eq!(coordinator.phase(), FlipPhase::Requested);

        let events = coordinator.drain_events();
        assert_eq!(
            events.iter().filter(|e| **e == FlipEvent::FlipRequested).count(),
            1,
            "single request notification"
        );
        assert!(slews(&events).is_empty());

        let now = t0 + secs(50_000.0);
        coordinator.acknowledge_flip(now);
        assert_eq!(coordinator.phase(), FlipPhase::Running);
        assert!(coordinator.pending_request_since().is_none());
        let events = coordinator.drain_events();
        assert_eq!(phases(&events), vec![FlipPhase::Accepted, FlipPhase::Running]);
        assert_eq!(slews(&events).len(), 1);

        // duplicate acknowledgment is ignored
        coordinator.acknowledge_flip(now);
        assert!(coordinator.drain_events().is_empty());
    }

    #[test]
    fn test_no_capture_gating_skips_request() {
        let t0 = Instant::now();
        let mut coordinator = MeridianFlipCoordinator::new(config(false));

        tracking_before_meridian(&mut coordinator, t0);
        coordinator.poll(t0 + secs(18.0));

        let observed = phases(&coordinator.drain_events());
        assert_eq!(observed, vec![FlipPhase::Planned, FlipPhase::Running]);
    }

    #[test]
    fn test_overdue_flip_starts_immediately() {
        let t0 = Instant::now();
        let mut coordinator = MeridianFlipCoordinator::new(config(false));

        coordinator.on_mount_status(TrackingStatus::Tracking, t0);
        // evaluation delayed until well past the meridian
        coordinator.on_mount_position(sample(0.3, PierSide::West), t0);

        assert_eq!(coordinator.phase(), FlipPhase::Running);
        assert_eq!(coordinator.plan().unwrap().due_in_seconds, 0.0);
    }

    #[test]
    fn test_offset_countdown() {
        let t0 = Instant::now();
        let offset_minutes = 5.0;
        let mut coordinator = MeridianFlipCoordinator::new(FlipConfig {
            offset_minutes,
            planning_lead_secs: 900.0,
            ..config(false)
        });

        coordinator.on_mount_status(TrackingStatus::Tracking, t0);
        coordinator.on_mount_position(sample(0.0, PierSide::West), t0);
        assert_eq!(coordinator.phase(), FlipPhase::Planned);

        let remaining = coordinator.status(t0).seconds_until_planned_flip.unwrap();
        assert!((remaining - offset_minutes * 60.0).abs() <= 60.0);

        let due = coordinator.next_deadline().unwrap();
        coordinator.poll(due - secs(1.0));
        assert_eq!(coordinator.phase(), FlipPhase::Planned);
        coordinator.poll(due);
        assert_eq!(coordinator.phase(), FlipPhase::Running);
    }

    #[test]
    fn test_planned_waits_while_not_tracking() {
        let t0 = Instant::now();
        let mut coordinator = MeridianFlipCoordinator::new(config(false));

        tracking_before_meridian(&mut coordinator, t0);
        coordinator.on_mount_status(TrackingStatus::Idle, t0 + secs(5.0));
        coordinator.poll(t0 + secs(30.0));
        assert_eq!(coordinator.phase(), FlipPhase::Planned);

        coordinator.on_mount_status(TrackingStatus::Tracking, t0 + secs(31.0));
        assert_eq!(coordinator.phase(), FlipPhase::Running);
    }

    #[test]
    fn test_abort_is_idempotent() {
        let t0 = Instant::now();
        let mut coordinator = MeridianFlipCoordinator::new(config(false));

        tracking_before_meridian(&mut coordinator, t0);
        coordinator.poll(t0 + secs(18.0));
        assert_eq!(coordinator.phase(), FlipPhase::Running);
        coordinator.drain_events();

        coordinator.abort_flip();
        assert_eq!(coordinator.phase(), FlipPhase::None);
        assert!(coordinator.plan().is_none());
        assert!(coordinator.next_deadline().is_none());
        let events = coordinator.drain_events();
        assert_eq!(events.iter().filter(|e| **e == FlipEvent::AbortSlew).count(), 1);
        assert_eq!(phases(&events), vec![FlipPhase::None]);

        coordinator.abort_flip();
        assert_eq!(coordinator.phase(), FlipPhase::None);
        assert!(coordinator.drain_events().is_empty());

        // stale timer cannot fire into the aborted cycle
        coordinator.poll(t0 + secs(3600.0));
        assert_eq!(coordinator.phase(), FlipPhase::None);
    }

    #[test]
    fn test_abort_from_none_is_noop() {
        let mut coordinator = MeridianFlipCoordinator::new(config(false));
        coordinator.abort_flip();
        coordinator.abort_flip();
        assert_eq!(coordinator.phase(), FlipPhase::None);
        assert!(coordinator.drain_events().is_empty());
    }

    #[test]
    fn test_disable_aborts_in_flight_plan() {
        let t0 = Instant::now();
        let mut coordinator = MeridianFlipCoordinator::new(config(true));

        tracking_before_meridian(&mut coordinator, t0);
        coordinator.poll(t0 + secs(18.0));
        assert_eq!(coordinator.phase(), FlipPhase::Requested);

        coordinator.set_enabled(false);
        assert_eq!(coordinator.phase(), FlipPhase::None);
        assert!(coordinator.pending_request_since().is_none());

        // acknowledgment racing with the abort is ignored
        coordinator.acknowledge_flip(t0 + secs(20.0));
        assert_eq!(coordinator.phase(), FlipPhase::None);
        assert!(slews(&coordinator.drain_events()).is_empty());
    }

    #[test]
    fn test_disconnect_returns_to_none_without_error() {
        let t0 = Instant::now();
        let mut coordinator = MeridianFlipCoordinator::new(config(false));

        tracking_before_meridian(&mut coordinator, t0);
        coordinator.poll(t0 + secs(18.0));
        coordinator.drain_events();

        coordinator.set_mount_connected(false);
        assert_eq!(coordinator.phase(), FlipPhase::None);
        assert!(!coordinator.is_mount_connected());
        let events = coordinator.drain_events();
        assert!(!events.contains(&FlipEvent::AbortSlew));
        assert!(!phases(&events).contains(&FlipPhase::Error));
        assert_eq!(coordinator.snapshot().pier_side, PierSide::Unknown);
    }

    #[test]
    fn test_settings_do_not_affect_in_flight_cycle() {
        let t0 = Instant::now();
        let mut coordinator = MeridianFlipCoordinator::new(config(false));

        tracking_before_meridian(&mut coordinator, t0);
        let planned_due = coordinator.next_deadline();

        coordinator.set_has_capture_interface(true);
        coordinator.set_offset(30.0).unwrap();
        coordinator.set_min_flip_duration(100).unwrap();
        assert_eq!(coordinator.next_deadline(), planned_due);

        coordinator.poll(t0 + secs(18.0));
        assert_eq!(coordinator.phase(), FlipPhase::Running, "no request for this cycle");
        assert_eq!(coordinator.next_deadline(), Some(t0 + secs(18.0) + secs(20.0)));
        assert!(coordinator.config().has_capture_interface);
    }

    #[test]
    fn test_single_slew_per_cycle() {
        let t0 = Instant::now();
        let mut coordinator = MeridianFlipCoordinator::new(config(true));
        let mut events = Vec::new();

        tracking_before_meridian(&mut coordinator, t0);
        coordinator.poll(t0 + secs(18.0));
        coordinator.acknowledge_flip(t0 + secs(19.0));
        coordinator.acknowledge_flip(t0 + secs(20.0));
        for step in 0..10 {
            let now = t0 + secs(21.0 + step as f64);
            coordinator.on_mount_position(sample(0.01, PierSide::West), now);
            coordinator.poll(now);
        }
        events.extend(coordinator.drain_events());

        assert_eq!(slews(&events).len(), 1);
    }

    #[test]
    fn test_pier_side_unknown_suppresses_planning() {
        let t0 = Instant::now();
        let mut coordinator = MeridianFlipCoordinator::new(config(false));

        coordinator.on_mount_status(TrackingStatus::Tracking, t0);
        coordinator.on_mount_position(sample(0.1, PierSide::Unknown), t0);
        coordinator.on_mount_position(sample(0.2, PierSide::Unknown), t0 + secs(10.0));
        assert_eq!(coordinator.phase(), FlipPhase::None);
        assert_eq!(
            status_texts(&coordinator.drain_events()),
            vec!["Status: inactive (pier side unknown)".to_string()]
        );
        assert!(coordinator.status(t0).seconds_to_flip.is_none());
    }

    #[test]
    fn test_parked_mount_is_inactive() {
        let t0 = Instant::now();
        let mut coordinator = MeridianFlipCoordinator::new(config(false));

        coordinator.on_mount_status(TrackingStatus::Parked, t0);
        coordinator.on_mount_position(sample(0.1, PierSide::West), t0);
        assert_eq!(coordinator.phase(), FlipPhase::None);
        assert_eq!(
            status_texts(&coordinator.drain_events()),
            vec!["Status: inactive (parked)".to_string()]
        );
    }

    #[test]
    fn test_target_change_clears_error() {
        let t0 = Instant::now();
        let mut coordinator = MeridianFlipCoordinator::new(config(false));

        tracking_before_meridian(&mut coordinator, t0);
        coordinator.poll(t0 + secs(18.0));
        coordinator.on_slew_failed(1, "mount refused");
        assert_eq!(coordinator.phase(), FlipPhase::Error);
        assert_eq!(
            coordinator.failure(),
            Some(&FlipFailure::SlewRejected("mount refused".to_string()))
        );

        coordinator.on_target_changed();
        assert_eq!(coordinator.phase(), FlipPhase::None);
        assert!(coordinator.failure().is_none());
    }

    #[test]
    fn test_acknowledge_before_any_position_is_ignored() {
        let mut coordinator = MeridianFlipCoordinator::new(config(true));
        coordinator.acknowledge_flip(Instant::now());
        assert_eq!(coordinator.phase(), FlipPhase::None);
        assert!(coordinator.drain_events().is_empty());
    }

    #[test]
    fn test_planned_countdown_text() {
        let t0 = Instant::now();
        let mut coordinator = MeridianFlipCoordinator::new(FlipConfig {
            planning_lead_secs: 600.0,
            ..config(false)
        });

        coordinator.on_mount_status(TrackingStatus::Tracking, t0);
        coordinator.on_mount_position(sample(-0.1, PierSide::West), t0);
        assert_eq!(coordinator.phase(), FlipPhase::Planned);
        coordinator.drain_events();

        coordinator.on_mount_position(sample(-0.09, PierSide::West), t0 + secs(100.0));
        let texts = status_texts(&coordinator.drain_events());
        // 0.1h of hour angle is 359s, 100s elapsed
        assert_eq!(texts, vec!["Meridian flip in 00:04:19".to_string()]);
    }

    #[test]
    fn test_pier_side_reported_after_tracking() {
        let t0 = Instant::now();
        let mut coordinator = MeridianFlipCoordinator::new(config(false));

        tracking_before_meridian(&mut coordinator, t0);
        coordinator.poll(t0 + secs(18.0));
        coordinator.on_mount_status(TrackingStatus::Slewing, t0 + secs(19.0));
        coordinator.on_mount_status(TrackingStatus::Tracking, t0 + secs(25.0));
        assert_eq!(coordinator.phase(), FlipPhase::Running);

        coordinator.on_mount_position(sample(0.002, PierSide::East), t0 + secs(26.0));
        assert_eq!(coordinator.phase(), FlipPhase::Completed);
        assert!(coordinator.failure().is_none());
        assert!(coordinator.next_deadline().is_none());
    }

    #[test]
    fn test_fast_slew_without_slewing_report() {
        let t0 = Instant::now();
        let mut coordinator = MeridianFlipCoordinator::new(config(false));

        tracking_before_meridian(&mut coordinator, t0);
        coordinator.poll(t0 + secs(18.0));
        assert_eq!(coordinator.phase(), FlipPhase::Running);
        assert_eq!(coordinator.snapshot().tracking_status, TrackingStatus::Slewing);

        // driver never reports slewing
        coordinator.on_mount_position(sample(0.002, PierSide::East), t0 + secs(20.0));
        coordinator.on_mount_status(TrackingStatus::Tracking, t0 + secs(21.0));
        assert_eq!(coordinator.phase(), FlipPhase::Completed);
    }

    #[test]
    fn test_rejected_setters_keep_previous_values() {
        let t0 = Instant::now();
        let mut coordinator = MeridianFlipCoordinator::new(config(false));

        assert!(coordinator.set_min_flip_duration(0).is_err());
        assert!(coordinator.set_offset(f64::NAN).is_err());
        assert!(coordinator.set_offset(1e300).is_err());
        assert_eq!(coordinator.config().min_flip_duration_secs, 10);
        assert_eq!(coordinator.config().offset_minutes, 0.0);

        // overdue flip still gets the full timeout
        coordinator.on_mount_status(TrackingStatus::Tracking, t0);
        coordinator.on_mount_position(sample(0.3, PierSide::West), t0);
        assert_eq!(coordinator.phase(), FlipPhase::Running);
        coordinator.poll(t0 + secs(1.0));
        assert_eq!(coordinator.phase(), FlipPhase::Running);
        assert_eq!(coordinator.next_deadline(), Some(t0 + secs(20.0)));
    }

    #[test]
    fn test_disconnect_reports_no_scope() {
        let mut coordinator = MeridianFlipCoordinator::new(config(false));

        coordinator.set_mount_connected(false);
        coordinator.set_mount_connected(false);
        assert_eq!(
            status_texts(&coordinator.drain_events()),
            vec!["Status: inactive (no scope connected)".to_string()]
        );
        assert_eq!(coordinator.phase(), FlipPhase::None);
    }

    #[test]
    fn test_countdown_while_not_planned() {
        let t0 = Instant::now();
        let mut coordinator = MeridianFlipCoordinator::new(config(false));

        coordinator.on_mount_status(TrackingStatus::Tracking, t0);
        coordinator.on_mount_position(sample(-1.0, PierSide::West), t0);
        assert_eq!(coordinator.phase(), FlipPhase::None);
        // one sidereal hour is 3590s
        assert_eq!(
            status_texts(&coordinator.drain_events()),
            vec!["Meridian flip in 00:59:50".to_string()]
        );
    }

    #[test]
    fn test_capture_waiting_only_while_requested() {
        let t0 = Instant::now();
        let mut coordinator = MeridianFlipCoordinator::new(config(true));

        coordinator.on_capture_waiting();
        assert!(coordinator.drain_events().is_empty());

        tracking_before_meridian(&mut coordinator, t0);
        coordinator.poll(t0 + secs(18.0));
        assert_eq!(coordinator.phase(), FlipPhase::Requested);
        coordinator.drain_events();

        coordinator.on_capture_waiting();
        assert_eq!(
            coordinator.drain_events(),
            vec![FlipEvent::StatusText("Meridian flip waiting...".to_string())]
        );
        assert_eq!(coordinator.phase(), FlipPhase::Requested);
    }

    #[test]
    fn test_stale_slew_failure_ignored() {
        let t0 = Instant::now();
        let mut coordinator = MeridianFlipCoordinator::new(config(false));

        tracking_before_meridian(&mut coordinator, t0);
        coordinator.poll(t0 + secs(18.0));
        let first = slews(&coordinator.drain_events())[0].cycle;
        coordinator.abort_flip();

        // new cycle starts and reaches the slew
        coordinator.on_mount_status(TrackingStatus::Tracking, t0 + secs(30.0));
        coordinator.on_mount_position(sample(0.01, PierSide::West), t0 + secs(30.0));
        assert_eq!(coordinator.phase(), FlipPhase::Running);
        let second = slews(&coordinator.drain_events())[0].cycle;
        assert_ne!(first, second);

        coordinator.on_slew_failed(first, "late rejection");
        assert_eq!(coordinator.phase(), FlipPhase::Running);

        coordinator.on_slew_failed(second, "mount refused");
        assert_eq!(coordinator.phase(), FlipPhase::Error);
    }
}
