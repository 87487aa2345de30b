//! Async host for the coordinator
//!
//! One tokio task owns the [`MeridianFlipCoordinator`]. Inputs arrive over a
//! bounded command channel, outputs go out on a broadcast channel, and mount
//! commands are issued from short-lived tasks whose failures are fed back into
//! the loop. Because only the task touches the coordinator, no locking is
//! needed and a cancelled timer can never fire into a later cycle.

use crate::config::FlipConfig;
use crate::coordinator::{FlipEvent, FlipStatus, MeridianFlipCoordinator, SlewCommand};
use crate::error::{FlipError, FlipResult};
use crate::mount::{PositionSample, SharedMountOps, TrackingStatus};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;

const COMMAND_BUFFER: usize = 32;

/// Commands accepted by the service task
#[derive(Debug)]
pub enum FlipCommand {
    SetEnabled(bool),
    SetOffset(f64),
    SetHasCaptureInterface(bool),
    SetMinFlipDuration(u32),
    MountPosition(PositionSample),
    MountStatus(TrackingStatus),
    MountConnected(bool),
    TargetChanged,
    CaptureWaiting,
    AcknowledgeFlip,
    AbortFlip,
    Status(oneshot::Sender<FlipStatus>),
    Shutdown,
}

/// Results of mount commands, reported back to the loop
#[derive(Debug)]
enum MountFeedback {
    SlewFailed { cycle: u64, reason: String },
}

pub struct FlipService;

impl FlipService {
    /// Validate the configuration and start the service task.
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: FlipConfig, mount: SharedMountOps) -> FlipResult<FlipHandle> {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, _) = broadcast::channel(config.event_buffer);
        let (feedback_tx, feedback_rx) = mpsc::unbounded_channel();

        tracing::info!(
            "Starting meridian flip service (enabled={}, offset={:.2}min, capture={})",
            config.enabled,
            config.offset_minutes,
            config.has_capture_interface
        );

        let task = FlipTask {
            acknowledgment_timeout: config.acknowledgment_timeout(),
            coordinator: MeridianFlipCoordinator::new(config),
            mount,
            event_tx: event_tx.clone(),
            feedback_tx,
        };
        tokio::spawn(task.run(command_rx, feedback_rx));

        Ok(FlipHandle { command_tx, event_tx })
    }
}

struct FlipTask {
    coordinator: MeridianFlipCoordinator,
    mount: SharedMountOps,
    event_tx: broadcast::Sender<FlipEvent>,
    feedback_tx: mpsc::UnboundedSender<MountFeedback>,
    acknowledgment_timeout: Option<Duration>,
}

impl FlipTask {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<FlipCommand>,
        mut feedback: mpsc::UnboundedReceiver<MountFeedback>,
    ) {
        loop {
            let wakeup = self.next_wakeup();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(FlipCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(result) = feedback.recv() => self.handle_feedback(result),
                _ = sleep_until(wakeup) => {}
            }

            let now = Instant::now();
            self.coordinator.poll(now);
            self.flush();
            self.check_acknowledgment(now);
        }
        tracing::info!("Meridian flip service stopped");
    }

    fn handle_command(&mut self, command: FlipCommand) {
        let now = Instant::now();
        match command {
            FlipCommand::SetEnabled(enabled) => self.coordinator.set_enabled(enabled),
            FlipCommand::SetOffset(minutes) => {
                let _ = self.coordinator.set_offset(minutes);
            }
            FlipCommand::SetHasCaptureInterface(present) => {
                self.coordinator.set_has_capture_interface(present)
            }
            FlipCommand::SetMinFlipDuration(secs) => {
                let _ = self.coordinator.set_min_flip_duration(secs);
            }
            FlipCommand::MountPosition(sample) => self.coordinator.on_mount_position(sample, now),
            FlipCommand::MountStatus(status) => self.coordinator.on_mount_status(status, now),
            FlipCommand::MountConnected(connected) => {
                self.coordinator.set_mount_connected(connected)
            }
            FlipCommand::TargetChanged => self.coordinator.on_target_changed(),
            FlipCommand::CaptureWaiting => self.coordinator.on_capture_waiting(),
            FlipCommand::AcknowledgeFlip => self.coordinator.acknowledge_flip(now),
            FlipCommand::AbortFlip => self.coordinator.abort_flip(),
            FlipCommand::Status(reply) => {
                let _ = reply.send(self.coordinator.status(now));
            }
            FlipCommand::Shutdown => {}
        }
    }

    fn handle_feedback(&mut self, feedback: MountFeedback) {
        match feedback {
            MountFeedback::SlewFailed { cycle, reason } => {
                self.coordinator.on_slew_failed(cycle, reason)
            }
        }
    }

    /// Earliest of the coordinator deadline and the acknowledgment ceiling
    fn next_wakeup(&self) -> Option<Instant> {
        let ceiling = match (self.coordinator.pending_request_since(), self.acknowledgment_timeout) {
            (Some(since), Some(limit)) => Some(since + limit),
            _ => None,
        };
        match (self.coordinator.next_deadline(), ceiling) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn check_acknowledgment(&mut self, now: Instant) {
        let (Some(since), Some(limit)) =
            (self.coordinator.pending_request_since(), self.acknowledgment_timeout)
        else {
            return;
        };
        if now.saturating_duration_since(since) < limit {
            return;
        }

        tracing::warn!(
            "Capture did not acknowledge the meridian flip request within {}s, aborting",
            limit.as_secs()
        );
        self.emit(FlipEvent::StatusText(
            "Meridian flip request not acknowledged".to_string(),
        ));
        self.coordinator.abort_flip();
        self.flush();
    }

    /// Publish queued coordinator events, forwarding mount commands
    fn flush(&mut self) {
        for event in self.coordinator.drain_events() {
            match &event {
                FlipEvent::Slew(command) => self.issue_slew(*command),
                FlipEvent::AbortSlew => self.issue_abort(),
                _ => {}
            }
            self.emit(event);
        }
    }

    fn issue_slew(&self, command: SlewCommand) {
        let mount = self.mount.clone();
        let feedback = self.feedback_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = mount
                .slew_to_coordinates(command.ra_hours, command.dec_degrees)
                .await
            {
                tracing::error!("{}", FlipError::MountCommand(e.clone()));
                let _ = feedback.send(MountFeedback::SlewFailed {
                    cycle: command.cycle,
                    reason: e,
                });
            }
        });
    }

    fn issue_abort(&self) {
        let mount = self.mount.clone();
        tokio::spawn(async move {
            if let Err(e) = mount.abort_slew().await {
                tracing::error!("{}", FlipError::MountCommand(e));
            }
        });
    }

    fn emit(&self, event: FlipEvent) {
        let _ = self.event_tx.send(event);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Handle to a running [`FlipService`]
#[derive(Clone)]
pub struct FlipHandle {
    command_tx: mpsc::Sender<FlipCommand>,
    event_tx: broadcast::Sender<FlipEvent>,
}

impl FlipHandle {
    async fn send(&self, command: FlipCommand) -> FlipResult<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| FlipError::ServiceStopped)
    }

    pub async fn set_enabled(&self, enabled: bool) -> FlipResult<()> {
        self.send(FlipCommand::SetEnabled(enabled)).await
    }

    /// Out-of-range offsets are rejected here and never reach the service
    pub async fn set_offset(&self, minutes: f64) -> FlipResult<()> {
        FlipConfig::check_offset(minutes)?;
        self.send(FlipCommand::SetOffset(minutes)).await
    }

    pub async fn set_has_capture_interface(&self, present: bool) -> FlipResult<()> {
        self.send(FlipCommand::SetHasCaptureInterface(present)).await
    }

    pub async fn set_min_flip_duration(&self, secs: u32) -> FlipResult<()> {
        FlipConfig::check_min_flip_duration(secs)?;
        self.send(FlipCommand::SetMinFlipDuration(secs)).await
    }

    /// Forward a position report from the mount driver
    pub async fn mount_position(&self, sample: PositionSample) -> FlipResult<()> {
        self.send(FlipCommand::MountPosition(sample)).await
    }

    /// Forward a tracking status report from the mount driver
    pub async fn mount_status(&self, status: TrackingStatus) -> FlipResult<()> {
        self.send(FlipCommand::MountStatus(status)).await
    }

    pub async fn set_mount_connected(&self, connected: bool) -> FlipResult<()> {
        self.send(FlipCommand::MountConnected(connected)).await
    }

    pub async fn target_changed(&self) -> FlipResult<()> {
        self.send(FlipCommand::TargetChanged).await
    }

    /// Capture is finishing its exposure before pausing
    pub async fn capture_waiting(&self) -> FlipResult<()> {
        self.send(FlipCommand::CaptureWaiting).await
    }

    /// Capture is paused, go ahead with the flip
    pub async fn acknowledge_flip(&self) -> FlipResult<()> {
        self.send(FlipCommand::AcknowledgeFlip).await
    }

    pub async fn abort_flip(&self) -> FlipResult<()> {
        self.send(FlipCommand::AbortFlip).await
    }

    pub async fn status(&self) -> FlipResult<FlipStatus> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(FlipCommand::Status(reply_tx)).await?;
        reply_rx.await.map_err(|_| FlipError::ServiceStopped)
    }

    /// Subscribe to coordinator events
    pub fn subscribe(&self) -> broadcast::Receiver<FlipEvent> {
        self.event_tx.subscribe()
    }

    /// Stop the service task and wait until it is gone
    pub async fn shutdown(&self) -> FlipResult<()> {
        self.send(FlipCommand::Shutdown).await?;
        self.command_tx.closed().await;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        !self.command_tx.is_closed()
    }
}
