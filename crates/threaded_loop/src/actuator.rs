use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::Duration;

use nalgebra::Vector3;
use servo_core::sim::SimulatedArm;
use servo_core::{ActuationError, Actuator, Command, LatestSlot};

const IDLE_POLL: Duration = Duration::from_millis(50);

/// Loop-side handle to the actuator thread. Dispatch is a `try_send` into a
/// one-command queue, so the tick never waits on the arm.
pub struct ChannelActuator {
    commands: SyncSender<Command>,
    feedback: Arc<LatestSlot<Vector3<f64>>>,
    last_measured: Option<Vector3<f64>>,
}

impl ChannelActuator {
    pub fn new(commands: SyncSender<Command>, feedback: Arc<LatestSlot<Vector3<f64>>>) -> Self {
        Self {
            commands,
            feedback,
            last_measured: None,
        }
    }
}

impl Actuator for ChannelActuator {
    fn dispatch(&mut self, command: &Command) -> Result<(), ActuationError> {
        self.commands.try_send(*command).map_err(|e| match e {
            TrySendError::Full(_) => ActuationError::Busy,
            TrySendError::Disconnected(_) => ActuationError::Unavailable,
        })
    }

    fn measured_position(&mut self) -> Option<Vector3<f64>> {
        if let Some(latest) = self.feedback.latest() {
            self.last_measured = Some(latest.value);
        }
        self.last_measured
    }
}

/// Executes commands as they arrive and publishes the arm's position.
pub fn run_actuator_thread(
    mut arm: SimulatedArm,
    receiver: Receiver<Command>,
    feedback: Arc<LatestSlot<Vector3<f64>>>,
    shutdown: Arc<AtomicBool>,
) {
    if arm.reports_feedback() {
        feedback.publish(arm.position());
    }

    while !shutdown.load(Ordering::Relaxed) {
        match receiver.recv_timeout(IDLE_POLL) {
            Ok(command) => {
                arm.execute(command.position);
                if arm.reports_feedback() {
                    feedback.publish(arm.position());
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
