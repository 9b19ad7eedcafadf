use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nalgebra::Vector3;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{timeout, Duration};

use servo_core::sim::SimulatedArm;
use servo_core::{ActuationError, Actuator, Command, LatestSlot};

const IDLE_POLL: Duration = Duration::from_millis(50);

/// Loop-side handle to the actuator task. `try_send` keeps the tick from
/// ever awaiting the arm.
pub struct ChannelActuator {
    commands: mpsc::Sender<Command>,
    feedback: Arc<LatestSlot<Vector3<f64>>>,
    last_measured: Option<Vector3<f64>>,
}

impl ChannelActuator {
    pub fn new(commands: mpsc::Sender<Command>, feedback: Arc<LatestSlot<Vector3<f64>>>) -> Self {
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
            TrySendError::Closed(_) => ActuationError::Unavailable,
        })
    }

    fn measured_position(&mut self) -> Option<Vector3<f64>> {
        if let Some(latest) = self.feedback.latest() {
            self.last_measured = Some(latest.value);
        }
        self.last_measured
    }
}

pub async fn run_actuator_task(
    mut arm: SimulatedArm,
    mut receiver: mpsc::Receiver<Command>,
    feedback: Arc<LatestSlot<Vector3<f64>>>,
    shutdown: Arc<AtomicBool>,
) {
    if arm.reports_feedback() {
        feedback.publish(arm.position());
    }

    while !shutdown.load(Ordering::Relaxed) {
        match timeout(IDLE_POLL, receiver.recv()).await {
            Ok(Some(command)) => {
                arm.execute(command.position);
                if arm.reports_feedback() {
                    feedback.publish(arm.position());
                }
            }
            Ok(None) => break,
            Err(_) => continue,
        }
    }
}
