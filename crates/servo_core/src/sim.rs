//! Stand-ins for the camera/detector and the robot so a session can run
//! without hardware. Both are deterministic.

use std::f64::consts::TAU;

use nalgebra::Vector3;

use crate::config::{CalibrationConfig, SimulationConfig, Trajectory};
use crate::driver::Actuator;
use crate::error::ActuationError;
use crate::{Command, RawObservation};

const CIRCLE_HZ: f64 = 0.25;
const STEP_HOLD_SECS: f64 = 2.0;
const DETECTED_CONFIDENCE: f64 = 0.95;
const DROPOUT_CONFIDENCE: f64 = 0.3;

/// Synthetic hand detector tracing a trajectory in pixel space.
#[derive(Debug, Clone)]
pub struct SimulatedHand {
    config: SimulationConfig,
    center: (f64, f64),
    extent: (f64, f64),
    frame: u64,
}

impl SimulatedHand {
    pub fn new(config: SimulationConfig, calibration: &CalibrationConfig) -> Self {
        let (x, y) = (calibration.x, calibration.y);
        Self {
            config,
            center: ((x.pixel_min + x.pixel_max) / 2.0, (y.pixel_min + y.pixel_max) / 2.0),
            extent: (x.pixel_max - x.pixel_min, y.pixel_max - y.pixel_min),
            frame: 0,
        }
    }

    /// Detection for the frame captured at `timestamp` (ns since start).
    /// Dropout frames alternate between "no hand" and a low-confidence hit.
    pub fn next_observation(&mut self, timestamp: u64) -> Option<RawObservation> {
        let frame = self.frame;
        self.frame += 1;

        let t = timestamp as f64 / 1e9;
        let (px, py) = self.trajectory_point(t);
        let jitter = self.config.jitter_px;
        let pixel_x = px + jitter * noise(frame * 2);
        let pixel_y = py + jitter * noise(frame * 2 + 1);

        let every = self.config.detection_dropout_every;
        let confidence = if every > 0 && frame % every == every - 1 {
            if (frame / every) % 2 == 0 {
                return None;
            }
            DROPOUT_CONFIDENCE
        } else {
            DETECTED_CONFIDENCE
        };

        Some(RawObservation {
            pixel_x,
            pixel_y,
            confidence,
            capture_timestamp: timestamp,
        })
    }

    fn trajectory_point(&self, t: f64) -> (f64, f64) {
        let (cx, cy) = self.center;
        let (w, h) = self.extent;
        match self.config.trajectory {
            Trajectory::Circle => {
                let radius = 0.35 * w.min(h);
                let angle = TAU * CIRCLE_HZ * t;
                (cx + radius * angle.cos(), cy + radius * angle.sin())
            }
            Trajectory::Step => {
                let side = if ((t / STEP_HOLD_SECS) as u64) % 2 == 0 { -1.0 } else { 1.0 };
                (cx + side * w / 4.0, cy + side * h / 6.0)
            }
        }
    }
}

// Cheap hash noise in [-1, 1].
fn noise(n: u64) -> f64 {
    let v = ((n as f64) * 12.9898).sin() * 43_758.545_3;
    (v - v.floor()) * 2.0 - 1.0
}

/// First-order arm: each executed command moves it a fixed fraction of the
/// way to the commanded position.
#[derive(Debug, Clone)]
pub struct SimulatedArm {
    position: Vector3<f64>,
    response: f64,
    report_feedback: bool,
}

impl SimulatedArm {
    pub fn new(home: Vector3<f64>, config: &SimulationConfig) -> Self {
        Self {
            position: home,
            response: config.arm_response,
            report_feedback: config.report_feedback,
        }
    }

    pub fn execute(&mut self, target: Vector3<f64>) {
        self.position += (target - self.position) * self.response;
    }

    pub fn position(&self) -> Vector3<f64> {
        self.position
    }

    pub fn reports_feedback(&self) -> bool {
        self.report_feedback
    }
}

impl Actuator for SimulatedArm {
    fn dispatch(&mut self, command: &Command) -> Result<(), ActuationError> {
        self.execute(command.position);
        Ok(())
    }

    fn measured_position(&mut self) -> Option<Vector3<f64>> {
        self.report_feedback.then_some(self.position)
    }
}
