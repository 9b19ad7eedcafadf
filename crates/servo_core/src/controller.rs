//! Open-loop / closed-loop control state machine.

use nalgebra::Vector3;
use tracing::info;

use crate::config::PidConfig;
use crate::error::ConfigError;
use crate::mapping::SafetyClamp;
use crate::pid::{PidController, PidGains};
use crate::{ControlMode, SmoothedTarget};

#[derive(Debug, Clone)]
enum ModeState {
    OpenLoop,
    ClosedLoop(PidController),
}

/// Result of one controller step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutput {
    pub position: Vector3<f64>,
    /// Closed loop ran without a measured position and fell back to pass-through.
    pub feedback_missing: bool,
}

#[derive(Debug, Clone)]
pub struct Controller {
    state: ModeState,
    gains: PidGains,
    pid_config: PidConfig,
    clamp: SafetyClamp,
}

impl Controller {
    pub fn new(mode: ControlMode, pid_config: &PidConfig, clamp: SafetyClamp) -> Self {
        let mut controller = Self {
            state: ModeState::OpenLoop,
            gains: PidGains::from(pid_config),
            pid_config: *pid_config,
            clamp,
        };
        controller.state = controller.fresh_state(mode);
        controller
    }

    pub fn mode(&self) -> ControlMode {
        match self.state {
            ModeState::OpenLoop => ControlMode::OpenLoop,
            ModeState::ClosedLoop(_) => ControlMode::ClosedLoop,
        }
    }

    /// Switches mode with fresh accumulators. Selecting the active mode is a no-op.
    pub fn set_mode(&mut self, mode: ControlMode) -> bool {
        if mode == self.mode() {
            return false;
        }
        info!(from = %self.mode(), to = %mode, "control mode switched");
        self.state = self.fresh_state(mode);
        true
    }

    /// Clears integral and previous error without changing mode.
    pub fn reset(&mut self) {
        if let ModeState::ClosedLoop(pid) = &mut self.state {
            pid.reset();
        }
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    /// New gains apply from the next step; integral state is kept.
    pub fn set_gains(&mut self, gains: PidGains) -> Result<(), ConfigError> {
        gains.validate()?;
        self.gains = gains;
        Ok(())
    }

    pub fn pid(&self) -> Option<&PidController> {
        match &self.state {
            ModeState::ClosedLoop(pid) => Some(pid),
            ModeState::OpenLoop => None,
        }
    }

    pub fn step(
        &mut self,
        target: &SmoothedTarget,
        measured: Option<Vector3<f64>>,
        dt: f64,
    ) -> StepOutput {
        match (&mut self.state, measured) {
            (ModeState::OpenLoop, _) => StepOutput {
                position: target.position,
                feedback_missing: false,
            },
            (ModeState::ClosedLoop(_), None) => StepOutput {
                position: target.position,
                feedback_missing: true,
            },
            (ModeState::ClosedLoop(pid), Some(measured)) => {
                let error = target.position - measured;
                let correction = pid.compute(&self.gains, error, dt);
                StepOutput {
                    position: self.clamp.clamp_position(measured + correction),
                    feedback_missing: false,
                }
            }
        }
    }

    fn fresh_state(&self, mode: ControlMode) -> ModeState {
        match mode {
            ControlMode::OpenLoop => ModeState::OpenLoop,
            ControlMode::ClosedLoop => ModeState::ClosedLoop(PidController::new(&self.pid_config)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkspaceBounds;

    const DT: f64 = 0.02;

    fn controller(mode: ControlMode, kp: f64, ki: f64, kd: f64) -> Controller {
        let pid = PidConfig {
            kp,
            ki,
            kd,
            ..PidConfig::default()
        };
        Controller::new(mode, &pid, SafetyClamp::new(WorkspaceBounds::default()))
    }

    fn target(x: f64, y: f64, tick_index: u64) -> SmoothedTarget {
        SmoothedTarget {
            position: Vector3::new(x, y, 0.5),
            tick_index,
        }
    }

    #[test]
    fn open_loop_passes_target_through() {
        let mut c = controller(ControlMode::OpenLoop, 2.0, 0.1, 0.05);
        for (i, measured) in [None, Some(Vector3::new(0.3, -0.3, 0.4)), Some(Vector3::zeros())]
            .into_iter()
            .enumerate()
        {
            let t = target(0.1 * i as f64, -0.05, i as u64);
            let out = c.step(&t, measured, DT);
            assert_eq!(out.position, t.position);
            assert!(!out.feedback_missing);
        }
    }

    #[test]
    fn proportional_loop_with_perfect_feedback_converges() {
        let mut c = controller(ControlMode::ClosedLoop, 1.0, 0.0, 0.0);
        let t = target(0.2, -0.1, 0);
        let mut measured = Vector3::new(0.0, 0.0, 0.5);
        let mut last_error = f64::INFINITY;
        for _ in 0..10 {
            let err = (t.position - measured).norm();
            assert!(err <= last_error);
            last_error = err;
            measured = c.step(&t, Some(measured), DT).position;
        }
        assert!((t.position - measured).norm() < 1e-12);
    }

    #[test]
    fn closed_loop_output_is_clamped() {
        let mut c = controller(ControlMode::ClosedLoop, 10.0, 0.0, 0.0);
        let out = c.step(&target(0.3, 0.3, 0), Some(Vector3::new(-0.3, -0.3, 0.5)), DT);
        assert_eq!(out.position, Vector3::new(0.3, 0.3, 0.5));
    }

    #[test]
    fn missing_feedback_degrades_to_pass_through() {
        let mut c = controller(ControlMode::ClosedLoop, 2.0, 0.5, 0.1);
        let t = target(0.1, 0.1, 0);
        let out = c.step(&t, None, DT);
        assert_eq!(out.position, t.position);
        assert!(out.feedback_missing);
        assert_eq!(c.pid().unwrap().integral(), Vector3::zeros());
    }

    #[test]
    fn mode_round_trip_matches_fresh_start() {
        let inputs: Vec<(SmoothedTarget, Vector3<f64>)> = (0..8)
            .map(|i| {
                let f = i as f64;
                (target(0.02 * f, -0.01 * f, i), Vector3::new(0.01 * f, 0.0, 0.5))
            })
            .collect();
        let run = |c: &mut Controller| -> Vec<Vector3<f64>> {
            inputs.iter().map(|(t, m)| c.step(t, Some(*m), DT).position).collect()
        };

        let mut fresh = controller(ControlMode::ClosedLoop, 1.5, 0.4, 0.05);
        let expected = run(&mut fresh);

        let mut switched = controller(ControlMode::ClosedLoop, 1.5, 0.4, 0.05);
        run(&mut switched);
        assert!(switched.set_mode(ControlMode::OpenLoop));
        switched.step(&target(0.3, 0.3, 99), Some(Vector3::zeros()), DT);
        assert!(switched.set_mode(ControlMode::ClosedLoop));
        assert_eq!(run(&mut switched), expected);
    }

    #[test]
    fn gain_change_keeps_integral() {
        let mut c = controller(ControlMode::ClosedLoop, 1.0, 1.0, 0.0);
        c.step(&target(0.1, 0.0, 0), Some(Vector3::new(0.0, 0.0, 0.5)), DT);
        let before = c.pid().unwrap().integral();
        c.set_gains(PidGains {
            kp: 3.0,
            ki: 0.2,
            kd: 0.0,
        })
        .unwrap();
        assert_eq!(c.pid().unwrap().integral(), before);
        assert_eq!(c.gains().kp, 3.0);
        let negative = PidGains {
            kp: -1.0,
            ki: 0.0,
            kd: 0.0,
        };
        assert!(c.set_gains(negative).is_err());
        assert_eq!(c.gains().kp, 3.0);
    }

    #[test]
    fn selecting_active_mode_keeps_state() {
        let mut c = controller(ControlMode::ClosedLoop, 1.0, 1.0, 0.0);
        c.step(&target(0.1, 0.0, 0), Some(Vector3::new(0.0, 0.0, 0.5)), DT);
        assert!(!c.set_mode(ControlMode::ClosedLoop));
        assert_ne!(c.pid().unwrap().integral(), Vector3::zeros());
        c.reset();
        assert_eq!(c.pid().unwrap().integral(), Vector3::zeros());
    }
}
