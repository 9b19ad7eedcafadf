use nalgebra::Vector3;

use servo_core::config::ServoConfig;
use servo_core::{
    ActuationError, Actuator, Command, ConfigError, ControlLoop, ControlMode, Latest, LoopSignal,
    OperatorCommand, RawObservation,
};

const DT: f64 = 0.02;
const TICK_NS: u64 = 20_000_000;

/// Records every dispatched command; feedback either follows the last
/// command (perfect tracking), stays fixed, or is absent.
#[derive(Default)]
struct FakeArm {
    commands: Vec<Command>,
    feedback: Option<Vector3<f64>>,
    follow: bool,
    offline: bool,
}

impl FakeArm {
    fn following(start: Vector3<f64>) -> Self {
        Self {
            feedback: Some(start),
            follow: true,
            ..Self::default()
        }
    }
}

impl Actuator for FakeArm {
    fn dispatch(&mut self, command: &Command) -> Result<(), ActuationError> {
        if self.offline {
            return Err(ActuationError::Unavailable);
        }
        if self.follow {
            self.feedback = Some(command.position);
        }
        self.commands.push(*command);
        Ok(())
    }

    fn measured_position(&mut self) -> Option<Vector3<f64>> {
        self.feedback
    }
}

fn config(mode: ControlMode) -> ServoConfig {
    let mut config = ServoConfig::default();
    config.export.on_finish = false;
    config.control_loop.initial_mode = mode;
    config.metrics.overlay_capacity = 16;
    config
}

fn observation(
    seq: u64,
    pixel_x: f64,
    pixel_y: f64,
    confidence: f64,
) -> Option<Latest<RawObservation>> {
    Some(Latest {
        seq,
        value: RawObservation {
            pixel_x,
            pixel_y,
            confidence,
            capture_timestamp: seq * TICK_NS,
        },
    })
}

fn assert_close(a: Vector3<f64>, b: Vector3<f64>) {
    assert!((a - b).norm() < 1e-12, "{a:?} != {b:?}");
}

#[test]
fn first_observation_maps_straight_through() {
    let mut control = ControlLoop::new(config(ControlMode::OpenLoop)).unwrap();
    let mut arm = FakeArm::default();

    let sample = control.tick(observation(1, 640.0, 240.0, 0.9), &mut arm, 0, DT);
    assert!(!sample.stale);
    assert_close(sample.raw_target.unwrap(), Vector3::new(0.3, 0.0, 0.5));
    assert_close(sample.command, Vector3::new(0.3, 0.0, 0.5));
    assert_eq!(arm.commands.len(), 1);
    assert_eq!(arm.commands[0].mode, ControlMode::OpenLoop);
}

#[test]
fn observation_gap_holds_target_and_command() {
    let mut control = ControlLoop::new(config(ControlMode::OpenLoop)).unwrap();
    let mut arm = FakeArm::default();

    for seq in 1..=3 {
        control.tick(observation(seq, 100.0 * seq as f64, 200.0, 0.9), &mut arm, seq * TICK_NS, DT);
    }
    let before = *control.metrics().samples().last().unwrap();

    // the slot still holds seq 3 for two ticks, then nothing at all
    let polls = [
        observation(3, 300.0, 200.0, 0.9),
        observation(3, 300.0, 200.0, 0.9),
        None,
        None,
        None,
    ];
    for (i, poll) in polls.into_iter().enumerate() {
        let sample = control.tick(poll, &mut arm, (4 + i as u64) * TICK_NS, DT);
        assert!(sample.stale);
        assert_eq!(sample.raw_target, None);
        assert_eq!(sample.target, before.target);
        assert_eq!(sample.command, before.command);
    }

    let samples = control.metrics().samples();
    assert_eq!(samples.iter().filter(|s| s.stale).count(), 5);
    assert_eq!(control.diagnostics().snapshot().stale_ticks, 5);
    assert!(arm.commands[3..].iter().all(|c| c.position == before.command));
}

#[test]
fn low_confidence_is_treated_as_missing() {
    let mut control = ControlLoop::new(config(ControlMode::OpenLoop)).unwrap();
    let mut arm = FakeArm::default();

    let held = control.tick(None, &mut arm, 0, DT);
    assert!(held.stale);
    assert_close(held.command, control.workspace_center());

    let sample = control.tick(observation(1, 0.0, 0.0, 0.2), &mut arm, TICK_NS, DT);
    assert!(sample.stale);
    assert_close(sample.command, control.workspace_center());
}

#[test]
fn commands_stay_in_bounds_for_wild_input() {
    let mut cfg = config(ControlMode::ClosedLoop);
    cfg.pid.kp = 25.0;
    cfg.pid.ki = 5.0;
    cfg.pid.kd = 1.0;
    let mut control = ControlLoop::new(cfg).unwrap();
    let mut arm = FakeArm {
        feedback: Some(Vector3::new(0.9, -0.9, 2.0)),
        ..FakeArm::default()
    };

    let pixels = [(-5000.0, 9000.0), (1e6, -1e6), (320.0, 240.0), (f64::MAX, f64::MIN)];
    for (seq, (px, py)) in pixels.iter().enumerate() {
        let sample = control.tick(observation(seq as u64 + 1, *px, *py, 1.0), &mut arm, 0, DT);
        let (min, max) = (control.config().workspace.min(), control.config().workspace.max());
        for i in 0..3 {
            assert!(sample.command[i] >= min[i] && sample.command[i] <= max[i]);
            assert!(sample.target[i] >= min[i] && sample.target[i] <= max[i]);
        }
    }
}

#[test]
fn closed_loop_tracks_constant_target() {
    let mut cfg = config(ControlMode::ClosedLoop);
    cfg.pid.kp = 1.0;
    cfg.pid.ki = 0.0;
    cfg.pid.kd = 0.0;
    cfg.metrics.settling_min_duration_secs = 0.1;
    let mut control = ControlLoop::new(cfg).unwrap();
    let mut arm = FakeArm::following(Vector3::new(-0.3, -0.3, 0.5));

    control.tick(observation(1, 480.0, 360.0, 0.95), &mut arm, 0, DT);
    for tick in 1..10 {
        control.tick(None, &mut arm, tick * TICK_NS, DT);
    }

    let errors: Vec<f64> = control
        .metrics()
        .samples()
        .iter()
        .map(|s| s.error().unwrap().norm())
        .collect();
    assert!(errors.windows(2).all(|w| w[1] <= w[0]));
    assert!(*errors.last().unwrap() < 1e-12);
    assert_eq!(control.metrics().report().settling.map(|s| s.tick_index), Some(1));
}

#[test]
fn missing_feedback_in_closed_loop_is_flagged_not_fatal() {
    let mut control = ControlLoop::new(config(ControlMode::ClosedLoop)).unwrap();
    let mut arm = FakeArm::default();

    let sample = control.tick(observation(1, 160.0, 120.0, 0.9), &mut arm, 0, DT);
    assert!(sample.feedback_missing);
    assert_eq!(sample.command, sample.target);
    assert_eq!(control.diagnostics().snapshot().degraded_ticks, 1);

    arm.feedback = Some(Vector3::new(0.0, 0.0, 0.5));
    let sample = control.tick(None, &mut arm, TICK_NS, DT);
    assert!(!sample.feedback_missing);
}

#[test]
fn unreachable_channel_drops_and_retries_with_current_command() {
    let mut control = ControlLoop::new(config(ControlMode::OpenLoop)).unwrap();
    let mut arm = FakeArm {
        offline: true,
        ..FakeArm::default()
    };

    let dropped = control.tick(observation(1, 320.0, 240.0, 0.9), &mut arm, 0, DT);
    assert!(dropped.dispatch_dropped);
    assert!(arm.commands.is_empty());

    arm.offline = false;
    let sent = control.tick(observation(2, 400.0, 240.0, 0.9), &mut arm, TICK_NS, DT);
    assert!(!sent.dispatch_dropped);
    assert_eq!(arm.commands.len(), 1);
    assert_eq!(arm.commands[0].position, sent.command);
    assert_eq!(arm.commands[0].tick_index, 1);
    assert_eq!(control.metrics().report().dispatch_dropped_ticks, 1);
}

#[test]
fn reset_recenters_and_clears_controller() {
    let mut control = ControlLoop::new(config(ControlMode::OpenLoop)).unwrap();
    let mut arm = FakeArm::default();

    control.tick(observation(1, 600.0, 50.0, 0.9), &mut arm, 0, DT);
    assert_eq!(control.handle(OperatorCommand::ResetToCenter, TICK_NS), LoopSignal::Continue);

    let held = control.tick(None, &mut arm, TICK_NS, DT);
    assert_close(held.command, control.workspace_center());

    // the next observation becomes the new baseline
    let fresh = control.tick(observation(2, 0.0, 240.0, 0.9), &mut arm, 2 * TICK_NS, DT);
    assert_close(fresh.target, Vector3::new(-0.3, 0.0, 0.5));
    assert_eq!(control.metrics().len(), 3);
}

#[test]
fn operator_inputs_update_state() {
    let mut control = ControlLoop::new(config(ControlMode::OpenLoop)).unwrap();
    let mut arm = FakeArm::default();
    control.tick(None, &mut arm, 0, DT);

    control.handle(OperatorCommand::ToggleMode, TICK_NS);
    assert_eq!(control.mode(), ControlMode::ClosedLoop);
    control.handle(OperatorCommand::SelectMode(ControlMode::ClosedLoop), TICK_NS);
    control.handle(OperatorCommand::SelectMode(ControlMode::OpenLoop), 2 * TICK_NS);
    let changes = control.metrics().mode_changes();
    assert_eq!(changes.len(), 2);
    assert_eq!(changes[0].tick_index, 1);
    assert_eq!(changes[1].to, ControlMode::OpenLoop);

    control.handle(OperatorCommand::SetKp(3.5), 0);
    control.handle(OperatorCommand::SetKi(-1.0), 0);
    control.handle(OperatorCommand::SetSmoothing(0.4), 0);
    control.handle(OperatorCommand::SetSmoothing(1.0), 0);
    assert_eq!(control.gains().kp, 3.5);
    assert_eq!(control.gains().ki, 0.1);
    assert_eq!(control.alpha(), 0.4);
    assert_eq!(control.diagnostics().snapshot().rejected_inputs, 2);

    let overlay = control.overlay();
    control.handle(OperatorCommand::ToggleDebugOverlay, 0);
    control.tick(None, &mut arm, 3 * TICK_NS, DT);
    assert_eq!(overlay.len(), 1);

    assert_eq!(control.handle(OperatorCommand::Quit, 0), LoopSignal::Quit);
}

#[test]
fn invalid_config_never_builds_a_loop() {
    let mut cfg = config(ControlMode::OpenLoop);
    cfg.workspace.y.min = 1.0;
    assert!(matches!(ControlLoop::new(cfg), Err(ConfigError::InvertedBounds { axis: 'y', .. })));

    let mut cfg = config(ControlMode::OpenLoop);
    cfg.smoothing.alpha = 1.0;
    assert!(matches!(ControlLoop::new(cfg), Err(ConfigError::SmoothingFactor(_))));
}

#[test]
fn finished_session_report_is_stable() {
    let mut control = ControlLoop::new(config(ControlMode::ClosedLoop)).unwrap();
    let mut arm = FakeArm::following(Vector3::new(0.0, 0.0, 0.5));
    for tick in 0..50u64 {
        let obs = (tick % 7 != 0)
            .then(|| observation(tick + 1, 200.0 + tick as f64, 240.0, 0.9))
            .flatten();
        control.tick(obs, &mut arm, tick * TICK_NS, DT);
    }
    let metrics = control.finish();
    assert_eq!(metrics.len(), 50);
    assert_eq!(metrics.report(), metrics.report());
    assert!(metrics.rms_error().is_some());
    assert!(metrics.smoothness().is_some());
}
