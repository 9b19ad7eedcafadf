//! Control loop driven from OS threads: the hand producer and the actuator
//! each get a thread, the tick runs on the caller's thread.

pub mod actuator;
pub mod sensor;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tracing::{info, warn};

use servo_core::sim::{SimulatedArm, SimulatedHand};
use servo_core::{
    ConfigError, ControlLoop, LatestSlot, LoopSignal, MetricsCollector, OperatorCommand,
    ServoConfig,
};

use crate::actuator::{run_actuator_thread, ChannelActuator};
use crate::sensor::run_hand_thread;

/// Runs one session until the configured duration elapses, the operator
/// quits, or `shutdown` is raised. Config errors surface before any thread
/// starts.
pub fn run_session(
    config: ServoConfig,
    operator_rx: Receiver<OperatorCommand>,
    shutdown: Arc<AtomicBool>,
) -> Result<MetricsCollector, ConfigError> {
    let mut control = ControlLoop::new(config.clone())?;
    let start_time = Instant::now();
    let workers_stop = Arc::new(AtomicBool::new(false));

    let slot = Arc::new(LatestSlot::new());
    let feedback = Arc::new(LatestSlot::new());
    let (command_tx, command_rx) = mpsc::sync_channel(1);

    let hand = SimulatedHand::new(config.simulation, &config.calibration);
    let hand_handle = {
        let slot = Arc::clone(&slot);
        let stop = Arc::clone(&workers_stop);
        let frame_period =
            std::time::Duration::from_millis(config.simulation.frame_period_ms);
        thread::spawn(move || run_hand_thread(hand, slot, frame_period, stop, start_time))
    };

    let arm = SimulatedArm::new(control.workspace_center(), &config.simulation);
    let actuator_handle = {
        let feedback = Arc::clone(&feedback);
        let stop = Arc::clone(&workers_stop);
        thread::spawn(move || run_actuator_thread(arm, command_rx, feedback, stop))
    };

    let mut actuator = ChannelActuator::new(command_tx, feedback);
    let period = config.tick_period();
    let deadline = config.session_duration().map(|d| start_time + d);
    let mut next_tick = start_time;
    let mut last_tick = start_time;

    info!(
        experiment = %config.experiment_name,
        mode = %control.mode(),
        period_ms = config.control_loop.tick_period_ms,
        "threaded session started"
    );

    'session: while !shutdown.load(Ordering::Relaxed) {
        next_tick += period;
        let now = Instant::now();
        if now < next_tick {
            thread::sleep(next_tick - now);
        } else if now - next_tick > period {
            // fell behind; drop the missed ticks instead of bursting
            next_tick = now;
        }

        let tick_start = Instant::now();
        let now_ns = tick_start.duration_since(start_time).as_nanos() as u64;

        while let Ok(command) = operator_rx.try_recv() {
            if control.handle(command, now_ns) == LoopSignal::Quit {
                break 'session;
            }
        }

        let dt = tick_start.duration_since(last_tick).as_secs_f64();
        last_tick = tick_start;
        control.tick(slot.latest(), &mut actuator, now_ns, dt);

        if deadline.is_some_and(|d| tick_start >= d) {
            break;
        }
    }

    workers_stop.store(true, Ordering::Relaxed);
    drop(actuator);
    for (name, handle) in [("hand", hand_handle), ("actuator", actuator_handle)] {
        if handle.join().is_err() {
            warn!(worker = name, "worker thread panicked");
        }
    }

    Ok(control.finish())
}

/// Unattended session for benchmarks: no operator input, runs for the
/// configured duration.
pub fn run_experiment(config: ServoConfig) -> Result<MetricsCollector, ConfigError> {
    let (_operator_tx, operator_rx) = mpsc::channel();
    run_session(config, operator_rx, Arc::new(AtomicBool::new(false)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use servo_core::ControlMode;

    fn short_config() -> ServoConfig {
        let mut config = ServoConfig::default();
        config.duration_secs = 1;
        config.control_loop.tick_period_ms = 10;
        config.export.on_finish = false;
        config
    }

    #[test]
    fn runs_until_duration_elapses() {
        let metrics = run_experiment(short_config()).unwrap();
        assert!(metrics.len() > 10);
        let ticks: Vec<u64> = metrics.samples().iter().map(|s| s.tick_index).collect();
        assert!(ticks.windows(2).all(|w| w[1] == w[0] + 1));
        let bounds = short_config().workspace;
        for s in metrics.samples() {
            for i in 0..3 {
                assert!(s.command[i] >= bounds.min()[i] && s.command[i] <= bounds.max()[i]);
            }
        }
    }

    #[test]
    fn operator_quit_ends_session_early() {
        let mut config = short_config();
        config.duration_secs = 30;
        let (tx, rx) = mpsc::channel();
        tx.send(OperatorCommand::SelectMode(ControlMode::ClosedLoop)).unwrap();
        tx.send(OperatorCommand::Quit).unwrap();

        let started = Instant::now();
        let metrics = run_session(config, rx, Arc::new(AtomicBool::new(false))).unwrap();
        assert!(started.elapsed().as_secs() < 5);
        assert_eq!(metrics.mode_changes().len(), 1);
    }

    #[test]
    fn invalid_config_fails_before_start() {
        let mut config = short_config();
        config.pid.integral_limit = 0.0;
        assert!(matches!(run_experiment(config), Err(ConfigError::IntegralLimit(_))));
    }
}
