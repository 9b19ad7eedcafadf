//! Control loop on tokio: hand producer and actuator run as tasks, the tick
//! is paced by an interval that skips missed ticks.

pub mod actuator;
pub mod sensor;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::{info, warn};

use servo_core::sim::{SimulatedArm, SimulatedHand};
use servo_core::{
    ConfigError, ControlLoop, LatestSlot, LoopSignal, MetricsCollector, OperatorCommand,
    ServoConfig,
};

use crate::actuator::{run_actuator_task, ChannelActuator};
use crate::sensor::run_hand_task;

pub async fn run_session(
    config: ServoConfig,
    mut operator_rx: mpsc::UnboundedReceiver<OperatorCommand>,
    shutdown: Arc<AtomicBool>,
) -> Result<MetricsCollector, ConfigError> {
    let mut control = ControlLoop::new(config.clone())?;
    let start_time = Instant::now();
    let workers_stop = Arc::new(AtomicBool::new(false));

    let slot = Arc::new(LatestSlot::new());
    let feedback = Arc::new(LatestSlot::new());
    let (command_tx, command_rx) = mpsc::channel(1);

    let hand = SimulatedHand::new(config.simulation, &config.calibration);
    let frame_period = Duration::from_millis(config.simulation.frame_period_ms);
    let hand_task = tokio::spawn(run_hand_task(
        hand,
        Arc::clone(&slot),
        frame_period,
        Arc::clone(&workers_stop),
        start_time,
    ));

    let arm = SimulatedArm::new(control.workspace_center(), &config.simulation);
    let actuator_task = tokio::spawn(run_actuator_task(
        arm,
        command_rx,
        Arc::clone(&feedback),
        Arc::clone(&workers_stop),
    ));

    let mut actuator = ChannelActuator::new(command_tx, feedback);
    let period = config.tick_period();
    let deadline = config.session_duration().map(|d| start_time + d);
    let mut ticks = interval_at(start_time + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_tick = start_time;

    info!(
        experiment = %config.experiment_name,
        mode = %control.mode(),
        period_ms = config.control_loop.tick_period_ms,
        "async session started"
    );

    'session: while !shutdown.load(Ordering::Relaxed) {
        let tick_start = ticks.tick().await;
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
    for (name, task) in [("hand", hand_task), ("actuator", actuator_task)] {
        if let Err(e) = task.await {
            warn!(worker = name, error = %e, "worker task failed");
        }
    }

    Ok(control.finish())
}

pub async fn run_experiment(config: ServoConfig) -> Result<MetricsCollector, ConfigError> {
    let (_operator_tx, operator_rx) = mpsc::unbounded_channel();
    run_session(config, operator_rx, Arc::new(AtomicBool::new(false))).await
}
