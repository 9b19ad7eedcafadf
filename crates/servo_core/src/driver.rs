//! The per-tick pipeline shared by the threaded and async drivers.
//!
//! A driver owns the cadence and the collaborators; each tick it hands over
//! whatever the observation slot holds and the loop runs
//! mapper -> clamp -> filter -> controller -> dispatch, recording one sample.
//! Nothing in here blocks.

use std::path::PathBuf;
use std::sync::Arc;

use nalgebra::Vector3;
use tracing::{debug, info, warn};

use crate::config::ServoConfig;
use crate::controller::Controller;
use crate::dashboard::{DebugOverlay, TickSnapshot};
use crate::diagnostics::SharedDiagnostics;
use crate::error::{ActuationError, ConfigError, ExportError};
use crate::export::SessionExporter;
use crate::filter::SmoothingFilter;
use crate::mapping::{CoordinateMapper, SafetyClamp};
use crate::metrics::{MetricSample, MetricsCollector, ModeChange};
use crate::pid::PidGains;
use crate::slot::Latest;
use crate::{Command, ControlMode, OperatorCommand, RawObservation, SmoothedTarget};

/// The robot side of the loop.
pub trait Actuator {
    /// Hands a command over without waiting for it to execute.
    fn dispatch(&mut self, command: &Command) -> Result<(), ActuationError>;

    /// Latest measured end-effector position, if the channel reports one.
    fn measured_position(&mut self) -> Option<Vector3<f64>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopSignal {
    Continue,
    Quit,
}

pub struct ControlLoop {
    config: ServoConfig,
    mapper: CoordinateMapper,
    clamp: SafetyClamp,
    filter: SmoothingFilter,
    controller: Controller,
    metrics: MetricsCollector,
    overlay: DebugOverlay,
    diagnostics: Arc<SharedDiagnostics>,
    exporter: SessionExporter,
    tick_index: u64,
    last_seq: Option<u64>,
    degraded: bool,
    dispatch_failing: bool,
}

impl ControlLoop {
    /// Validates `config`; an invalid config never produces a loop.
    pub fn new(config: ServoConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let clamp = SafetyClamp::new(config.workspace);
        let session_name = format!(
            "{}_{}",
            config.experiment_name,
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        );

        Ok(Self {
            mapper: CoordinateMapper::new(config.calibration),
            clamp,
            filter: SmoothingFilter::new(config.smoothing.alpha)?,
            controller: Controller::new(config.control_loop.initial_mode, &config.pid, clamp),
            metrics: MetricsCollector::new(&config.metrics),
            overlay: DebugOverlay::new(config.metrics.overlay_capacity),
            diagnostics: Arc::new(SharedDiagnostics::default()),
            exporter: SessionExporter::new(&config.export.output_dir, Some(session_name)),
            tick_index: 0,
            last_seq: None,
            degraded: false,
            dispatch_failing: false,
            config,
        })
    }

    pub fn config(&self) -> &ServoConfig {
        &self.config
    }

    pub fn mode(&self) -> ControlMode {
        self.controller.mode()
    }

    pub fn gains(&self) -> PidGains {
        self.controller.gains()
    }

    pub fn alpha(&self) -> f64 {
        self.filter.alpha()
    }

    pub fn tick_index(&self) -> u64 {
        self.tick_index
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn overlay(&self) -> DebugOverlay {
        self.overlay.clone()
    }

    pub fn diagnostics(&self) -> Arc<SharedDiagnostics> {
        Arc::clone(&self.diagnostics)
    }

    pub fn workspace_center(&self) -> Vector3<f64> {
        self.config.workspace.center()
    }

    /// Applies one operator input. `now` is nanoseconds since session start.
    pub fn handle(&mut self, command: OperatorCommand, now: u64) -> LoopSignal {
        match command {
            OperatorCommand::Quit => {
                info!(tick = self.tick_index, "quit requested");
                return LoopSignal::Quit;
            }
            OperatorCommand::ToggleDebugOverlay => {
                let enabled = self.overlay.toggle();
                info!(enabled, "debug overlay toggled");
            }
            OperatorCommand::ResetToCenter => {
                self.filter.reset_to(self.workspace_center());
                self.controller.reset();
                info!(tick = self.tick_index, "reset to workspace center");
            }
            OperatorCommand::ToggleMode => {
                let next = self.mode().toggled();
                self.switch_mode(next, now);
            }
            OperatorCommand::SelectMode(mode) => self.switch_mode(mode, now),
            OperatorCommand::SetKp(kp) => self.retune(PidGains { kp, ..self.gains() }),
            OperatorCommand::SetKi(ki) => self.retune(PidGains { ki, ..self.gains() }),
            OperatorCommand::SetKd(kd) => self.retune(PidGains { kd, ..self.gains() }),
            OperatorCommand::SetSmoothing(alpha) => match self.filter.set_alpha(alpha) {
                Ok(()) => info!(alpha, "smoothing factor updated"),
                Err(e) => self.reject(e),
            },
            OperatorCommand::Export => {
                if let Err(e) = self.export() {
                    warn!(error = %e, "export failed");
                }
            }
        }
        LoopSignal::Continue
    }

    /// Runs one control tick.
    ///
    /// `observation` is whatever the slot held at poll time. A value already
    /// consumed, a missing value, or one below the confidence threshold all
    /// mark the tick stale and hold the previous smoothed target.
    pub fn tick<A>(
        &mut self,
        observation: Option<Latest<RawObservation>>,
        actuator: &mut A,
        now: u64,
        dt: f64,
    ) -> MetricSample
    where
        A: Actuator + ?Sized,
    {
        let tick_index = self.tick_index;
        let fresh = self.take_fresh(observation);
        let stale = fresh.is_none();

        let (raw_target, smoothed) = match fresh {
            Some(obs) => {
                let mapped = self.mapper.map(obs.pixel_x, obs.pixel_y, obs.capture_timestamp);
                let target = self.clamp.clamp(mapped);
                (Some(target.position), self.filter.update(&target, tick_index))
            }
            None => {
                self.diagnostics.record_stale();
                let held = self.filter.current().unwrap_or_else(|| self.workspace_center());
                let held = SmoothedTarget {
                    position: held,
                    tick_index,
                };
                (None, held)
            }
        };

        let measured = actuator.measured_position();
        let step = self.controller.step(&smoothed, measured, dt);
        self.note_degraded(step.feedback_missing);

        let command = Command {
            position: step.position,
            tick_index,
            mode: self.mode(),
        };
        let dispatch_dropped = match actuator.dispatch(&command) {
            Ok(()) => {
                self.note_dispatch(None);
                false
            }
            Err(e) => {
                self.note_dispatch(Some(e));
                true
            }
        };

        let sample = MetricSample {
            tick_index,
            timestamp: now,
            dt,
            mode: command.mode,
            raw_target,
            target: smoothed.position,
            command: command.position,
            measured,
            stale,
            feedback_missing: step.feedback_missing,
            dispatch_dropped,
        };
        self.metrics.record(sample);

        if self.overlay.is_enabled() {
            let snapshot = TickSnapshot {
                tick_index,
                timestamp: now,
                mode: sample.mode,
                target: sample.target,
                command: sample.command,
                measured,
                stale,
                feedback_missing: step.feedback_missing,
                dispatch_dropped,
            };
            info!(
                tick = tick_index,
                mode = %sample.mode,
                target = ?sample.target.as_slice(),
                command = ?sample.command.as_slice(),
                error = ?snapshot.error(),
                stale,
                "overlay"
            );
            self.overlay.add(snapshot);
        }

        self.tick_index += 1;
        sample
    }

    pub fn export(&self) -> Result<PathBuf, ExportError> {
        self.exporter.export(&self.config.experiment_name, &self.metrics)
    }

    /// Ends the session, exporting if configured, and hands back the samples.
    pub fn finish(self) -> MetricsCollector {
        let report = self.metrics.report();
        let counters = self.diagnostics.snapshot();
        info!(
            ticks = report.total_ticks,
            stale = counters.stale_ticks,
            degraded = counters.degraded_ticks,
            dropped = counters.dropped_dispatches,
            rejected_inputs = counters.rejected_inputs,
            rms_error = ?report.rms_error,
            "session finished"
        );
        if self.config.export.on_finish {
            if let Err(e) = self.export() {
                warn!(error = %e, "final export failed");
            }
        }
        self.metrics
    }

    fn take_fresh(
        &mut self,
        observation: Option<Latest<RawObservation>>,
    ) -> Option<RawObservation> {
        let latest = observation?;
        if self.last_seq == Some(latest.seq) {
            return None;
        }
        self.last_seq = Some(latest.seq);
        let threshold = self.config.control_loop.confidence_threshold;
        (latest.value.confidence >= threshold).then_some(latest.value)
    }

    fn switch_mode(&mut self, mode: ControlMode, now: u64) {
        let from = self.mode();
        if self.controller.set_mode(mode) {
            self.degraded = false;
            self.metrics.record_mode_change(ModeChange {
                tick_index: self.tick_index,
                timestamp: now,
                from,
                to: mode,
            });
        }
    }

    fn retune(&mut self, gains: PidGains) {
        match self.controller.set_gains(gains) {
            Ok(()) => info!(kp = gains.kp, ki = gains.ki, kd = gains.kd, "gains updated"),
            Err(e) => self.reject(e),
        }
    }

    fn reject(&self, error: ConfigError) {
        self.diagnostics.record_rejected_input();
        warn!(error = %error, "operator input rejected");
    }

    fn note_degraded(&mut self, feedback_missing: bool) {
        if feedback_missing {
            self.diagnostics.record_degraded();
            if !self.degraded {
                warn!(tick = self.tick_index, "no feedback, closed loop running as open loop");
            }
        } else if self.degraded {
            info!(tick = self.tick_index, "feedback restored");
        }
        self.degraded = feedback_missing;
    }

    fn note_dispatch(&mut self, failure: Option<ActuationError>) {
        match failure {
            Some(e) => {
                self.diagnostics.record_dropped_dispatch();
                if self.dispatch_failing {
                    debug!(tick = self.tick_index, error = %e, "command dropped");
                } else {
                    warn!(tick = self.tick_index, error = %e, "command dropped");
                }
                self.dispatch_failing = true;
            }
            None => {
                if self.dispatch_failing {
                    info!(tick = self.tick_index, "actuation channel recovered");
                }
                self.dispatch_failing = false;
            }
        }
    }
}
