//! Per-tick sample log and the session metrics derived from it.
//!
//! Every derived metric is a pure reduction over the stored samples, so it can
//! be recomputed at any point of a session and always gives the same answer.

use nalgebra::Vector3;
use serde::Serialize;

use crate::config::MetricsConfig;
use crate::ControlMode;

const NANOS_PER_SEC: f64 = 1e9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSample {
    pub tick_index: u64,
    /// Nanoseconds since session start.
    pub timestamp: u64,
    /// Seconds since the previous tick.
    pub dt: f64,
    pub mode: ControlMode,
    /// Clamped workspace target from this tick's observation; `None` when stale.
    pub raw_target: Option<Vector3<f64>>,
    /// Smoothed setpoint the controller worked on.
    pub target: Vector3<f64>,
    pub command: Vector3<f64>,
    pub measured: Option<Vector3<f64>>,
    pub stale: bool,
    pub feedback_missing: bool,
    pub dispatch_dropped: bool,
}

impl MetricSample {
    pub fn error(&self) -> Option<Vector3<f64>> {
        self.measured.map(|m| self.target - m)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModeChange {
    pub tick_index: u64,
    pub timestamp: u64,
    pub from: ControlMode,
    pub to: ControlMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Settling {
    pub tick_index: u64,
    pub time_secs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ErrorStats {
    pub max: f64,
    pub mean: f64,
    pub std: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    pub total_ticks: usize,
    pub stale_ticks: usize,
    pub feedback_missing_ticks: usize,
    pub dispatch_dropped_ticks: usize,
    pub feedback_samples: usize,
    pub rms_error: Option<f64>,
    pub error_stats: Option<ErrorStats>,
    pub steady_state_error: Option<f64>,
    pub settling: Option<Settling>,
    pub overshoot: Option<f64>,
    pub smoothness: Option<f64>,
    pub mode_changes: Vec<ModeChange>,
}

#[derive(Debug, Clone)]
pub struct MetricsCollector {
    samples: Vec<MetricSample>,
    mode_changes: Vec<ModeChange>,
    settling_tolerance: f64,
    settling_min_duration: f64,
}

impl MetricsCollector {
    pub fn new(config: &MetricsConfig) -> Self {
        Self {
            samples: Vec::with_capacity(10_000),
            mode_changes: Vec::new(),
            settling_tolerance: config.settling_tolerance,
            settling_min_duration: config.settling_min_duration_secs,
        }
    }

    pub fn record(&mut self, sample: MetricSample) {
        self.samples.push(sample);
    }

    pub fn record_mode_change(&mut self, change: ModeChange) {
        self.mode_changes.push(change);
    }

    pub fn samples(&self) -> &[MetricSample] {
        &self.samples
    }

    pub fn mode_changes(&self) -> &[ModeChange] {
        &self.mode_changes
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// (tick, timestamp, error vector) for every sample with a measured position.
    fn error_series(&self) -> impl Iterator<Item = (u64, u64, Vector3<f64>)> + '_ {
        self.samples
            .iter()
            .filter_map(|s| s.error().map(|e| (s.tick_index, s.timestamp, e)))
    }

    /// Root-mean-square error magnitude over fresh ticks with feedback.
    pub fn rms_error(&self) -> Option<f64> {
        let squared: Vec<f64> = self
            .samples
            .iter()
            .filter(|s| !s.stale)
            .filter_map(|s| s.error().map(|e| e.norm_squared()))
            .collect();
        if squared.is_empty() {
            return None;
        }
        Some((squared.iter().sum::<f64>() / squared.len() as f64).sqrt())
    }

    pub fn error_stats(&self) -> Option<ErrorStats> {
        let norms: Vec<f64> = self.error_series().map(|(_, _, e)| e.norm()).collect();
        if norms.is_empty() {
            return None;
        }
        let n = norms.len() as f64;
        let mean = norms.iter().sum::<f64>() / n;
        let variance = norms.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / n;
        let max = norms.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        Some(ErrorStats {
            max,
            mean,
            std: variance.sqrt(),
        })
    }

    /// Mean error magnitude over the final fifth of feedback samples (at least 5).
    pub fn steady_state_error(&self) -> Option<f64> {
        let norms: Vec<f64> = self.error_series().map(|(_, _, e)| e.norm()).collect();
        if norms.is_empty() {
            return None;
        }
        let window = (norms.len() / 5).max(5).min(norms.len());
        let tail = &norms[norms.len() - window..];
        Some(tail.iter().sum::<f64>() / tail.len() as f64)
    }

    /// First tick from which the error stays inside the tolerance band for at
    /// least the configured duration.
    pub fn settling(&self) -> Option<Settling> {
        let origin = self.samples.first()?.timestamp;
        let mut run_start: Option<(u64, u64)> = None;

        for (tick, ts, error) in self.error_series() {
            if error.norm() > self.settling_tolerance {
                run_start = None;
                continue;
            }
            let (start_tick, start_ts) = *run_start.get_or_insert((tick, ts));
            let held = ts.saturating_sub(start_ts) as f64 / NANOS_PER_SEC;
            if held >= self.settling_min_duration {
                return Some(Settling {
                    tick_index: start_tick,
                    time_secs: start_ts.saturating_sub(origin) as f64 / NANOS_PER_SEC,
                });
            }
        }
        None
    }

    /// Largest per-axis excursion past the target after the error first
    /// enters the tolerance band. Each axis approaches from the side of its
    /// first non-zero error; an axis that never leaves zero contributes
    /// nothing. A response that never crosses the target reports zero.
    pub fn overshoot(&self) -> Option<f64> {
        let errors: Vec<Vector3<f64>> = self.error_series().map(|(_, _, e)| e).collect();
        let entry = errors
            .iter()
            .position(|e| e.norm() <= self.settling_tolerance)?;

        let mut approach = Vector3::<f64>::zeros();
        for axis in 0..3 {
            approach[axis] = errors
                .iter()
                .map(|e| e[axis])
                .find(|v| *v != 0.0)
                .map_or(0.0, f64::signum);
        }

        let mut worst = 0.0_f64;
        for error in &errors[entry..] {
            for axis in 0..3 {
                // error = target - measured, so a crossing flips its sign
                worst = worst.max(-approach[axis] * error[axis]);
            }
        }
        Some(worst)
    }

    /// Mean squared second difference of the command sequence.
    pub fn smoothness(&self) -> Option<f64> {
        if self.samples.len() < 3 {
            return None;
        }
        let jerks: Vec<f64> = self
            .samples
            .windows(3)
            .map(|w| (w[2].command - w[1].command * 2.0 + w[0].command).norm_squared())
            .collect();
        Some(jerks.iter().sum::<f64>() / jerks.len() as f64)
    }

    pub fn report(&self) -> SessionReport {
        SessionReport {
            total_ticks: self.samples.len(),
            stale_ticks: self.samples.iter().filter(|s| s.stale).count(),
            feedback_missing_ticks: self.samples.iter().filter(|s| s.feedback_missing).count(),
            dispatch_dropped_ticks: self.samples.iter().filter(|s| s.dispatch_dropped).count(),
            feedback_samples: self.error_series().count(),
            rms_error: self.rms_error(),
            error_stats: self.error_stats(),
            steady_state_error: self.steady_state_error(),
            settling: self.settling(),
            overshoot: self.overshoot(),
            smoothness: self.smoothness(),
            mode_changes: self.mode_changes.clone(),
        }
    }
}
