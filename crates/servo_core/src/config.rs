use std::fs;
use std::path::Path;
use std::time::Duration;

use nalgebra::Vector3;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::ControlMode;

#[derive(Debug, Deserialize, Clone)]
pub struct ServoConfig {
    #[serde(default = "default_experiment_name")]
    pub experiment_name: String,
    /// Session length; 0 runs until the operator quits.
    #[serde(default)]
    pub duration_secs: u64,
    #[serde(default, rename = "loop")]
    pub control_loop: LoopConfig,
    #[serde(default)]
    pub workspace: WorkspaceBounds,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub smoothing: SmoothingConfig,
    #[serde(default)]
    pub pid: PidConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoopConfig {
    #[serde(default = "default_tick_period_ms")]
    pub tick_period_ms: u64,
    /// Detections below this confidence are treated as missing.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_initial_mode")]
    pub initial_mode: ControlMode,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct AxisBounds {
    pub min: f64,
    pub max: f64,
}

impl AxisBounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn center(&self) -> f64 {
        (self.min + self.max) / 2.0
    }
}

/// Axis-aligned box the end-effector must stay in, metres in the robot frame.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct WorkspaceBounds {
    #[serde(default = "default_planar_bounds")]
    pub x: AxisBounds,
    #[serde(default = "default_planar_bounds")]
    pub y: AxisBounds,
    #[serde(default = "default_z_bounds")]
    pub z: AxisBounds,
}

impl WorkspaceBounds {
    pub fn min(&self) -> Vector3<f64> {
        Vector3::new(self.x.min, self.y.min, self.z.min)
    }

    pub fn max(&self) -> Vector3<f64> {
        Vector3::new(self.x.max, self.y.max, self.z.max)
    }

    pub fn center(&self) -> Vector3<f64> {
        Vector3::new(self.x.center(), self.y.center(), self.z.center())
    }

    fn axes(&self) -> [(char, AxisBounds); 3] {
        [('x', self.x), ('y', self.y), ('z', self.z)]
    }
}

/// Linear pixel -> metre calibration for one camera axis.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct AxisCalibration {
    pub pixel_min: f64,
    pub pixel_max: f64,
    pub metric_min: f64,
    pub metric_max: f64,
    /// Flip the axis so camera and robot handedness agree.
    #[serde(default)]
    pub invert: bool,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct CalibrationConfig {
    #[serde(default = "default_x_calibration")]
    pub x: AxisCalibration,
    #[serde(default = "default_y_calibration")]
    pub y: AxisCalibration,
    /// The camera sees a plane, so depth is a fixed height.
    #[serde(default = "default_z_fixed")]
    pub z_fixed: f64,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct SmoothingConfig {
    #[serde(default = "default_alpha")]
    pub alpha: f64,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct PidConfig {
    #[serde(default = "default_kp")]
    pub kp: f64,
    #[serde(default = "default_ki")]
    pub ki: f64,
    #[serde(default = "default_kd")]
    pub kd: f64,
    /// Anti-windup bound applied per axis to the integral accumulator.
    #[serde(default = "default_integral_limit")]
    pub integral_limit: f64,
    /// Low-pass coefficient on the derivative term; 1.0 leaves it unfiltered.
    #[serde(default = "default_derivative_filter")]
    pub derivative_filter: f64,
    /// Smallest dt (seconds) the derivative will divide by.
    #[serde(default = "default_dt_floor")]
    pub dt_floor: f64,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct MetricsConfig {
    /// Error magnitude (metres) that counts as settled.
    #[serde(default = "default_settling_tolerance")]
    pub settling_tolerance: f64,
    #[serde(default = "default_settling_min_duration")]
    pub settling_min_duration_secs: f64,
    #[serde(default = "default_overlay_capacity")]
    pub overlay_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExportConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_true")]
    pub on_finish: bool,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Trajectory {
    Circle,
    Step,
}

/// Knobs for the synthetic hand and arm used when no hardware is attached.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct SimulationConfig {
    #[serde(default = "default_frame_period_ms")]
    pub frame_period_ms: u64,
    #[serde(default = "default_trajectory")]
    pub trajectory: Trajectory,
    /// Every n-th frame is reported with low confidence; 0 disables.
    #[serde(default = "default_dropout_every")]
    pub detection_dropout_every: u64,
    #[serde(default = "default_jitter_px")]
    pub jitter_px: f64,
    /// Fraction of the remaining distance the arm covers per command.
    #[serde(default = "default_arm_response")]
    pub arm_response: f64,
    #[serde(default = "default_true")]
    pub report_feedback: bool,
}

fn default_experiment_name() -> String {
    "hand_servo".to_string()
}

fn default_tick_period_ms() -> u64 {
    20
}

fn default_confidence_threshold() -> f64 {
    0.7
}

fn default_initial_mode() -> ControlMode {
    ControlMode::OpenLoop
}

fn default_planar_bounds() -> AxisBounds {
    AxisBounds::new(-0.3, 0.3)
}

fn default_z_bounds() -> AxisBounds {
    AxisBounds::new(0.3, 0.7)
}

fn default_x_calibration() -> AxisCalibration {
    AxisCalibration {
        pixel_min: 0.0,
        pixel_max: 640.0,
        metric_min: -0.3,
        metric_max: 0.3,
        invert: false,
    }
}

fn default_y_calibration() -> AxisCalibration {
    AxisCalibration {
        pixel_min: 0.0,
        pixel_max: 480.0,
        metric_min: -0.3,
        metric_max: 0.3,
        invert: false,
    }
}

fn default_z_fixed() -> f64 {
    0.5
}

fn default_alpha() -> f64 {
    0.7
}

fn default_kp() -> f64 {
    2.0
}

fn default_ki() -> f64 {
    0.1
}

fn default_kd() -> f64 {
    0.05
}

fn default_integral_limit() -> f64 {
    0.5
}

fn default_derivative_filter() -> f64 {
    1.0
}

fn default_dt_floor() -> f64 {
    1e-3
}

fn default_settling_tolerance() -> f64 {
    0.01
}

fn default_settling_min_duration() -> f64 {
    0.5
}

fn default_overlay_capacity() -> usize {
    256
}

fn default_output_dir() -> String {
    "sessions".to_string()
}

fn default_true() -> bool {
    true
}

fn default_frame_period_ms() -> u64 {
    33
}

fn default_trajectory() -> Trajectory {
    Trajectory::Circle
}

fn default_dropout_every() -> u64 {
    40
}

fn default_jitter_px() -> f64 {
    3.0
}

fn default_arm_response() -> f64 {
    0.35
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: default_tick_period_ms(),
            confidence_threshold: default_confidence_threshold(),
            initial_mode: default_initial_mode(),
        }
    }
}

impl Default for WorkspaceBounds {
    fn default() -> Self {
        Self {
            x: default_planar_bounds(),
            y: default_planar_bounds(),
            z: default_z_bounds(),
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            x: default_x_calibration(),
            y: default_y_calibration(),
            z_fixed: default_z_fixed(),
        }
    }
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
        }
    }
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: default_kp(),
            ki: default_ki(),
            kd: default_kd(),
            integral_limit: default_integral_limit(),
            derivative_filter: default_derivative_filter(),
            dt_floor: default_dt_floor(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            settling_tolerance: default_settling_tolerance(),
            settling_min_duration_secs: default_settling_min_duration(),
            overlay_capacity: default_overlay_capacity(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            on_finish: true,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            frame_period_ms: default_frame_period_ms(),
            trajectory: default_trajectory(),
            detection_dropout_every: default_dropout_every(),
            jitter_px: default_jitter_px(),
            arm_response: default_arm_response(),
            report_feedback: true,
        }
    }
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            experiment_name: default_experiment_name(),
            duration_secs: 0,
            control_loop: LoopConfig::default(),
            workspace: WorkspaceBounds::default(),
            calibration: CalibrationConfig::default(),
            smoothing: SmoothingConfig::default(),
            pid: PidConfig::default(),
            metrics: MetricsConfig::default(),
            export: ExportConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

/// Reads, parses and validates a TOML config file.
pub fn load_config(path: impl AsRef<Path>) -> Result<ServoConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    ServoConfig::from_toml_str(&content)
}

impl ServoConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_config(path)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ServoConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.control_loop.tick_period_ms)
    }

    pub fn session_duration(&self) -> Option<Duration> {
        (self.duration_secs > 0).then(|| Duration::from_secs(self.duration_secs))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (axis, bounds) in self.workspace.axes() {
            if !(bounds.min <= bounds.max) {
                return Err(ConfigError::InvertedBounds {
                    axis,
                    min: bounds.min,
                    max: bounds.max,
                });
            }
        }

        for (axis, cal) in [('x', self.calibration.x), ('y', self.calibration.y)] {
            if !(cal.pixel_min < cal.pixel_max) {
                return Err(ConfigError::DegeneratePixelRange {
                    axis,
                    min: cal.pixel_min,
                    max: cal.pixel_max,
                });
            }
            if !(cal.metric_min.is_finite() && cal.metric_max.is_finite()) {
                return Err(ConfigError::NonFiniteCalibration(axis));
            }
        }
        if !self.calibration.z_fixed.is_finite() {
            return Err(ConfigError::NonFiniteCalibration('z'));
        }

        validate_alpha(self.smoothing.alpha)?;
        validate_gain("kp", self.pid.kp)?;
        validate_gain("ki", self.pid.ki)?;
        validate_gain("kd", self.pid.kd)?;

        if !(self.pid.integral_limit > 0.0) {
            return Err(ConfigError::IntegralLimit(self.pid.integral_limit));
        }
        if !(self.pid.derivative_filter > 0.0 && self.pid.derivative_filter <= 1.0) {
            return Err(ConfigError::DerivativeFilter(self.pid.derivative_filter));
        }
        if !(self.pid.dt_floor > 0.0) {
            return Err(ConfigError::DtFloor(self.pid.dt_floor));
        }
        if !(0.0..=1.0).contains(&self.control_loop.confidence_threshold) {
            return Err(ConfigError::ConfidenceThreshold(self.control_loop.confidence_threshold));
        }
        if self.control_loop.tick_period_ms == 0 {
            return Err(ConfigError::TickPeriod);
        }
        if !(self.metrics.settling_tolerance > 0.0) {
            return Err(ConfigError::SettlingTolerance(self.metrics.settling_tolerance));
        }
        if !(self.metrics.settling_min_duration_secs >= 0.0) {
            return Err(ConfigError::SettlingDuration(self.metrics.settling_min_duration_secs));
        }
        if self.simulation.frame_period_ms == 0 {
            return Err(ConfigError::FramePeriod);
        }
        if !(0.0..=1.0).contains(&self.simulation.arm_response) {
            return Err(ConfigError::ArmResponse(self.simulation.arm_response));
        }

        Ok(())
    }
}

pub fn validate_alpha(alpha: f64) -> Result<(), ConfigError> {
    if alpha > 0.0 && alpha < 1.0 {
        Ok(())
    } else {
        Err(ConfigError::SmoothingFactor(alpha))
    }
}

pub fn validate_gain(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Gain { name, value })
    }
}
