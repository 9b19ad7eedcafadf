use thiserror::Error;

/// Invalid configuration. A loop is never started with one of these.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("workspace {axis} bounds inverted: min {min} > max {max}")]
    InvertedBounds { axis: char, min: f64, max: f64 },
    #[error("calibration {axis} pixel range is empty: [{min}, {max}]")]
    DegeneratePixelRange { axis: char, min: f64, max: f64 },
    #[error("calibration {0} metric range must be finite")]
    NonFiniteCalibration(char),
    #[error("smoothing factor {0} outside (0, 1)")]
    SmoothingFactor(f64),
    #[error("gain {name} must be finite and non-negative, got {value}")]
    Gain { name: &'static str, value: f64 },
    #[error("anti-windup bound must be positive, got {0}")]
    IntegralLimit(f64),
    #[error("derivative filter {0} outside (0, 1]")]
    DerivativeFilter(f64),
    #[error("dt floor must be positive, got {0}")]
    DtFloor(f64),
    #[error("confidence threshold {0} outside [0, 1]")]
    ConfidenceThreshold(f64),
    #[error("tick period must be non-zero")]
    TickPeriod,
    #[error("settling tolerance must be positive, got {0}")]
    SettlingTolerance(f64),
    #[error("settling duration must be non-negative, got {0}")]
    SettlingDuration(f64),
    #[error("simulated frame period must be non-zero")]
    FramePeriod,
    #[error("simulated arm response {0} outside [0, 1]")]
    ArmResponse(f64),
}

/// Per-tick dispatch failure. Absorbed by the loop, never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ActuationError {
    #[error("actuation channel unavailable")]
    Unavailable,
    #[error("actuation channel busy")]
    Busy,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to write samples: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to write report: {0}")]
    Json(#[from] serde_json::Error),
}
