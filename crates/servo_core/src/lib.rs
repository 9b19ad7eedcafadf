use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

pub mod config;
pub mod controller;
pub mod dashboard;
pub mod diagnostics;
pub mod driver;
pub mod error;
pub mod export;
pub mod filter;
pub mod mapping;
pub mod metrics;
pub mod pid;
pub mod sim;
pub mod slot;

pub use config::ServoConfig;
pub use controller::Controller;
pub use dashboard::DebugOverlay;
pub use diagnostics::SharedDiagnostics;
pub use driver::{Actuator, ControlLoop, LoopSignal};
pub use error::{ActuationError, ConfigError, ExportError};
pub use metrics::{MetricSample, MetricsCollector, SessionReport};
pub use slot::{Latest, LatestSlot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    OpenLoop,
    ClosedLoop,
}

impl ControlMode {
    pub fn toggled(self) -> Self {
        match self {
            ControlMode::OpenLoop => ControlMode::ClosedLoop,
            ControlMode::ClosedLoop => ControlMode::OpenLoop,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ControlMode::OpenLoop => "open_loop",
            ControlMode::ClosedLoop => "closed_loop",
        }
    }
}

impl std::fmt::Display for ControlMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One hand detection in camera pixel space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawObservation {
    pub pixel_x: f64,
    pub pixel_y: f64,
    pub confidence: f64,
    /// Nanoseconds since session start.
    pub capture_timestamp: u64,
}

/// Metric target in the robot frame, produced by the mapper.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkspaceTarget {
    pub position: Vector3<f64>,
    pub source_timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothedTarget {
    pub position: Vector3<f64>,
    pub tick_index: u64,
}

/// The value handed to the actuation channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Command {
    pub position: Vector3<f64>,
    pub tick_index: u64,
    pub mode: ControlMode,
}

/// Inputs a running session accepts from the operator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatorCommand {
    Quit,
    ToggleDebugOverlay,
    ResetToCenter,
    ToggleMode,
    SelectMode(ControlMode),
    SetKp(f64),
    SetKi(f64),
    SetKd(f64),
    SetSmoothing(f64),
    Export,
}

impl OperatorCommand {
    /// Parses one line of operator input, e.g. `q`, `m`, `kp 1.5`, `alpha 0.6`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let word = parts.next()?.to_ascii_lowercase();
        let value = parts.next().and_then(|v| v.parse::<f64>().ok());

        match (word.as_str(), value) {
            ("q" | "quit", _) => Some(OperatorCommand::Quit),
            ("d" | "debug", _) => Some(OperatorCommand::ToggleDebugOverlay),
            ("r" | "reset", _) => Some(OperatorCommand::ResetToCenter),
            ("m" | "mode", _) => Some(OperatorCommand::ToggleMode),
            ("open", _) => Some(OperatorCommand::SelectMode(ControlMode::OpenLoop)),
            ("closed", _) => Some(OperatorCommand::SelectMode(ControlMode::ClosedLoop)),
            ("kp", Some(v)) => Some(OperatorCommand::SetKp(v)),
            ("ki", Some(v)) => Some(OperatorCommand::SetKi(v)),
            ("kd", Some(v)) => Some(OperatorCommand::SetKd(v)),
            ("alpha", Some(v)) => Some(OperatorCommand::SetSmoothing(v)),
            ("e" | "export", _) => Some(OperatorCommand::Export),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_operator_lines() {
        assert_eq!(OperatorCommand::parse("q"), Some(OperatorCommand::Quit));
        assert_eq!(OperatorCommand::parse("  M "), Some(OperatorCommand::ToggleMode));
        assert_eq!(OperatorCommand::parse("kp 1.5"), Some(OperatorCommand::SetKp(1.5)));
        assert_eq!(
            OperatorCommand::parse("closed"),
            Some(OperatorCommand::SelectMode(ControlMode::ClosedLoop))
        );
        assert_eq!(OperatorCommand::parse("alpha"), None);
        assert_eq!(OperatorCommand::parse("kd abc"), None);
        assert_eq!(OperatorCommand::parse(""), None);
    }

    #[test]
    fn mode_toggles_between_variants() {
        assert_eq!(ControlMode::OpenLoop.toggled(), ControlMode::ClosedLoop);
        assert_eq!(ControlMode::ClosedLoop.toggled().to_string(), "open_loop");
    }
}
