use nalgebra::Vector3;

use crate::config::{validate_gain, PidConfig};
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl PidGains {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_gain("kp", self.kp)?;
        validate_gain("ki", self.ki)?;
        validate_gain("kd", self.kd)
    }
}

impl From<&PidConfig> for PidGains {
    fn from(config: &PidConfig) -> Self {
        Self {
            kp: config.kp,
            ki: config.ki,
            kd: config.kd,
        }
    }
}

/// Per-axis PID accumulator. Gains live with the caller so they can be
/// retuned without touching the integral.
#[derive(Debug, Clone)]
pub struct PidController {
    integral_limit: f64,
    derivative_filter: f64,
    dt_floor: f64,
    integral: Vector3<f64>,
    prev_error: Vector3<f64>,
    filtered_derivative: Option<Vector3<f64>>,
}

impl PidController {
    pub fn new(config: &PidConfig) -> Self {
        Self {
            integral_limit: config.integral_limit,
            derivative_filter: config.derivative_filter,
            dt_floor: config.dt_floor,
            integral: Vector3::zeros(),
            prev_error: Vector3::zeros(),
            filtered_derivative: None,
        }
    }

    pub fn reset(&mut self) {
        self.integral = Vector3::zeros();
        self.prev_error = Vector3::zeros();
        self.filtered_derivative = None;
    }

    pub fn integral(&self) -> Vector3<f64> {
        self.integral
    }

    pub fn prev_error(&self) -> Vector3<f64> {
        self.prev_error
    }

    /// Returns the correction `Kp*e + Ki*integral + Kd*derivative`.
    pub fn compute(&mut self, gains: &PidGains, error: Vector3<f64>, dt: f64) -> Vector3<f64> {
        let dt = dt.max(self.dt_floor);
        let limit = self.integral_limit;

        self.integral = (self.integral + error * dt).map(|v| v.clamp(-limit, limit));

        let raw_derivative = (error - self.prev_error) / dt;
        let derivative = match self.filtered_derivative {
            Some(prev) => {
                raw_derivative * self.derivative_filter + prev * (1.0 - self.derivative_filter)
            }
            None => raw_derivative,
        };
        self.filtered_derivative = Some(derivative);
        self.prev_error = error;

        error * gains.kp + self.integral * gains.ki + derivative * gains.kd
    }
}
