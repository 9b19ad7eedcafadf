use nalgebra::Vector3;

use crate::config::validate_alpha;
use crate::error::ConfigError;
use crate::{SmoothedTarget, WorkspaceTarget};

/// Exponential low-pass over workspace targets.
///
/// `smoothed = alpha * previous + (1 - alpha) * target`, so a larger alpha
/// trades responsiveness for stability. The first update after construction
/// or a reset passes its input through unchanged.
#[derive(Debug, Clone)]
pub struct SmoothingFilter {
    alpha: f64,
    current: Option<Vector3<f64>>,
    rebase: bool,
}

impl SmoothingFilter {
    pub fn new(alpha: f64) -> Result<Self, ConfigError> {
        validate_alpha(alpha)?;
        Ok(Self {
            alpha,
            current: None,
            rebase: true,
        })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Takes effect on the next update; the held value is kept.
    pub fn set_alpha(&mut self, alpha: f64) -> Result<(), ConfigError> {
        validate_alpha(alpha)?;
        self.alpha = alpha;
        Ok(())
    }

    pub fn update(&mut self, target: &WorkspaceTarget, tick_index: u64) -> SmoothedTarget {
        let position = match self.current {
            Some(prev) if !self.rebase => prev * self.alpha + target.position * (1.0 - self.alpha),
            _ => target.position,
        };
        self.current = Some(position);
        self.rebase = false;
        SmoothedTarget {
            position,
            tick_index,
        }
    }

    /// Last smoothed value, if any update has happened.
    pub fn current(&self) -> Option<Vector3<f64>> {
        self.current
    }

    /// Forgets history; the next update becomes the new baseline.
    pub fn reset(&mut self) {
        self.current = None;
        self.rebase = true;
    }

    /// Holds `center` until the next update, which then becomes the baseline.
    pub fn reset_to(&mut self, center: Vector3<f64>) {
        self.current = Some(center);
        self.rebase = true;
    }

    /// Seeds history so the next update blends from `position`.
    pub fn seed(&mut self, position: Vector3<f64>) {
        self.current = Some(position);
        self.rebase = false;
    }
}
