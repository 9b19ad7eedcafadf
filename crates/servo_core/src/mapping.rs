//! Pixel -> workspace mapping and the safety clamp that bounds every target.

use nalgebra::Vector3;

use crate::config::{AxisCalibration, CalibrationConfig, WorkspaceBounds};
use crate::WorkspaceTarget;

impl AxisCalibration {
    /// Clamps the pixel into range first, so frames reported slightly
    /// outside the image still map to the nearest edge.
    pub fn map(&self, pixel: f64) -> f64 {
        let pixel = pixel.clamp(self.pixel_min, self.pixel_max);
        let mut t = (pixel - self.pixel_min) / (self.pixel_max - self.pixel_min);
        if self.invert {
            t = 1.0 - t;
        }
        self.metric_min + t * (self.metric_max - self.metric_min)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CoordinateMapper {
    calibration: CalibrationConfig,
}

impl CoordinateMapper {
    pub fn new(calibration: CalibrationConfig) -> Self {
        Self { calibration }
    }

    pub fn map(&self, pixel_x: f64, pixel_y: f64, source_timestamp: u64) -> WorkspaceTarget {
        WorkspaceTarget {
            position: Vector3::new(
                self.calibration.x.map(pixel_x),
                self.calibration.y.map(pixel_y),
                self.calibration.z_fixed,
            ),
            source_timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SafetyClamp {
    bounds: WorkspaceBounds,
}

impl SafetyClamp {
    pub fn new(bounds: WorkspaceBounds) -> Self {
        Self { bounds }
    }

    pub fn bounds(&self) -> &WorkspaceBounds {
        &self.bounds
    }

    pub fn clamp_position(&self, position: Vector3<f64>) -> Vector3<f64> {
        let b = &self.bounds;
        Vector3::new(
            clamp_axis(position.x, b.x.min, b.x.max),
            clamp_axis(position.y, b.y.min, b.y.max),
            clamp_axis(position.z, b.z.min, b.z.max),
        )
    }

    pub fn clamp(&self, target: WorkspaceTarget) -> WorkspaceTarget {
        WorkspaceTarget {
            position: self.clamp_position(target.position),
            ..target
        }
    }

    pub fn contains(&self, position: &Vector3<f64>) -> bool {
        let (min, max) = (self.bounds.min(), self.bounds.max());
        (0..3).all(|i| position[i] >= min[i] && position[i] <= max[i])
    }
}

// NaN collapses to the lower bound so a bad sample can never leave the box.
fn clamp_axis(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AxisBounds;

    fn mapper() -> CoordinateMapper {
        CoordinateMapper::new(CalibrationConfig::default())
    }

    #[test]
    fn maps_pixel_range_onto_metric_range() {
        let m = mapper();
        assert!((m.map(0.0, 240.0, 0).position.x + 0.3).abs() < 1e-12);
        assert!((m.map(640.0, 240.0, 0).position.x - 0.3).abs() < 1e-12);
        assert!(m.map(320.0, 240.0, 0).position.x.abs() < 1e-12);
        assert!(m.map(320.0, 240.0, 0).position.y.abs() < 1e-12);
        assert_eq!(m.map(320.0, 240.0, 0).position.z, 0.5);
    }

    #[test]
    fn out_of_frame_pixels_clamp_to_edge() {
        let m = mapper();
        assert!((m.map(-50.0, 0.0, 0).position.x + 0.3).abs() < 1e-12);
        assert!((m.map(9000.0, 0.0, 0).position.x - 0.3).abs() < 1e-12);
    }

    #[test]
    fn inversion_flips_axis() {
        let mut calibration = CalibrationConfig::default();
        calibration.y.invert = true;
        let m = CoordinateMapper::new(calibration);
        assert!((m.map(0.0, 0.0, 7).position.y - 0.3).abs() < 1e-12);
        assert!((m.map(0.0, 480.0, 7).position.y + 0.3).abs() < 1e-12);
        assert_eq!(m.map(0.0, 0.0, 7).source_timestamp, 7);
    }

    #[test]
    fn clamp_is_idempotent_and_bounded() {
        let clamp = SafetyClamp::new(WorkspaceBounds {
            x: AxisBounds::new(-0.3, 0.3),
            y: AxisBounds::new(-0.2, 0.2),
            z: AxisBounds::new(0.5, 0.5),
        });
        let inputs = [
            Vector3::new(0.0, 0.0, 0.5),
            Vector3::new(1e9, -1e9, 3.0),
            Vector3::new(-0.31, 0.19, -7.0),
            Vector3::new(f64::NAN, f64::INFINITY, f64::NEG_INFINITY),
        ];
        for p in inputs {
            let once = clamp.clamp_position(p);
            let twice = clamp.clamp_position(once);
            assert_eq!(once, twice);
            assert!(clamp.contains(&once));
        }
    }
}
