use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::Local;
use csv::Writer;
use serde::Serialize;
use tracing::info;

use crate::error::ExportError;
use crate::metrics::{MetricSample, MetricsCollector, SessionReport};

pub const SAMPLES_FILE: &str = "samples.csv";
pub const REPORT_FILE: &str = "report.json";

#[derive(Debug, Serialize)]
struct SampleRecord {
    tick_index: u64,
    timestamp_ns: u64,
    dt: f64,
    mode: &'static str,
    stale: bool,
    feedback_missing: bool,
    dispatch_dropped: bool,

    raw_x: Option<f64>,
    raw_y: Option<f64>,
    raw_z: Option<f64>,

    target_x: f64,
    target_y: f64,
    target_z: f64,

    command_x: f64,
    command_y: f64,
    command_z: f64,

    measured_x: Option<f64>,
    measured_y: Option<f64>,
    measured_z: Option<f64>,

    error: Option<f64>,
}

impl From<&MetricSample> for SampleRecord {
    fn from(s: &MetricSample) -> Self {
        Self {
            tick_index: s.tick_index,
            timestamp_ns: s.timestamp,
            dt: s.dt,
            mode: s.mode.as_str(),
            stale: s.stale,
            feedback_missing: s.feedback_missing,
            dispatch_dropped: s.dispatch_dropped,
            raw_x: s.raw_target.map(|p| p.x),
            raw_y: s.raw_target.map(|p| p.y),
            raw_z: s.raw_target.map(|p| p.z),
            target_x: s.target.x,
            target_y: s.target.y,
            target_z: s.target.z,
            command_x: s.command.x,
            command_y: s.command.y,
            command_z: s.command.z,
            measured_x: s.measured.map(|p| p.x),
            measured_y: s.measured.map(|p| p.y),
            measured_z: s.measured.map(|p| p.z),
            error: s.error().map(|e| e.norm()),
        }
    }
}

#[derive(Debug, Serialize)]
struct SessionRecord<'a> {
    experiment_name: &'a str,
    session_name: &'a str,
    exported_at: String,
    report: SessionReport,
}

/// Writes one session's samples and derived report under
/// `<output_dir>/<session_name>/`. Exporting again overwrites the same set.
#[derive(Debug, Clone)]
pub struct SessionExporter {
    output_dir: PathBuf,
    session_name: String,
}

impl SessionExporter {
    pub fn new(output_dir: impl AsRef<Path>, session_name: Option<String>) -> Self {
        let session_name = session_name.unwrap_or_else(|| {
            format!("session_{}", Local::now().format("%Y%m%d_%H%M%S"))
        });

        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            session_name,
        }
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    pub fn session_dir(&self) -> PathBuf {
        self.output_dir.join(&self.session_name)
    }

    pub fn export(
        &self,
        experiment_name: &str,
        metrics: &MetricsCollector,
    ) -> Result<PathBuf, ExportError> {
        let dir = self.session_dir();
        fs::create_dir_all(&dir)?;

        let mut writer = Writer::from_writer(File::create(dir.join(SAMPLES_FILE))?);
        for sample in metrics.samples() {
            writer.serialize(SampleRecord::from(sample))?;
        }
        writer.flush()?;

        let record = SessionRecord {
            experiment_name,
            session_name: &self.session_name,
            exported_at: Local::now().to_rfc3339(),
            report: metrics.report(),
        };
        serde_json::to_writer_pretty(File::create(dir.join(REPORT_FILE))?, &record)?;

        info!(samples = metrics.len(), dir = %dir.display(), "session exported");
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;
    use crate::ControlMode;
    use nalgebra::Vector3;

    #[test]
    fn writes_samples_and_report() {
        let output_dir =
            std::env::temp_dir().join(format!("servo_export_{}", uuid::Uuid::new_v4()));
        let exporter = SessionExporter::new(&output_dir, Some("unit".to_string()));

        let mut metrics = MetricsCollector::new(&MetricsConfig::default());
        for tick in 0..3u64 {
            metrics.record(MetricSample {
                tick_index: tick,
                timestamp: tick * 20_000_000,
                dt: 0.02,
                mode: ControlMode::OpenLoop,
                raw_target: (tick != 1).then(|| Vector3::new(0.1, 0.0, 0.5)),
                target: Vector3::new(0.1, 0.0, 0.5),
                command: Vector3::new(0.1, 0.0, 0.5),
                measured: Some(Vector3::new(0.0, 0.0, 0.5)),
                stale: tick == 1,
                feedback_missing: false,
                dispatch_dropped: false,
            });
        }

        let dir = exporter.export("unit_test", &metrics).unwrap();
        assert_eq!(dir, output_dir.join("unit"));

        let mut reader = csv::Reader::from_path(dir.join(SAMPLES_FILE)).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "tick_index");
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[1][4], "true");
        assert_eq!(&rows[1][7], "");

        let json: serde_json::Value =
            serde_json::from_reader(File::open(dir.join(REPORT_FILE)).unwrap()).unwrap();
        assert_eq!(json["experiment_name"], "unit_test");
        assert_eq!(json["report"]["total_ticks"], 3);
        assert_eq!(json["report"]["stale_ticks"], 1);

        fs::remove_dir_all(&output_dir).unwrap();
    }
}
