use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use criterion::{black_box, BatchSize, Criterion};
use tracing::warn;

use servo_core::config::{load_config, ServoConfig};
use servo_core::sim::{SimulatedArm, SimulatedHand};
use servo_core::{ControlLoop, ControlMode, Latest, RawObservation, SessionReport};

const UNATTENDED_SECS: u64 = 10;
const BENCH_TICKS: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Driver {
    Threaded,
    Async,
}

fn fmt_opt(value: Option<f64>, scale: f64, unit: &str) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{:.3} {}", v * scale, unit))
}

fn print_report(name: &str, report: &SessionReport) {
    println!("\n=== {} ===", name);
    println!("Total ticks: {}", report.total_ticks);
    println!(
        "Stale: {}  Feedback missing: {}  Dispatch dropped: {}",
        report.stale_ticks, report.feedback_missing_ticks, report.dispatch_dropped_ticks
    );
    println!("RMS error: {}", fmt_opt(report.rms_error, 1000.0, "mm"));
    if let Some(stats) = &report.error_stats {
        println!(
            "Error (mm): mean={:.3}, std={:.3}, max={:.3}",
            stats.mean * 1000.0,
            stats.std * 1000.0,
            stats.max * 1000.0
        );
    }
    println!("Steady-state error: {}", fmt_opt(report.steady_state_error, 1000.0, "mm"));
    match report.settling {
        Some(s) => println!("Settling: tick {} ({:.3} s)", s.tick_index, s.time_secs),
        None => println!("Settling: never"),
    }
    println!("Overshoot: {}", fmt_opt(report.overshoot, 1000.0, "mm"));
    println!("Smoothness (mean sq. 2nd diff): {}", fmt_opt(report.smoothness, 1e6, "mm^2"));
}

/// Names the mode with the lower value of a metric.
fn lower_of(open: Option<f64>, closed: Option<f64>) -> &'static str {
    match (open, closed) {
        (Some(a), Some(b)) if a < b => "open loop",
        (Some(a), Some(b)) if a > b => "closed loop",
        (Some(a), Some(b)) if a == b => "tie",
        _ => "inconclusive",
    }
}

fn compare(open: &SessionReport, closed: &SessionReport) {
    println!("\n=== Open loop vs closed loop ===");
    println!("{:<20} {:>14} {:>14}  lower is", "metric", "open", "closed");
    let rows = [
        ("rms error (mm)", open.rms_error, closed.rms_error, 1000.0),
        ("steady state (mm)", open.steady_state_error, closed.steady_state_error, 1000.0),
        ("overshoot (mm)", open.overshoot, closed.overshoot, 1000.0),
        ("smoothness (mm^2)", open.smoothness, closed.smoothness, 1e6),
    ];
    for (name, a, b, scale) in rows {
        let cell = |v: Option<f64>| {
            v.map_or_else(|| "n/a".to_string(), |v| format!("{:.4}", v * scale))
        };
        println!("{:<20} {:>14} {:>14}  {}", name, cell(a), cell(b), lower_of(a, b));
    }
}

fn run_mode(config: &ServoConfig, mode: ControlMode, driver: Driver) -> Result<SessionReport> {
    let mut config = config.clone();
    config.control_loop.initial_mode = mode;
    config.experiment_name = format!("{}_{}", config.experiment_name, mode);

    println!("Running {} session ({:?} driver, {} s)...", mode, driver, config.duration_secs);
    let metrics = match driver {
        Driver::Threaded => threaded_loop::run_experiment(config)?,
        Driver::Async => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async_loop::run_experiment(config))?
        }
    };
    Ok(metrics.report())
}

fn benchmark_ticks(c: &mut Criterion, config: &ServoConfig, mode: ControlMode) {
    let mut config = config.clone();
    config.control_loop.initial_mode = mode;
    config.export.on_finish = false;

    let mut hand = SimulatedHand::new(config.simulation, &config.calibration);
    let period_ns = config.control_loop.tick_period_ms * 1_000_000;
    let observations: Vec<Option<Latest<RawObservation>>> = (0..BENCH_TICKS as u64)
        .map(|i| hand.next_observation(i * period_ns).map(|value| Latest { seq: i + 1, value }))
        .collect();
    let dt = period_ns as f64 / 1e9;

    c.bench_function(&format!("{}_{}_ticks", mode, BENCH_TICKS), |b| {
        b.iter_batched(
            || {
                let control = ControlLoop::new(config.clone()).expect("config validated at load");
                let arm = SimulatedArm::new(control.workspace_center(), &config.simulation);
                (control, arm)
            },
            |(mut control, mut arm)| {
                for (i, obs) in observations.iter().enumerate() {
                    black_box(control.tick(*obs, &mut arm, i as u64 * period_ns, dt));
                }
                control
            },
            BatchSize::SmallInput,
        );
    });
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!(
            "Usage: session_runner <config_file> [open|closed|both] [threaded|async] [--criterion]"
        );
        eprintln!("Example: session_runner configs/servo_baseline.toml both");
        eprintln!("Example: session_runner configs/servo_baseline.toml both async");
        eprintln!("Example: session_runner configs/servo_baseline.toml both --criterion");
        std::process::exit(1);
    }

    let config_path = &args[1];
    let positional: Vec<&str> = args[2..]
        .iter()
        .map(String::as_str)
        .filter(|a| !a.starts_with("--"))
        .collect();
    let modes = match positional.first().copied().unwrap_or("both") {
        "open" => vec![ControlMode::OpenLoop],
        "closed" => vec![ControlMode::ClosedLoop],
        "both" => vec![ControlMode::OpenLoop, ControlMode::ClosedLoop],
        other => bail!("unknown mode selection '{}'", other),
    };
    let driver = match positional.get(1).copied().unwrap_or("threaded") {
        "threaded" => Driver::Threaded,
        "async" => Driver::Async,
        other => bail!("unknown driver '{}'", other),
    };
    let use_criterion = args.iter().any(|a| a == "--criterion");

    let mut config = load_config(config_path).with_context(|| format!("loading {}", config_path))?;
    if config.duration_secs == 0 {
        warn!("duration_secs = 0 would run forever unattended; using {} s", UNATTENDED_SECS);
        config.duration_secs = UNATTENDED_SECS;
    }

    println!("========================================");
    println!("Hand Servo Session Runner");
    println!("========================================");
    println!("Config: {}", config_path);
    println!("Experiment: {}", config.experiment_name);
    println!("Duration: {} seconds", config.duration_secs);
    println!("Tick period: {} ms", config.control_loop.tick_period_ms);
    println!("Smoothing alpha: {}", config.smoothing.alpha);
    println!("PID: kp={} ki={} kd={}", config.pid.kp, config.pid.ki, config.pid.kd);
    println!("========================================\n");

    if use_criterion {
        let mut criterion = Criterion::default()
            .sample_size(20)
            .measurement_time(Duration::from_secs(10));
        for mode in modes {
            benchmark_ticks(&mut criterion, &config, mode);
        }
        println!("\nCriterion reports are under target/criterion.");
        return Ok(());
    }

    let mut reports = Vec::new();
    for mode in &modes {
        let report = run_mode(&config, *mode, driver)?;
        print_report(&format!("{} ({:?})", mode, driver), &report);
        reports.push(report);
    }

    if let [open, closed] = reports.as_slice() {
        compare(open, closed);
    }
    if config.export.on_finish {
        println!("\nSession records written under {}/", config.export.output_dir);
    }

    Ok(())
}
