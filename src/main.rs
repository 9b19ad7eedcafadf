mod menu;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use anyhow::{Context, Result};
use tracing::{info, warn};

use servo_core::config::load_config;
use servo_core::{ControlMode, MetricsCollector, ServoConfig, SessionReport};

const DEFAULT_CONFIG: &str = "configs/servo_baseline.toml";
const COMPARISON_SECS: u64 = 10;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = if Path::new(&config_path).exists() {
        load_config(&config_path).with_context(|| format!("loading {}", config_path))?
    } else {
        warn!(path = %config_path, "config file not found, using defaults");
        ServoConfig::default()
    };

    println!("===========================================");
    println!("Welcome to Hand Servo Control");
    println!("===========================================");

    loop {
        menu::show_menu();

        match menu::get_user_choice()? {
            Some(1) => run_threaded_session(&config)?,
            Some(2) => run_async_session(&config)?,
            Some(3) => run_mode_comparison(&config)?,
            Some(4) => show_config(&config_path, &config),
            Some(5) | None => {
                println!("Goodbye!");
                break;
            }
            _ => println!("Invalid choice. Please select 1-5."),
        }
    }

    Ok(())
}

fn run_threaded_session(config: &ServoConfig) -> Result<()> {
    println!("\n=== Threaded Session ===");
    describe(config);
    menu::show_controls();

    let (operator_tx, operator_rx) = mpsc::channel();
    let session_over = Arc::new(AtomicBool::new(false));
    let reader = menu::spawn_operator_reader(
        move |command| operator_tx.send(command).is_ok(),
        Arc::clone(&session_over),
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let metrics = threaded_loop::run_session(config.clone(), operator_rx, shutdown)?;
    finish_interactive(&metrics, &session_over, reader);
    Ok(())
}

fn run_async_session(config: &ServoConfig) -> Result<()> {
    println!("\n=== Async Session ===");
    describe(config);
    menu::show_controls();

    let (operator_tx, operator_rx) = tokio::sync::mpsc::unbounded_channel();
    let session_over = Arc::new(AtomicBool::new(false));
    let reader = menu::spawn_operator_reader(
        move |command| operator_tx.send(command).is_ok(),
        Arc::clone(&session_over),
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let rt = tokio::runtime::Runtime::new()?;
    let metrics = rt.block_on(async_loop::run_session(config.clone(), operator_rx, shutdown))?;
    finish_interactive(&metrics, &session_over, reader);
    Ok(())
}

fn finish_interactive(
    metrics: &MetricsCollector,
    session_over: &AtomicBool,
    reader: std::thread::JoinHandle<()>,
) {
    session_over.store(true, Ordering::Relaxed);
    display_report(&metrics.report());

    // The reader is still blocked on stdin unless the operator quit; the
    // next Enter releases it.
    if !reader.is_finished() {
        println!("\nPress Enter to return to menu...");
    } else {
        menu::wait_for_enter();
    }
    let _ = reader.join();
}

fn run_mode_comparison(config: &ServoConfig) -> Result<()> {
    println!("\n=== Open Loop vs Closed Loop ===");

    let mut config = config.clone();
    if config.duration_secs == 0 {
        config.duration_secs = COMPARISON_SECS;
    }
    println!("Each mode runs for {} seconds on the threaded driver.", config.duration_secs);

    let mut reports = Vec::new();
    for mode in [ControlMode::OpenLoop, ControlMode::ClosedLoop] {
        let mut run = config.clone();
        run.control_loop.initial_mode = mode;
        run.experiment_name = format!("{}_{}", config.experiment_name, mode);
        info!(%mode, "starting comparison run");

        let metrics = threaded_loop::run_experiment(run)?;
        println!("\n--- {} ---", mode);
        let report = metrics.report();
        display_report(&report);
        reports.push((mode, report));
    }

    println!("\n=== Comparison Summary ===");
    for (mode, report) in &reports {
        println!(
            "- {:<12} rms={}  smoothness={}  settled={}",
            mode.to_string(),
            millimetres(report.rms_error),
            report.smoothness.map_or_else(|| "n/a".to_string(), |s| format!("{:.3e}", s)),
            report.settling.map_or_else(|| "never".to_string(), |s| format!("{:.2}s", s.time_secs)),
        );
    }

    menu::wait_for_enter();
    Ok(())
}

fn show_config(path: &str, config: &ServoConfig) {
    println!("\n=== Configuration ({}) ===", path);
    println!("{:#?}", config);
    menu::wait_for_enter();
}

fn describe(config: &ServoConfig) {
    let duration = if config.duration_secs == 0 {
        "until quit".to_string()
    } else {
        format!("{} seconds", config.duration_secs)
    };
    println!(
        "Configuration: {} start, {} ms tick, alpha {}, {}",
        config.control_loop.initial_mode,
        config.control_loop.tick_period_ms,
        config.smoothing.alpha,
        duration
    );
}

fn millimetres(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{:.2} mm", v * 1000.0))
}

fn display_report(report: &SessionReport) {
    if report.total_ticks == 0 {
        println!("No ticks recorded.");
        return;
    }

    println!("\n=== Session Report ===");
    println!("Total ticks: {}", report.total_ticks);
    println!("Stale ticks: {}", report.stale_ticks);
    println!("Feedback missing: {}", report.feedback_missing_ticks);
    println!("Dispatch dropped: {}", report.dispatch_dropped_ticks);
    println!("RMS error: {}", millimetres(report.rms_error));
    if let Some(stats) = &report.error_stats {
        println!(
            "Error: mean {:.2} mm, std {:.2} mm, max {:.2} mm",
            stats.mean * 1000.0,
            stats.std * 1000.0,
            stats.max * 1000.0
        );
    }
    println!("Steady-state error: {}", millimetres(report.steady_state_error));
    match report.settling {
        Some(s) => println!("Settled at tick {} ({:.2} s)", s.tick_index, s.time_secs),
        None => println!("Never settled"),
    }
    println!("Overshoot: {}", millimetres(report.overshoot));

    if !report.mode_changes.is_empty() {
        println!("Mode changes:");
        for change in &report.mode_changes {
            println!("- tick {}: {} -> {}", change.tick_index, change.from, change.to);
        }
    }
}
