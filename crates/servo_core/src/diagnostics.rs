use std::sync::atomic::{AtomicU64, Ordering};

/// Degradation counters, readable from any thread while a session runs.
#[derive(Debug, Default)]
pub struct SharedDiagnostics {
    pub stale_ticks: AtomicU64,
    pub degraded_ticks: AtomicU64,
    pub dropped_dispatches: AtomicU64,
    pub rejected_inputs: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub stale_ticks: u64,
    pub degraded_ticks: u64,
    pub dropped_dispatches: u64,
    pub rejected_inputs: u64,
}

impl SharedDiagnostics {
    pub fn record_stale(&self) {
        self.stale_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_degraded(&self) {
        self.degraded_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_dispatch(&self) {
        self.dropped_dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_input(&self) {
        self.rejected_inputs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            stale_ticks: self.stale_ticks.load(Ordering::Relaxed),
            degraded_ticks: self.degraded_ticks.load(Ordering::Relaxed),
            dropped_dispatches: self.dropped_dispatches.load(Ordering::Relaxed),
            rejected_inputs: self.rejected_inputs.load(Ordering::Relaxed),
        }
    }
}
